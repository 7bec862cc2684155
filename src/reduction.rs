use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Deserializer};

use crate::{
    error::{MetricErr, Result},
    tensor::Tensor,
};

/// The reductions an accumulator knows how to apply across steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Reduction {
    #[default]
    Mean,
    Sum,
    Min,
    Max,
}

impl Reduction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
            Reduction::Min => "min",
            Reduction::Max => "max",
        }
    }

    /// Combines two values the way this reduction does between steps.
    ///
    /// A `NaN` on either side always wins, so diverging values stay visible.
    pub fn combine(&self, a: f32, b: f32) -> f32 {
        match self {
            Reduction::Mean | Reduction::Sum => a + b,
            Reduction::Min | Reduction::Max if a.is_nan() || b.is_nan() => f32::NAN,
            Reduction::Min => a.min(b),
            Reduction::Max => a.max(b),
        }
    }

    /// The value a running reduction starts from.
    pub fn identity(&self) -> f32 {
        match self {
            Reduction::Mean | Reduction::Sum => 0.0,
            Reduction::Min => f32::INFINITY,
            Reduction::Max => f32::NEG_INFINITY,
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reduction {
    type Err = MetricErr;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mean" | "avg" => Ok(Reduction::Mean),
            "sum" => Ok(Reduction::Sum),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            _ => Err(MetricErr::UnsupportedReduction {
                found: s.to_string(),
            }),
        }
    }
}

/// A user supplied reduction function.
pub type CustomReduceFn = Arc<dyn Fn(&Tensor) -> Tensor + Send + Sync>;

/// How the caller asked for values to be reduced, before validation.
#[derive(Clone)]
pub enum ReduceFx {
    Name(String),
    Builtin(Reduction),
    Custom(CustomReduceFn),
}

impl ReduceFx {
    pub fn is_custom(&self) -> bool {
        matches!(self, ReduceFx::Custom(_))
    }

    /// Normalizes the selector into one of the supported reductions.
    ///
    /// # Errors
    /// `MetricErr::UnsupportedReduction` for unknown names and for any custom function.
    pub fn resolve(&self) -> Result<Reduction> {
        match self {
            ReduceFx::Name(name) => name.parse(),
            ReduceFx::Builtin(reduction) => Ok(*reduction),
            ReduceFx::Custom(_) => Err(MetricErr::UnsupportedReduction {
                found: "a custom function".to_string(),
            }),
        }
    }
}

impl Default for ReduceFx {
    fn default() -> Self {
        ReduceFx::Builtin(Reduction::Mean)
    }
}

impl fmt::Debug for ReduceFx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceFx::Name(name) => f.debug_tuple("Name").field(name).finish(),
            ReduceFx::Builtin(r) => f.debug_tuple("Builtin").field(r).finish(),
            ReduceFx::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<Reduction> for ReduceFx {
    fn from(value: Reduction) -> Self {
        ReduceFx::Builtin(value)
    }
}

impl From<&str> for ReduceFx {
    fn from(value: &str) -> Self {
        ReduceFx::Name(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ReduceFx {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(ReduceFx::Name)
    }
}
