use std::{fmt, sync::Arc};

use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{MetricErr, Result};

/// Where a tensor's storage lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
    Xla(usize),
}

impl Device {
    /// Whether values on this device must be staged to host memory before they are stored.
    pub fn requires_host_staging(&self) -> bool {
        matches!(self, Device::Xla(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
            Device::Xla(idx) => write!(f, "xla:{idx}"),
        }
    }
}

/// Handle to the autograd node that produced a tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradFn(Arc<str>);

impl GradFn {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A dense `f32` array tagged with its device and, optionally, the graph node it hangs from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    data: ArrayD<f32>,
    device: Device,
    #[serde(skip)]
    grad_fn: Option<GradFn>,
}

impl Tensor {
    /// Creates a zero-dimensional tensor on the cpu.
    pub fn scalar(value: f32) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Creates a tensor on the cpu from an existing array.
    pub fn from_array(data: ArrayD<f32>) -> Self {
        Self {
            data,
            device: Device::Cpu,
            grad_fn: None,
        }
    }

    /// Creates a tensor with the given `shape` from a flat buffer.
    ///
    /// # Errors
    /// `MetricErr::InvalidShape` if `data` doesn't hold exactly the amount of elements of `shape`.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product();
        let got = data.len();
        let data = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|_| MetricErr::InvalidShape { got, expected })?;

        Ok(Self::from_array(data))
    }

    /// Creates a one-dimensional tensor.
    pub fn from_slice(values: &[f32]) -> Self {
        Self::from_array(Array1::from(values.to_vec()).into_dyn())
    }

    /// Marks this tensor as the output of the autograd node `name`.
    pub fn with_grad_fn(mut self, name: &str) -> Self {
        self.grad_fn = Some(GradFn::new(name));
        self
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn grad_fn(&self) -> Option<&GradFn> {
        self.grad_fn.as_ref()
    }

    pub fn requires_grad(&self) -> bool {
        self.grad_fn.is_some()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Length of the leading dimension, zero-dimensional tensors count as a single sample.
    pub fn leading_dim(&self) -> usize {
        self.data.shape().first().copied().unwrap_or(1)
    }

    /// Mean over every element, `NaN` for empty tensors.
    pub fn mean(&self) -> f32 {
        self.data.mean().unwrap_or(f32::NAN)
    }

    /// The single value held by this tensor, if it holds exactly one.
    pub fn item(&self) -> Option<f32> {
        if self.numel() == 1 {
            self.data.iter().next().copied()
        } else {
            None
        }
    }

    /// A copy of this tensor cut off from the graph that produced it.
    pub fn detach(&self) -> Self {
        Self {
            data: self.data.clone(),
            device: self.device,
            grad_fn: None,
        }
    }

    /// Moves this tensor to `device`.
    pub fn to(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Moves this tensor to `device` in place.
    pub fn to_mut(&mut self, device: Device) {
        self.device = device;
    }

    /// Applies `f` elementwise, keeping the device.
    pub fn mapv<F>(&self, f: F) -> Self
    where
        F: Fn(f32) -> f32,
    {
        Self::from_array(self.data.mapv(f)).to(self.device)
    }

    /// A scalar tensor holding `value` placed on the same device as `self`.
    pub(crate) fn scalar_like(&self, value: f32) -> Self {
        Self::scalar(value).to(self.device)
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.device == other.device && self.data == other.data
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item() {
            Some(v) if self.data.ndim() == 0 => write!(f, "tensor({v})")?,
            _ => write!(f, "tensor({})", self.data)?,
        }
        if self.device != Device::Cpu {
            write!(f, ", device={}", self.device)?;
        }
        Ok(())
    }
}

impl From<f32> for Tensor {
    fn from(value: f32) -> Self {
        Self::scalar(value)
    }
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self {
        Self::scalar(value as f32)
    }
}

impl From<i32> for Tensor {
    fn from(value: i32) -> Self {
        Self::scalar(value as f32)
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(value: ArrayD<f32>) -> Self {
        Self::from_array(value)
    }
}
