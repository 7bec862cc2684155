use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    accumulator::Accumulator,
    metadata::LogMetadata,
    nested::Nested,
    value::Value,
};

/// The accumulators of a value logged as a mapping, one per leaf, sharing their metadata.
pub struct AccumulatorGroup {
    meta: Arc<LogMetadata>,
    items: BTreeMap<String, Nested<Accumulator>>,
}

impl AccumulatorGroup {
    pub fn new(meta: Arc<LogMetadata>, items: BTreeMap<String, Nested<Accumulator>>) -> Self {
        Self { meta, items }
    }

    pub fn meta(&self) -> &Arc<LogMetadata> {
        &self.meta
    }

    pub fn get(&self, name: &str) -> Option<&Nested<Accumulator>> {
        self.items.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Nested<Accumulator>)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// A group counts as reset once every one of its leaves is.
    pub fn has_reset(&self) -> bool {
        self.leaves().iter().all(|acc| acc.has_reset())
    }

    pub fn leaves(&self) -> Vec<&Accumulator> {
        self.items.values().flat_map(|item| item.leaves()).collect()
    }

    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Accumulator),
    {
        for item in self.items.values_mut() {
            item.for_each_mut(&mut f);
        }
    }

    /// Whether `value` has the group's shape with a leaf of the right kind under every accumulator.
    pub fn accepts(&self, value: &Value) -> bool {
        let Nested::Map(value) = value else {
            return false;
        };

        self.items.len() == value.len()
            && self.items.iter().all(|(k, item)| {
                value
                    .get(k)
                    .is_some_and(|v| item.zip_all(v, |acc, leaf| acc.accepts(leaf)))
            })
    }

    pub(crate) fn as_nested_mut(&mut self) -> NestedGroupMut<'_> {
        NestedGroupMut(&mut self.items)
    }
}

/// Mutable view of a group's leaves as one nested structure.
pub(crate) struct NestedGroupMut<'a>(&'a mut BTreeMap<String, Nested<Accumulator>>);

impl NestedGroupMut<'_> {
    /// Walks the group's leaves in parallel with `other`.
    ///
    /// # Returns
    /// `false` if `other` doesn't have the group's shape.
    pub(crate) fn zip_apply<U, F>(&mut self, other: &Nested<U>, mut f: F) -> bool
    where
        F: FnMut(&mut Accumulator, &U),
    {
        let Nested::Map(other) = other else {
            return false;
        };

        self.0.len() == other.len()
            && self.0.iter_mut().all(|(k, item)| match other.get(k) {
                Some(v) => item.zip_apply(v, &mut f),
                None => false,
            })
    }

    /// Extracts one optional value per leaf, keeping the group's shape.
    pub(crate) fn filter_map<U, F>(&mut self, mut f: F) -> Nested<U>
    where
        F: FnMut(&mut Accumulator) -> Option<U>,
    {
        Nested::Map(
            self.0
                .iter_mut()
                .filter_map(|(k, item)| item.filter_map(&mut f).map(|v| (k.clone(), v)))
                .collect(),
        )
    }
}

impl fmt::Display for AccumulatorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_items(&self.items, f)
    }
}

fn fmt_items(items: &BTreeMap<String, Nested<Accumulator>>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (name, item)) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "'{name}': ")?;
        match item {
            Nested::Leaf(acc) => write!(f, "{acc}")?,
            Nested::Map(inner) => fmt_items(inner, f)?,
        }
    }
    write!(f, "}}")
}
