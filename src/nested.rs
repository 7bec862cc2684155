use std::collections::BTreeMap;

use serde::Serialize;

/// A value that is either a single leaf or a name-keyed mapping of nested values.
///
/// Every walk over logged values, accumulators and extracted results goes through the
/// structural recursion helpers below so leaves of two parallel structures always line up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Nested<T> {
    Leaf(T),
    Map(BTreeMap<String, Nested<T>>),
}

impl<T> Nested<T> {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Nested::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            Nested::Leaf(v) => Some(v),
            Nested::Map(_) => None,
        }
    }

    /// Looks up a direct child of a mapping.
    pub fn get(&self, name: &str) -> Option<&Nested<T>> {
        match self {
            Nested::Leaf(_) => None,
            Nested::Map(map) => map.get(name),
        }
    }

    /// Applies `f` to every leaf, keeping the structure.
    pub fn map<U, F>(&self, mut f: F) -> Nested<U>
    where
        F: FnMut(&T) -> U,
    {
        self.map_inner(&mut f)
    }

    fn map_inner<U, F>(&self, f: &mut F) -> Nested<U>
    where
        F: FnMut(&T) -> U,
    {
        match self {
            Nested::Leaf(v) => Nested::Leaf(f(v)),
            Nested::Map(map) => Nested::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.map_inner(f)))
                    .collect(),
            ),
        }
    }

    /// Like [`Nested::map`], but may fail on any leaf.
    pub fn try_map<U, E, F>(&self, mut f: F) -> Result<Nested<U>, E>
    where
        F: FnMut(&T) -> Result<U, E>,
    {
        self.try_map_inner(&mut f)
    }

    fn try_map_inner<U, E, F>(&self, f: &mut F) -> Result<Nested<U>, E>
    where
        F: FnMut(&T) -> Result<U, E>,
    {
        match self {
            Nested::Leaf(v) => Ok(Nested::Leaf(f(v)?)),
            Nested::Map(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.try_map_inner(f)?);
                }
                Ok(Nested::Map(out))
            }
        }
    }

    /// Applies `f` to every leaf, dropping the leaves for which it returns `None`.
    ///
    /// Mappings are kept even when all of their leaves were dropped; a bare leaf that
    /// is dropped yields `None`.
    pub fn filter_map<U, F>(&mut self, mut f: F) -> Option<Nested<U>>
    where
        F: FnMut(&mut T) -> Option<U>,
    {
        self.filter_map_inner(&mut f)
    }

    fn filter_map_inner<U, F>(&mut self, f: &mut F) -> Option<Nested<U>>
    where
        F: FnMut(&mut T) -> Option<U>,
    {
        match self {
            Nested::Leaf(v) => f(v).map(Nested::Leaf),
            Nested::Map(map) => Some(Nested::Map(
                map.iter_mut()
                    .filter_map(|(k, v)| v.filter_map_inner(f).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    /// Walks `self` and `other` in parallel, calling `f` on each pair of matching leaves.
    ///
    /// # Returns
    /// `false` as soon as the two structures diverge, leaving already visited leaves updated.
    pub fn zip_apply<U, F>(&mut self, other: &Nested<U>, mut f: F) -> bool
    where
        F: FnMut(&mut T, &U),
    {
        self.zip_apply_inner(other, &mut f)
    }

    fn zip_apply_inner<U, F>(&mut self, other: &Nested<U>, f: &mut F) -> bool
    where
        F: FnMut(&mut T, &U),
    {
        match (self, other) {
            (Nested::Leaf(a), Nested::Leaf(b)) => {
                f(a, b);
                true
            }
            (Nested::Map(a), Nested::Map(b)) => {
                a.len() == b.len()
                    && a.iter_mut().all(|(k, va)| match b.get(k) {
                        Some(vb) => va.zip_apply_inner(vb, f),
                        None => false,
                    })
            }
            _ => false,
        }
    }

    /// Whether `other` has the same shape as `self` and `pred` holds for every pair of leaves.
    pub fn zip_all<U, F>(&self, other: &Nested<U>, mut pred: F) -> bool
    where
        F: FnMut(&T, &U) -> bool,
    {
        self.zip_all_inner(other, &mut pred)
    }

    fn zip_all_inner<U, F>(&self, other: &Nested<U>, pred: &mut F) -> bool
    where
        F: FnMut(&T, &U) -> bool,
    {
        match (self, other) {
            (Nested::Leaf(a), Nested::Leaf(b)) => pred(a, b),
            (Nested::Map(a), Nested::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, va)| match b.get(k) {
                        Some(vb) => va.zip_all_inner(vb, pred),
                        None => false,
                    })
            }
            _ => false,
        }
    }

    /// Every leaf, in key order.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Nested::Leaf(v) => out.push(v),
            Nested::Map(map) => map.values().for_each(|v| v.collect_leaves(out)),
        }
    }

    /// Calls `f` on every leaf, in key order.
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut T),
    {
        self.for_each_mut_inner(&mut f);
    }

    fn for_each_mut_inner<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut T),
    {
        match self {
            Nested::Leaf(v) => f(v),
            Nested::Map(map) => map.values_mut().for_each(|v| v.for_each_mut_inner(f)),
        }
    }

    /// Whether any leaf satisfies `pred`.
    pub fn any_leaf<F>(&self, mut pred: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        self.leaves().into_iter().any(|v| pred(v))
    }

    /// Whether any leaf exists at all.
    pub fn has_leaves(&self) -> bool {
        self.any_leaf(|_| true)
    }
}

impl<T> From<BTreeMap<String, Nested<T>>> for Nested<T> {
    fn from(value: BTreeMap<String, Nested<T>>) -> Self {
        Nested::Map(value)
    }
}

impl<T, V> FromIterator<(String, V)> for Nested<T>
where
    V: Into<Nested<T>>,
{
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Nested::Map(iter.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}
