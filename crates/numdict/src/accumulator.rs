//! # MutableNumDict - In-Place Accumulator
//!
//! The mutable counterpart of [`NumDict`], used where values are built
//! up incrementally: learned weight dictionaries, goal stores, working
//! memory slots. Opting into mutation is a choice of type, not a flag,
//! so a function signature says whether it can rewrite its activations.
//!
//! In-place operations are never recorded on a gradient tape. To
//! differentiate through accumulated values, [`snapshot`] the current
//! state onto a tape as a leaf variable.
//!
//! [`snapshot`]: MutableNumDict::snapshot

use std::collections::BTreeMap;
use std::fmt;

use crate::error::NumDictError;
use crate::numdict::{close, Key, NumDict};

/// A mutable sparse mapping from keys to `f64` with an optional default.
///
/// Shares the union/default semantics of [`NumDict`]; the compound
/// assignment methods mutate `self` in place.
#[derive(Debug, Clone)]
pub struct MutableNumDict<K: Key> {
    map: BTreeMap<K, f64>,
    default: Option<f64>,
}

impl<K: Key> MutableNumDict<K> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            default: None,
        }
    }

    pub fn with_default(default: f64) -> Self {
        Self {
            map: BTreeMap::new(),
            default: Some(default),
        }
    }

    pub fn from_pairs<I>(pairs: I, default: Option<f64>) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
    {
        Self {
            map: pairs.into_iter().collect(),
            default,
        }
    }

    pub fn default(&self) -> Option<f64> {
        self.default
    }

    pub fn set_default(&mut self, default: Option<f64>) {
        self.default = default;
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &f64)> {
        self.map.iter()
    }

    pub fn value(&self, key: &K) -> Option<f64> {
        self.map.get(key).copied().or(self.default)
    }

    pub fn get(&self, key: &K) -> Result<f64, NumDictError> {
        self.value(key).ok_or_else(|| NumDictError::MissingKey {
            key: format!("{:?}", key),
        })
    }

    pub fn insert(&mut self, key: K, value: f64) -> Option<f64> {
        self.map.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<f64> {
        self.map.remove(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> NumDict<K> {
        NumDict::from_pairs(self.map.iter().map(|(k, v)| (k.clone(), *v)), self.default)
    }

    /// Consume into an immutable numdict.
    pub fn freeze(self) -> NumDict<K> {
        NumDict::from_pairs(self.map, self.default)
    }

    // ========================================================================
    // Compound assignment
    // ========================================================================

    /// In-place elementwise combination over the union of key sets,
    /// with the same missing-key semantics as [`NumDict::binary`].
    /// `self` is untouched when the operation fails.
    pub fn apply(
        &mut self,
        other: &NumDict<K>,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<(), NumDictError> {
        let mut map = BTreeMap::new();
        for (k, v) in &self.map {
            map.insert(k.clone(), f(*v, other.get(k)?));
        }
        for k in other.keys() {
            if !self.map.contains_key(k) {
                map.insert(k.clone(), f(self.get(k)?, other.get(k)?));
            }
        }
        self.default = match (self.default, other.default()) {
            (Some(a), Some(b)) => Some(f(a, b)),
            _ => None,
        };
        self.map = map;
        Ok(())
    }

    pub fn add_assign(&mut self, other: &NumDict<K>) -> Result<(), NumDictError> {
        self.apply(other, |a, b| a + b)
    }

    pub fn sub_assign(&mut self, other: &NumDict<K>) -> Result<(), NumDictError> {
        self.apply(other, |a, b| a - b)
    }

    pub fn mul_assign(&mut self, other: &NumDict<K>) -> Result<(), NumDictError> {
        self.apply(other, |a, b| a * b)
    }

    pub fn div_assign(&mut self, other: &NumDict<K>) -> Result<(), NumDictError> {
        self.apply(other, |a, b| a / b)
    }

    pub fn max_assign(&mut self, other: &NumDict<K>) -> Result<(), NumDictError> {
        self.apply(other, f64::max)
    }

    pub fn min_assign(&mut self, other: &NumDict<K>) -> Result<(), NumDictError> {
        self.apply(other, f64::min)
    }

    /// Overwrite entries with those of `other`; keys only in `self`
    /// are left alone. With `take_default`, the default is overwritten
    /// as well.
    pub fn update(&mut self, other: &NumDict<K>, take_default: bool) {
        for (k, v) in other.iter() {
            self.map.insert(k.clone(), *v);
        }
        if take_default {
            self.default = other.default();
        }
    }

    /// Insert `fill` for every listed key not already present.
    pub fn extend<I: IntoIterator<Item = K>>(&mut self, keys: I, fill: f64) {
        for k in keys {
            self.map.entry(k).or_insert(fill);
        }
    }

    /// Remove entries indistinguishable from the default.
    pub fn squeeze(&mut self) -> Result<(), NumDictError> {
        let default = self
            .default
            .ok_or(NumDictError::MissingDefault { op: "squeeze" })?;
        self.map.retain(|_, v| !close(*v, default));
        Ok(())
    }

    /// Keep only entries whose key satisfies `pred`. Idempotent.
    pub fn keep(&mut self, pred: impl Fn(&K) -> bool) {
        self.map.retain(|k, _| pred(k));
    }

    /// Remove entries whose key satisfies `pred`. Idempotent.
    pub fn drop(&mut self, pred: impl Fn(&K) -> bool) {
        self.map.retain(|k, _| !pred(k));
    }

    /// Set each entry to the value `other` holds for the key's group.
    pub fn set_by<G: Key>(
        &mut self,
        other: &NumDict<G>,
        group: impl Fn(&K) -> G,
    ) -> Result<(), NumDictError> {
        let mut map = BTreeMap::new();
        for k in self.map.keys() {
            map.insert(k.clone(), other.get(&group(k))?);
        }
        self.map = map;
        Ok(())
    }
}

impl<K: Key> Default for MutableNumDict<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> From<NumDict<K>> for MutableNumDict<K> {
    fn from(nd: NumDict<K>) -> Self {
        let default = nd.default();
        Self {
            map: nd.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            default,
        }
    }
}

impl<K: Key> PartialEq for MutableNumDict<K> {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl<K: Key> fmt::Display for MutableNumDict<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mutable{}", self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(pairs: &[(i32, f64)], default: Option<f64>) -> NumDict<i32> {
        NumDict::from_pairs(pairs.iter().copied(), default)
    }

    #[test]
    fn test_add_assign_accumulates() {
        let mut m = MutableNumDict::from_pairs([(1, 1.0), (2, 2.0)], Some(0.0));
        m.add_assign(&d(&[(2, 10.0)], Some(0.0))).unwrap();
        assert_eq!(m.snapshot(), d(&[(1, 1.0), (2, 12.0)], Some(0.0)));
    }

    #[test]
    fn test_apply_failure_leaves_state_unchanged() {
        let mut m = MutableNumDict::from_pairs([(1, 1.0)], None);
        let before = m.snapshot();
        assert!(m.add_assign(&d(&[(2, 2.0)], None)).is_err());
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_keep_drop_idempotent() {
        let mut m = MutableNumDict::from_pairs([(1, 1.0), (2, 2.0), (3, 3.0)], None);
        m.keep(|k| *k != 2);
        let once = m.snapshot();
        m.keep(|k| *k != 2);
        assert_eq!(m.snapshot(), once);
        m.drop(|k| *k == 3);
        let once = m.snapshot();
        m.drop(|k| *k == 3);
        assert_eq!(m.snapshot(), once);
        assert_eq!(m.snapshot(), d(&[(1, 1.0)], None));
    }

    #[test]
    fn test_update_and_extend() {
        let mut m = MutableNumDict::from_pairs([(1, 1.0)], None);
        m.update(&d(&[(1, 5.0), (2, 6.0)], Some(0.5)), true);
        assert_eq!(m.snapshot(), d(&[(1, 5.0), (2, 6.0)], Some(0.5)));
        m.extend([2, 3], 9.0);
        assert_eq!(m.value(&2), Some(6.0));
        assert_eq!(m.value(&3), Some(9.0));
    }

    #[test]
    fn test_squeeze() {
        let mut m = MutableNumDict::from_pairs([(1, 0.0), (2, 2.0)], Some(0.0));
        m.squeeze().unwrap();
        assert_eq!(m.snapshot(), d(&[(2, 2.0)], Some(0.0)));
        let mut closed = MutableNumDict::from_pairs([(1, 1.0)], None);
        assert!(closed.squeeze().is_err());
    }

    #[test]
    fn test_set_by_broadcasts_group_values() {
        let mut m = MutableNumDict::from_pairs([(("x", 1), 0.0), (("y", 2), 0.0)], None);
        let groups = NumDict::from_pairs([("x", 3.0), ("y", 7.0)], None);
        m.set_by(&groups, |k| k.0).unwrap();
        assert_eq!(m.value(&("x", 1)), Some(3.0));
        assert_eq!(m.value(&("y", 2)), Some(7.0));
    }
}
