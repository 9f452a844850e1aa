//! # NumDict - Sparse Keyed Numerical Dictionaries
//!
//! A numdict maps keys to `f64` activation values and optionally carries
//! a *default* standing in for every key not explicitly stored. A numdict
//! with a default is *open* (it answers for any key); one without is
//! *closed* (lookups outside the explicit key set fail).
//!
//! ## Arithmetic
//!
//! Elementwise binary operations run over the **union** of the two key
//! sets. Each side answers for the other side's keys with its default;
//! a side with no default fails with [`NumDictError::MissingKey`] rather
//! than filling in a silent zero. The result's default is
//! `op(d1.default, d2.default)` when both sides have one, else `None`.
//!
//! Keys iterate in ascending order. This is the documented tie-break
//! order for reductions like [`NumDict::max_by`].

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::error::NumDictError;

/// Bound alias for numdict key types.
///
/// Blanket-implemented; tuples of keys (e.g. symbol pairs for weight
/// dictionaries) qualify automatically.
pub trait Key: Clone + Ord + Hash + Debug {}
impl<T: Clone + Ord + Hash + Debug> Key for T {}

/// A single key/value pair, the atomic element of a numdict.
///
/// Hashable by key and value bit pattern, so keyed values can live in
/// sets even though `f64` itself is not `Eq`.
#[derive(Debug, Clone)]
pub struct KeyedValue<K> {
    pub key: K,
    pub value: f64,
}

impl<K> KeyedValue<K> {
    pub fn new(key: K, value: f64) -> Self {
        Self { key, value }
    }
}

impl<K> From<(K, f64)> for KeyedValue<K> {
    fn from((key, value): (K, f64)) -> Self {
        Self { key, value }
    }
}

impl<K: PartialEq> PartialEq for KeyedValue<K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value.to_bits() == other.value.to_bits()
    }
}

impl<K: Eq> Eq for KeyedValue<K> {}

impl<K: Hash> Hash for KeyedValue<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.value.to_bits().hash(state);
    }
}

/// An immutable sparse mapping from keys to `f64`, with an optional
/// default for keys not explicitly stored.
///
/// All operations return new numdicts; see
/// [`MutableNumDict`](crate::accumulator::MutableNumDict) for the
/// in-place accumulator variant.
#[derive(Debug, Clone)]
pub struct NumDict<K: Key> {
    map: BTreeMap<K, f64>,
    default: Option<f64>,
}

impl<K: Key> NumDict<K> {
    /// An empty closed numdict.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            default: None,
        }
    }

    /// An empty open numdict. Behaves as the scalar `c` under the
    /// elementwise operations (it answers `c` for every key).
    pub fn scalar(c: f64) -> Self {
        Self {
            map: BTreeMap::new(),
            default: Some(c),
        }
    }

    /// Build from explicit pairs and an optional default. Later pairs
    /// overwrite earlier ones with the same key.
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

    /// Copy with the default set to `default`.
    pub fn with_default(&self, default: f64) -> Self {
        Self {
            map: self.map.clone(),
            default: Some(default),
        }
    }

    /// Copy with the default removed.
    pub fn without_default(&self) -> Self {
        Self {
            map: self.map.clone(),
            default: None,
        }
    }

    /// Number of explicit keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether `key` is explicitly stored (the default does not count).
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Explicit keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    /// Explicit pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &f64)> {
        self.map.iter()
    }

    /// Explicit pairs as owned [`KeyedValue`]s.
    pub fn entries(&self) -> impl Iterator<Item = KeyedValue<K>> + '_ {
        self.map
            .iter()
            .map(|(k, v)| KeyedValue::new(k.clone(), *v))
    }

    /// The value at `key`: stored, else default, else `None`.
    pub fn value(&self, key: &K) -> Option<f64> {
        self.map.get(key).copied().or(self.default)
    }

    /// The value at `key`: stored, else default, else `MissingKey`.
    pub fn get(&self, key: &K) -> Result<f64, NumDictError> {
        self.value(key).ok_or_else(|| NumDictError::MissingKey {
            key: format!("{:?}", key),
        })
    }

    // ========================================================================
    // Elementwise operations
    // ========================================================================

    /// Apply `f` to every value, including the default.
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            map: self.map.iter().map(|(k, v)| (k.clone(), f(*v))).collect(),
            default: self.default.map(f),
        }
    }

    /// Elementwise combination over the union of key sets.
    ///
    /// Fails if either side is asked for a key it neither stores nor
    /// defaults. The result's default is `f(d1, d2)` when both sides
    /// have defaults, else `None`.
    pub fn binary(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self, NumDictError> {
        let mut map = BTreeMap::new();
        for (k, v) in &self.map {
            map.insert(k.clone(), f(*v, other.get(k)?));
        }
        for (k, v) in &other.map {
            if !self.map.contains_key(k) {
                map.insert(k.clone(), f(self.get(k)?, *v));
            }
        }
        let default = match (self.default, other.default) {
            (Some(a), Some(b)) => Some(f(a, b)),
            _ => None,
        };
        Ok(Self { map, default })
    }

    pub fn add(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, |a, b| a / b)
    }

    pub fn pow(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, f64::powf)
    }

    /// Elementwise maximum (fuzzy disjunction).
    pub fn max(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, f64::max)
    }

    /// Elementwise minimum (fuzzy conjunction).
    pub fn min(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, f64::min)
    }

    /// Indicator of `self >= other`, 1.0 where true and 0.0 elsewhere.
    pub fn ge(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, |a, b| if a >= b { 1.0 } else { 0.0 })
    }

    /// Indicator of `self <= other`.
    pub fn le(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, |a, b| if a <= b { 1.0 } else { 0.0 })
    }

    /// Indicator of `self > other`.
    pub fn gt(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, |a, b| if a > b { 1.0 } else { 0.0 })
    }

    /// Indicator of `self < other`.
    pub fn lt(&self, other: &Self) -> Result<Self, NumDictError> {
        self.binary(other, |a, b| if a < b { 1.0 } else { 0.0 })
    }

    /// Add the scalar `c` to every value.
    pub fn shift(&self, c: f64) -> Self {
        self.map_values(|v| v + c)
    }

    /// Multiply every value by the scalar `c`.
    pub fn scale(&self, c: f64) -> Self {
        self.map_values(|v| v * c)
    }

    pub fn neg(&self) -> Self {
        self.map_values(|v| -v)
    }

    pub fn abs(&self) -> Self {
        self.map_values(f64::abs)
    }

    pub fn exp(&self) -> Self {
        self.map_values(f64::exp)
    }

    /// Natural logarithm. Non-positive values yield NaN or `-inf` under
    /// `f64` semantics.
    pub fn log(&self) -> Self {
        self.map_values(f64::ln)
    }

    /// Same key set, every value replaced by `val`. The default becomes
    /// `val` when the source has one.
    pub fn constant(&self, val: f64) -> Self {
        self.map_values(|_| val)
    }

    /// Drop explicit entries indistinguishable from the default.
    pub fn squeezed(&self) -> Result<Self, NumDictError> {
        let default = self
            .default
            .ok_or(NumDictError::MissingDefault { op: "squeezed" })?;
        Ok(Self {
            map: self
                .map
                .iter()
                .filter(|(_, v)| !close(**v, default))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            default: self.default,
        })
    }

    // ========================================================================
    // Reductions
    // ========================================================================

    fn by<G: Key>(&self, group: impl Fn(&K) -> G, f: impl Fn(f64, f64) -> f64) -> NumDict<G> {
        let mut map: BTreeMap<G, f64> = BTreeMap::new();
        for (k, v) in &self.map {
            map.entry(group(k))
                .and_modify(|acc| *acc = f(*acc, *v))
                .or_insert(*v);
        }
        NumDict {
            map,
            default: self.default,
        }
    }

    /// Sum values within each group assigned by `group`.
    pub fn sum_by<G: Key>(&self, group: impl Fn(&K) -> G) -> NumDict<G> {
        self.by(group, |a, b| a + b)
    }

    /// Maximum value within each group.
    pub fn max_by<G: Key>(&self, group: impl Fn(&K) -> G) -> NumDict<G> {
        self.by(group, f64::max)
    }

    /// Minimum value within each group.
    pub fn min_by<G: Key>(&self, group: impl Fn(&K) -> G) -> NumDict<G> {
        self.by(group, f64::min)
    }

    /// Sum of the explicit values. The default does not contribute.
    pub fn val_sum(&self) -> f64 {
        self.map.values().sum()
    }

    /// Largest explicit value, `None` when empty.
    pub fn val_max(&self) -> Option<f64> {
        self.map.values().copied().fold(None, |acc, v| {
            Some(match acc {
                Some(m) => m.max(v),
                None => v,
            })
        })
    }

    /// Smallest explicit value, `None` when empty.
    pub fn val_min(&self) -> Option<f64> {
        self.map.values().copied().fold(None, |acc, v| {
            Some(match acc {
                Some(m) => m.min(v),
                None => v,
            })
        })
    }

    // ========================================================================
    // Restriction and key transforms
    // ========================================================================

    /// Keep only explicit entries whose key satisfies `pred`.
    pub fn keep(&self, pred: impl Fn(&K) -> bool) -> Self {
        Self {
            map: self
                .map
                .iter()
                .filter(|(k, _)| pred(k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            default: self.default,
        }
    }

    /// Remove explicit entries whose key satisfies `pred`.
    pub fn drop(&self, pred: impl Fn(&K) -> bool) -> Self {
        self.keep(|k| !pred(k))
    }

    /// Rewrite every key with `f`. When `f` maps two keys to the same
    /// image, the entry with the larger source key wins.
    pub fn transform_keys<G: Key>(&self, f: impl Fn(&K) -> G) -> NumDict<G> {
        NumDict {
            map: self.map.iter().map(|(k, v)| (f(k), *v)).collect(),
            default: self.default,
        }
    }

    /// Keep entries with value strictly above `th`. The default is
    /// unchanged.
    pub fn threshold(&self, th: f64) -> Self {
        Self {
            map: self
                .map
                .iter()
                .filter(|(_, v)| **v > th)
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            default: self.default,
        }
    }

    /// Clamp every value to `[low, high]`.
    pub fn clip(&self, low: f64, high: f64) -> Self {
        self.map_values(|v| v.clamp(low, high))
    }

    /// Approximate equality: same explicit key sets with close values,
    /// and close defaults (or none on both sides).
    pub fn isclose(&self, other: &Self) -> bool {
        if self.map.len() != other.map.len() {
            return false;
        }
        let defaults_close = match (self.default, other.default) {
            (Some(a), Some(b)) => close(a, b),
            (None, None) => true,
            _ => false,
        };
        defaults_close
            && self
                .map
                .iter()
                .all(|(k, v)| other.map.get(k).is_some_and(|w| close(*v, *w)))
    }

    // ========================================================================
    // Stochastic selection
    // ========================================================================

    /// Boltzmann distribution over the explicit keys at the given
    /// temperature. Shifted by the maximum value before exponentiation
    /// for numerical stability. The result is closed.
    pub fn boltzmann(&self, temperature: f64) -> Result<Self, NumDictError> {
        if temperature <= 0.0 {
            return Err(NumDictError::BadTemperature { temperature });
        }
        let hi = self.val_max().unwrap_or(0.0);
        let weights: BTreeMap<K, f64> = self
            .map
            .iter()
            .map(|(k, v)| (k.clone(), ((v - hi) / temperature).exp()))
            .collect();
        let z: f64 = weights.values().sum();
        Ok(Self {
            map: weights.into_iter().map(|(k, w)| (k, w / z)).collect(),
            default: None,
        })
    }

    /// Sample one key with probability proportional to its value and
    /// return a one-hot numdict over the explicit key set. With no
    /// positive mass the result is all zeros.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let total: f64 = self.map.values().filter(|v| **v > 0.0).sum();
        let mut chosen: Option<&K> = None;
        if total > 0.0 {
            let mut x = rng.gen::<f64>() * total;
            for (k, v) in &self.map {
                if *v <= 0.0 {
                    continue;
                }
                x -= v;
                if x <= 0.0 {
                    chosen = Some(k);
                    break;
                }
            }
        }
        Self {
            map: self
                .map
                .keys()
                .map(|k| (k.clone(), if Some(k) == chosen { 1.0 } else { 0.0 }))
                .collect(),
            default: self.default.map(|_| 0.0),
        }
    }
}

pub(crate) fn close(a: f64, b: f64) -> bool {
    let tol = 1e-9 * a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= tol
}

impl<K: Key> Default for NumDict<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> PartialEq for NumDict<K> {
    fn eq(&self, other: &Self) -> bool {
        self.default.map(f64::to_bits) == other.default.map(f64::to_bits)
            && self.map.len() == other.map.len()
            && self
                .map
                .iter()
                .zip(other.map.iter())
                .all(|((k1, v1), (k2, v2))| k1 == k2 && v1.to_bits() == v2.to_bits())
    }
}

impl<K: Key> FromIterator<(K, f64)> for NumDict<K> {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self::from_pairs(iter, None)
    }
}

impl<K: Key> FromIterator<KeyedValue<K>> for NumDict<K> {
    fn from_iter<I: IntoIterator<Item = KeyedValue<K>>>(iter: I) -> Self {
        Self::from_pairs(iter.into_iter().map(|kv| (kv.key, kv.value)), None)
    }
}

impl<K: Key> fmt::Display for NumDict<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumDict({{")?;
        for (i, (k, v)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}: {}", k, v)?;
        }
        write!(f, "}}")?;
        if let Some(d) = self.default {
            write!(f, ", default={}", d)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(pairs: &[(i32, f64)], default: Option<f64>) -> NumDict<i32> {
        NumDict::from_pairs(pairs.iter().copied(), default)
    }

    #[test]
    fn test_get_falls_back_to_default() {
        let nd = d(&[(1, 2.0)], Some(0.5));
        assert_eq!(nd.get(&1).unwrap(), 2.0);
        assert_eq!(nd.get(&9).unwrap(), 0.5);
    }

    #[test]
    fn test_get_missing_key_closed() {
        let nd = d(&[(1, 2.0)], None);
        assert!(matches!(nd.get(&9), Err(NumDictError::MissingKey { .. })));
    }

    #[test]
    fn test_add_union_of_keys() {
        let a = d(&[(1, 1.0), (2, 2.0)], Some(0.0));
        let b = d(&[(2, 10.0), (3, 30.0)], Some(5.0));
        let c = a.add(&b).unwrap();
        assert_eq!(c.get(&1).unwrap(), 6.0);
        assert_eq!(c.get(&2).unwrap(), 12.0);
        assert_eq!(c.get(&3).unwrap(), 30.0);
        assert_eq!(c.default(), Some(5.0));
    }

    #[test]
    fn test_add_missing_key_fails() {
        let a = d(&[(1, 1.0)], None);
        let b = d(&[(2, 2.0)], None);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn test_default_dropped_when_one_side_closed() {
        let a = d(&[(1, 1.0)], Some(0.0));
        let b = d(&[(1, 2.0)], None);
        assert_eq!(a.add(&b).unwrap().default(), None);
    }

    #[test]
    fn test_scalar_broadcast() {
        let a = d(&[(1, 1.0), (2, 2.0)], None);
        let c = a.mul(&NumDict::scalar(3.0)).unwrap();
        assert_eq!(c, d(&[(1, 3.0), (2, 6.0)], None));
    }

    #[test]
    fn test_sum_by_groups() {
        let nd = NumDict::from_pairs(
            [(("x", 1), 1.0), (("x", 2), 2.0), (("y", 1), 5.0)],
            None,
        );
        let grouped = nd.sum_by(|k| k.0);
        assert_eq!(grouped, NumDict::from_pairs([("x", 3.0), ("y", 5.0)], None));
        assert!(close(grouped.val_sum(), nd.val_sum()));
    }

    #[test]
    fn test_sum_by_distributes_over_addition() {
        let a = NumDict::from_pairs(
            [(("x", 1), 1.0), (("x", 2), 2.0), (("y", 1), 5.0)],
            None,
        );
        let b = NumDict::from_pairs(
            [(("x", 1), 0.5), (("x", 2), -1.0), (("y", 1), 3.0)],
            None,
        );
        let summed_then_grouped = a.add(&b).unwrap().sum_by(|k| k.0);
        let grouped_then_summed = a.sum_by(|k| k.0).add(&b.sum_by(|k| k.0)).unwrap();
        assert_eq!(summed_then_grouped, grouped_then_summed);
    }

    #[test]
    fn test_max_by_tie_break_is_order_independent() {
        let nd = d(&[(1, 3.0), (2, 3.0), (3, 1.0)], None);
        let m = nd.max_by(|_| ());
        assert_eq!(m.get(&()).unwrap(), 3.0);
    }

    #[test]
    fn test_keep_is_non_destructive() {
        let nd = d(&[(1, 1.0), (2, 2.0)], Some(0.0));
        let kept = nd.keep(|k| *k == 1);
        assert_eq!(kept, d(&[(1, 1.0)], Some(0.0)));
        assert_eq!(nd, d(&[(1, 1.0), (2, 2.0)], Some(0.0)));
    }

    #[test]
    fn test_drop_complements_keep() {
        let nd = d(&[(1, 1.0), (2, 2.0)], None);
        assert_eq!(nd.drop(|k| *k == 1), d(&[(2, 2.0)], None));
    }

    #[test]
    fn test_constant_preserves_shape() {
        let nd = d(&[(1, 1.0), (2, 2.0)], Some(0.5));
        assert_eq!(nd.constant(9.0), d(&[(1, 9.0), (2, 9.0)], Some(9.0)));
        assert_eq!(d(&[(1, 1.0)], None).constant(0.0).default(), None);
    }

    #[test]
    fn test_squeezed_drops_default_entries() {
        let nd = d(&[(1, 0.5), (2, 2.0)], Some(0.5));
        assert_eq!(nd.squeezed().unwrap(), d(&[(2, 2.0)], Some(0.5)));
        assert!(d(&[(1, 1.0)], None).squeezed().is_err());
    }

    #[test]
    fn test_threshold_and_clip() {
        let nd = d(&[(1, 0.2), (2, 0.8), (3, 1.4)], None);
        assert_eq!(nd.threshold(0.5), d(&[(2, 0.8), (3, 1.4)], None));
        assert_eq!(
            nd.clip(0.0, 1.0),
            d(&[(1, 0.2), (2, 0.8), (3, 1.0)], None)
        );
    }

    #[test]
    fn test_boltzmann_is_a_distribution() {
        let nd = d(&[(1, 1.0), (2, 2.0), (3, 3.0)], None);
        let p = nd.boltzmann(1.0).unwrap();
        assert!(close(p.val_sum(), 1.0));
        assert!(p.get(&3).unwrap() > p.get(&1).unwrap());
        assert!(nd.boltzmann(0.0).is_err());
    }

    #[test]
    fn test_draw_is_one_hot() {
        let mut rng = rand::thread_rng();
        let nd = d(&[(1, 0.0), (2, 5.0), (3, 0.0)], None);
        let pick = nd.draw(&mut rng);
        assert!(close(pick.val_sum(), 1.0));
        assert_eq!(pick.get(&2).unwrap(), 1.0);
    }

    #[test]
    fn test_equality_includes_default() {
        assert_ne!(d(&[(1, 1.0)], Some(0.0)), d(&[(1, 1.0)], None));
        assert_eq!(d(&[(1, 1.0)], Some(0.0)), d(&[(1, 1.0)], Some(0.0)));
    }

    #[test]
    fn test_transform_keys() {
        let nd = d(&[(1, 1.0), (2, 2.0)], None);
        let t = nd.transform_keys(|k| k + 10);
        assert_eq!(t, d(&[(11, 1.0), (12, 2.0)], None));
    }
}
