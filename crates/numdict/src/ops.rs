//! # Differentiable Operations
//!
//! This module defines [`TapeOp`], the set of operations recorded on a
//! gradient tape. Each operation knows how to:
//!
//! - Execute forward (compute its output from operand values)
//! - Compute its VJP (vector-Jacobian product for backprop)
//!
//! ## Operations
//!
//! | Op | Forward | Backward |
//! |----|---------|----------|
//! | Add | a + b | grad flows to both |
//! | Mul | a * b | (grad * b, grad * a) |
//! | MaxUnion | max(a, b) | grad × [a >= b], ties flow both ways |
//! | SumBy | group sums | broadcast group grad to members |
//! | MaxBy | group maxima | grad to the first extremum per group |
//!
//! User-defined differentiable ops implement [`VjpRule`] and are
//! recorded through [`TapeOp::Custom`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::NumDictError;
use crate::numdict::{Key, NumDict};

/// A grouping function carried by the keyed reductions. Reductions on a
/// tape map keys into the same key type, so one tape serves the whole
/// computation.
pub type KeyFn<K> = Arc<dyn Fn(&K) -> K>;

/// A user-defined differentiable operation.
pub trait VjpRule<K: Key> {
    fn name(&self) -> &'static str;

    /// Number of operands the op consumes.
    fn arity(&self) -> usize;

    fn forward(&self, inputs: &[NumDict<K>]) -> Result<NumDict<K>, NumDictError>;

    /// Gradients with respect to each operand, given the operand values
    /// and the gradient at the output. Must return `arity()` numdicts.
    fn vjp(
        &self,
        inputs: &[NumDict<K>],
        grad: &NumDict<K>,
    ) -> Result<Vec<NumDict<K>>, NumDictError>;
}

/// The built-in differentiable op set.
#[derive(Clone)]
pub enum TapeOp<K: Key> {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Abs,
    Exp,
    Log,
    /// Elementwise maximum (fuzzy disjunction).
    MaxUnion,
    /// Elementwise minimum (fuzzy conjunction).
    MinUnion,
    /// Replace every value with a constant; gradients do not flow past.
    Constant { value: f64 },
    SumBy { group: KeyFn<K> },
    MaxBy { group: KeyFn<K> },
    MinBy { group: KeyFn<K> },
    Custom(Arc<dyn VjpRule<K>>),
}

impl<K: Key> TapeOp<K> {
    pub fn name(&self) -> &'static str {
        match self {
            TapeOp::Add => "add",
            TapeOp::Sub => "sub",
            TapeOp::Mul => "mul",
            TapeOp::Div => "div",
            TapeOp::Pow => "pow",
            TapeOp::Neg => "neg",
            TapeOp::Abs => "abs",
            TapeOp::Exp => "exp",
            TapeOp::Log => "log",
            TapeOp::MaxUnion => "max",
            TapeOp::MinUnion => "min",
            TapeOp::Constant { .. } => "constant",
            TapeOp::SumBy { .. } => "sum_by",
            TapeOp::MaxBy { .. } => "max_by",
            TapeOp::MinBy { .. } => "min_by",
            TapeOp::Custom(rule) => rule.name(),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            TapeOp::Add
            | TapeOp::Sub
            | TapeOp::Mul
            | TapeOp::Div
            | TapeOp::Pow
            | TapeOp::MaxUnion
            | TapeOp::MinUnion => 2,
            TapeOp::Neg
            | TapeOp::Abs
            | TapeOp::Exp
            | TapeOp::Log
            | TapeOp::Constant { .. }
            | TapeOp::SumBy { .. }
            | TapeOp::MaxBy { .. }
            | TapeOp::MinBy { .. } => 1,
            TapeOp::Custom(rule) => rule.arity(),
        }
    }

    /// Compute the op's output from its operand values.
    pub fn forward(&self, inputs: &[NumDict<K>]) -> Result<NumDict<K>, NumDictError> {
        match self {
            TapeOp::Add => inputs[0].add(&inputs[1]),
            TapeOp::Sub => inputs[0].sub(&inputs[1]),
            TapeOp::Mul => inputs[0].mul(&inputs[1]),
            TapeOp::Div => inputs[0].div(&inputs[1]),
            TapeOp::Pow => inputs[0].pow(&inputs[1]),
            TapeOp::MaxUnion => inputs[0].max(&inputs[1]),
            TapeOp::MinUnion => inputs[0].min(&inputs[1]),
            TapeOp::Neg => Ok(inputs[0].neg()),
            TapeOp::Abs => Ok(inputs[0].abs()),
            TapeOp::Exp => Ok(inputs[0].exp()),
            TapeOp::Log => Ok(inputs[0].log()),
            TapeOp::Constant { value } => Ok(inputs[0].constant(*value)),
            TapeOp::SumBy { group } => Ok(inputs[0].sum_by(|k| group(k))),
            TapeOp::MaxBy { group } => Ok(inputs[0].max_by(|k| group(k))),
            TapeOp::MinBy { group } => Ok(inputs[0].min_by(|k| group(k))),
            TapeOp::Custom(rule) => rule.forward(inputs),
        }
    }

    /// The op's VJP. Gradients are restricted to each operand's key set
    /// by multiplication with a like-keyed indicator, so accumulation
    /// at fan-out stays well defined.
    pub fn vjp(
        &self,
        inputs: &[NumDict<K>],
        grad: &NumDict<K>,
    ) -> Result<Vec<NumDict<K>>, NumDictError> {
        match self {
            TapeOp::Add => {
                let a = grad.mul(&inputs[0].constant(1.0))?;
                let b = grad.mul(&inputs[1].constant(1.0))?;
                Ok(vec![a, b])
            }
            TapeOp::Sub => {
                let a = grad.mul(&inputs[0].constant(1.0))?;
                let b = grad.mul(&inputs[1].constant(-1.0))?;
                Ok(vec![a, b])
            }
            TapeOp::Mul => {
                let a = grad.mul(&inputs[1])?;
                let b = grad.mul(&inputs[0])?;
                Ok(vec![a, b])
            }
            TapeOp::Div => {
                let a = grad.div(&inputs[1])?;
                let b = grad
                    .mul(&inputs[0].neg())?
                    .div(&inputs[1].mul(&inputs[1])?)?;
                Ok(vec![a, b])
            }
            TapeOp::Pow => {
                // d/da a^b = b * a^(b-1); d/db a^b = ln(a) * a^b
                let a = grad
                    .mul(&inputs[1])?
                    .mul(&inputs[0].pow(&inputs[1].shift(-1.0))?)?;
                let b = grad
                    .mul(&inputs[0].log())?
                    .mul(&inputs[0].pow(&inputs[1])?)?;
                Ok(vec![a, b])
            }
            TapeOp::MaxUnion => {
                // Ties send the gradient to both operands.
                let a = grad.mul(&inputs[0].ge(&inputs[1])?)?;
                let b = grad.mul(&inputs[1].ge(&inputs[0])?)?;
                Ok(vec![a, b])
            }
            TapeOp::MinUnion => {
                let a = grad.mul(&inputs[0].le(&inputs[1])?)?;
                let b = grad.mul(&inputs[1].le(&inputs[0])?)?;
                Ok(vec![a, b])
            }
            TapeOp::Neg => Ok(vec![grad.mul(&inputs[0].constant(-1.0))?]),
            TapeOp::Abs => {
                let sign = inputs[0].map_values(|v| {
                    if v > 0.0 {
                        1.0
                    } else if v < 0.0 {
                        -1.0
                    } else {
                        0.0
                    }
                });
                Ok(vec![grad.mul(&sign)?])
            }
            TapeOp::Exp => Ok(vec![grad.mul(&inputs[0].exp())?]),
            TapeOp::Log => Ok(vec![grad.div(&inputs[0])?]),
            TapeOp::Constant { .. } => Ok(vec![grad.mul(&inputs[0].constant(0.0))?]),
            TapeOp::SumBy { group } => {
                // The group gradient broadcasts back to every member.
                let a = &inputs[0];
                let pairs = a
                    .keys()
                    .map(|k| (k.clone(), grad.value(&group(k)).unwrap_or(0.0)));
                Ok(vec![NumDict::from_pairs(pairs, grad.default())])
            }
            TapeOp::MaxBy { group } => {
                Ok(vec![arg_select(&inputs[0], grad, group, |v, best| {
                    v > best
                })])
            }
            TapeOp::MinBy { group } => {
                Ok(vec![arg_select(&inputs[0], grad, group, |v, best| {
                    v < best
                })])
            }
            TapeOp::Custom(rule) => rule.vjp(inputs, grad),
        }
    }
}

/// Gradient of a selective reduction: within each group, only the
/// selected member (first extremum in ascending key order) receives the
/// group's gradient.
fn arg_select<K: Key>(
    input: &NumDict<K>,
    grad: &NumDict<K>,
    group: &KeyFn<K>,
    beats: impl Fn(f64, f64) -> bool,
) -> NumDict<K> {
    let mut winners: BTreeMap<K, (K, f64)> = BTreeMap::new();
    for (k, v) in input.iter() {
        match winners.get(&group(k)) {
            Some((_, best)) if !beats(*v, *best) => {}
            _ => {
                winners.insert(group(k), (k.clone(), *v));
            }
        }
    }
    let pairs = input.keys().map(|k| {
        let g = group(k);
        let won = winners.get(&g).map(|(w, _)| w == k).unwrap_or(false);
        let gv = if won {
            grad.value(&g).unwrap_or(0.0)
        } else {
            0.0
        };
        (k.clone(), gv)
    });
    NumDict::from_pairs(pairs, grad.default())
}

impl<K: Key> fmt::Debug for TapeOp<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapeOp::Constant { value } => write!(f, "Constant({})", value),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(pairs: &[(i32, f64)], default: Option<f64>) -> NumDict<i32> {
        NumDict::from_pairs(pairs.iter().copied(), default)
    }

    fn ones_like(nd: &NumDict<i32>) -> NumDict<i32> {
        nd.constant(1.0)
    }

    #[test]
    fn test_mul_vjp_swaps_operands() {
        let a = d(&[(1, 2.0), (2, 3.0)], None);
        let b = d(&[(1, 5.0), (2, 7.0)], None);
        let grads = TapeOp::Mul
            .vjp(&[a.clone(), b.clone()], &ones_like(&a))
            .unwrap();
        assert_eq!(grads[0], b);
        assert_eq!(grads[1], a);
    }

    #[test]
    fn test_max_vjp_ties_flow_both_ways() {
        let a = d(&[(1, 2.0), (2, 5.0)], None);
        let b = d(&[(1, 2.0), (2, 1.0)], None);
        let grads = TapeOp::MaxUnion
            .vjp(&[a.clone(), b], &ones_like(&a))
            .unwrap();
        assert_eq!(grads[0], d(&[(1, 1.0), (2, 1.0)], None));
        assert_eq!(grads[1], d(&[(1, 1.0), (2, 0.0)], None));
    }

    #[test]
    fn test_sum_by_vjp_broadcasts() {
        let a = NumDict::from_pairs([(("x", 1), 1.0), (("x", 2), 2.0), (("y", 1), 3.0)], None);
        let op = TapeOp::SumBy {
            group: Arc::new(|k: &(&str, i32)| (k.0, 0)),
        };
        let grad = NumDict::from_pairs([(("x", 0), 10.0), (("y", 0), 20.0)], None);
        let grads = op.vjp(&[a], &grad).unwrap();
        assert_eq!(
            grads[0],
            NumDict::from_pairs(
                [(("x", 1), 10.0), (("x", 2), 10.0), (("y", 1), 20.0)],
                None
            )
        );
    }

    #[test]
    fn test_max_by_vjp_selects_first_extremum() {
        let a = d(&[(1, 5.0), (2, 5.0), (3, 1.0)], None);
        let op = TapeOp::MaxBy {
            group: Arc::new(|_: &i32| 0),
        };
        let grads = op.vjp(&[a], &d(&[(0, 1.0)], None)).unwrap();
        assert_eq!(grads[0], d(&[(1, 1.0), (2, 0.0), (3, 0.0)], None));
    }

    #[test]
    fn test_constant_blocks_gradient() {
        let a = d(&[(1, 2.0)], None);
        let grads = TapeOp::Constant { value: 7.0 }
            .vjp(&[a.clone()], &ones_like(&a))
            .unwrap();
        assert_eq!(grads[0], d(&[(1, 0.0)], None));
    }
}
