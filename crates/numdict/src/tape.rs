//! # GradientTape - Reverse-Mode Autodiff
//!
//! A tape is a computation graph built as arithmetic runs: leaf
//! variables enter with [`GradientTape::variable`], recorded ops append
//! cells holding the computed value, and edges carry operand slots.
//! [`GradientTape::gradients`] walks the graph in reverse topological
//! order, composing VJPs and summing gradients where a cell fans out to
//! several consumers.
//!
//! ## Example
//!
//! ```rust
//! use clarion_numdict::{GradientTape, NumDict};
//!
//! // y = sum(x * x)
//! let mut tape: GradientTape<i32> = GradientTape::new();
//! let x = tape.variable(NumDict::from_pairs([(1, 2.0), (2, 3.0)], None));
//! let sq = tape.mul(x, x).unwrap();
//! let y = tape.sum_by(sq, |_| 0).unwrap();
//!
//! let (value, grads) = tape.gradients(y, &[x]).unwrap();
//! assert_eq!(value.get(&0).unwrap(), 13.0);
//! // dy/dx = 2x
//! assert_eq!(grads[0], NumDict::from_pairs([(1, 4.0), (2, 6.0)], None));
//! ```
//!
//! Recording is single-threaded by contract; tapes are never shared
//! across threads mid-recording. Nested differentiation goes through
//! [`TapeStack`], which always records on the innermost tape.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::TapeError;
use crate::numdict::{Key, NumDict};
use crate::ops::{TapeOp, VjpRule};
use std::sync::Arc;

/// Handle to a value recorded on a tape.
///
/// Handles are only meaningful on the tape that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(NodeIndex);

/// Edge weight: which operand slot of the target the source feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot(usize);

/// One recorded value. Leaf variables carry no op.
#[derive(Debug, Clone)]
struct TapeCell<K: Key> {
    value: NumDict<K>,
    op: Option<TapeOp<K>>,
}

/// A recording of numdict arithmetic supporting reverse-mode
/// differentiation.
#[derive(Debug, Clone)]
pub struct GradientTape<K: Key> {
    graph: DiGraph<TapeCell<K>, Slot>,
    persistent: bool,
}

impl<K: Key> GradientTape<K> {
    /// A single-use tape: record once, differentiate.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            persistent: false,
        }
    }

    /// A persistent tape: leaf values may be replaced and the forward
    /// pass rerun with [`GradientTape::forward`].
    pub fn persistent() -> Self {
        Self {
            graph: DiGraph::new(),
            persistent: true,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Number of recorded cells (leaves included).
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Discard all recorded cells.
    pub fn reset(&mut self) {
        self.graph.clear();
    }

    /// Register a leaf variable.
    pub fn variable(&mut self, value: NumDict<K>) -> Var {
        Var(self.graph.add_node(TapeCell { value, op: None }))
    }

    /// The current value of a recorded cell.
    pub fn value(&self, var: Var) -> Result<&NumDict<K>, TapeError> {
        self.graph
            .node_weight(var.0)
            .map(|cell| &cell.value)
            .ok_or(TapeError::UnknownVariable {
                index: var.0.index(),
            })
    }

    /// Replace the value of a leaf variable on a persistent tape.
    /// Follow with [`GradientTape::forward`] to refresh downstream
    /// cells.
    pub fn set_variable(&mut self, var: Var, value: NumDict<K>) -> Result<(), TapeError> {
        if !self.persistent {
            return Err(TapeError::NotPersistent);
        }
        let cell = self
            .graph
            .node_weight_mut(var.0)
            .ok_or(TapeError::UnknownVariable {
                index: var.0.index(),
            })?;
        cell.value = value;
        Ok(())
    }

    /// Record an op: compute its output from the operand cells and
    /// append the result as a new cell.
    pub fn record(&mut self, op: TapeOp<K>, operands: &[Var]) -> Result<Var, TapeError> {
        if operands.len() != op.arity() {
            return Err(TapeError::ArityMismatch {
                op: op.name(),
                expected: op.arity(),
                got: operands.len(),
            });
        }
        let mut values = Vec::with_capacity(operands.len());
        for v in operands {
            values.push(self.value(*v)?.clone());
        }
        let out = op.forward(&values)?;
        let idx = self.graph.add_node(TapeCell {
            value: out,
            op: Some(op),
        });
        for (slot, v) in operands.iter().enumerate() {
            self.graph.add_edge(v.0, idx, Slot(slot));
        }
        Ok(Var(idx))
    }

    // ========================================================================
    // Recorded op shorthands
    // ========================================================================

    pub fn add(&mut self, a: Var, b: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Add, &[a, b])
    }

    pub fn sub(&mut self, a: Var, b: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Sub, &[a, b])
    }

    pub fn mul(&mut self, a: Var, b: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Mul, &[a, b])
    }

    pub fn div(&mut self, a: Var, b: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Div, &[a, b])
    }

    pub fn pow(&mut self, a: Var, b: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Pow, &[a, b])
    }

    pub fn max(&mut self, a: Var, b: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::MaxUnion, &[a, b])
    }

    pub fn min(&mut self, a: Var, b: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::MinUnion, &[a, b])
    }

    pub fn neg(&mut self, a: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Neg, &[a])
    }

    pub fn abs(&mut self, a: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Abs, &[a])
    }

    pub fn exp(&mut self, a: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Exp, &[a])
    }

    pub fn log(&mut self, a: Var) -> Result<Var, TapeError> {
        self.record(TapeOp::Log, &[a])
    }

    pub fn constant(&mut self, a: Var, value: f64) -> Result<Var, TapeError> {
        self.record(TapeOp::Constant { value }, &[a])
    }

    pub fn sum_by(
        &mut self,
        a: Var,
        group: impl Fn(&K) -> K + 'static,
    ) -> Result<Var, TapeError> {
        self.record(
            TapeOp::SumBy {
                group: Arc::new(group),
            },
            &[a],
        )
    }

    pub fn max_by(
        &mut self,
        a: Var,
        group: impl Fn(&K) -> K + 'static,
    ) -> Result<Var, TapeError> {
        self.record(
            TapeOp::MaxBy {
                group: Arc::new(group),
            },
            &[a],
        )
    }

    pub fn min_by(
        &mut self,
        a: Var,
        group: impl Fn(&K) -> K + 'static,
    ) -> Result<Var, TapeError> {
        self.record(
            TapeOp::MinBy {
                group: Arc::new(group),
            },
            &[a],
        )
    }

    pub fn custom(&mut self, rule: Arc<dyn VjpRule<K>>, operands: &[Var]) -> Result<Var, TapeError> {
        self.record(TapeOp::Custom(rule), operands)
    }

    // ========================================================================
    // Forward and backward passes
    // ========================================================================

    /// Recompute every non-leaf cell from current leaf values, in
    /// topological order. Persistent tapes only.
    pub fn forward(&mut self) -> Result<(), TapeError> {
        if !self.persistent {
            return Err(TapeError::NotPersistent);
        }
        for idx in self.topological_order()? {
            let Some(op) = self.graph[idx].op.clone() else {
                continue;
            };
            let values = self.operand_values(idx, op.arity())?;
            self.graph[idx].value = op.forward(&values)?;
        }
        Ok(())
    }

    /// Compute the gradient of `output` with respect to each source.
    ///
    /// The backward pass is seeded with 1.0 at every explicit key of
    /// the output (and a 1.0 default when the output has one), then
    /// composes VJPs in reverse topological order, summing gradients
    /// where a cell feeds several consumers. A source the pass never
    /// reaches yields a zero numdict shaped like its value.
    ///
    /// Returns the output value together with the source gradients, in
    /// source order.
    pub fn gradients(
        &self,
        output: Var,
        sources: &[Var],
    ) -> Result<(NumDict<K>, Vec<NumDict<K>>), TapeError> {
        let out_value = self.value(output)?.clone();
        for s in sources {
            self.value(*s)?;
        }

        let mut grads: HashMap<NodeIndex, NumDict<K>> = HashMap::new();
        grads.insert(output.0, out_value.constant(1.0));

        for idx in self.topological_order()?.into_iter().rev() {
            let Some(grad) = grads.get(&idx).cloned() else {
                continue;
            };
            let Some(op) = self.graph[idx].op.clone() else {
                continue;
            };
            let values = self.operand_values(idx, op.arity())?;
            let input_grads = op.vjp(&values, &grad)?;
            for edge in self.graph.edges_directed(idx, Direction::Incoming) {
                let Slot(slot) = *edge.weight();
                let g = input_grads
                    .get(slot)
                    .ok_or(TapeError::MissingOperand {
                        index: idx.index(),
                        slot,
                    })?;
                let updated = match grads.get(&edge.source()) {
                    Some(existing) => accumulate(existing, g),
                    None => g.clone(),
                };
                grads.insert(edge.source(), updated);
            }
        }

        let mut results = Vec::with_capacity(sources.len());
        for s in sources {
            let g = match grads.get(&s.0) {
                Some(g) => g.clone(),
                // Never reached by the backward pass: zero gradient.
                None => self.value(*s)?.constant(0.0),
            };
            results.push(g);
        }
        Ok((out_value, results))
    }

    fn topological_order(&self) -> Result<Vec<NodeIndex>, TapeError> {
        // Recording only ever adds edges into fresh nodes, so the graph
        // is acyclic; a cycle here means the tape is corrupt.
        toposort(&self.graph, None).map_err(|c| TapeError::MissingOperand {
            index: c.node_id().index(),
            slot: 0,
        })
    }

    fn operand_values(&self, idx: NodeIndex, arity: usize) -> Result<Vec<NumDict<K>>, TapeError> {
        let mut values: Vec<Option<NumDict<K>>> = vec![None; arity];
        for edge in self.graph.edges_directed(idx, Direction::Incoming) {
            let Slot(slot) = *edge.weight();
            if slot < arity {
                values[slot] = Some(self.graph[edge.source()].value.clone());
            }
        }
        values
            .into_iter()
            .enumerate()
            .map(|(slot, v)| {
                v.ok_or(TapeError::MissingOperand {
                    index: idx.index(),
                    slot,
                })
            })
            .collect()
    }
}

/// Sum two gradients, treating keys absent on either side as zero.
/// Unlike general numdict addition this never fails: gradient mass that
/// one branch did not produce is zero by definition.
fn accumulate<K: Key>(a: &NumDict<K>, b: &NumDict<K>) -> NumDict<K> {
    let pairs = a
        .keys()
        .chain(b.keys())
        .map(|k| (k.clone(), a.value(k).unwrap_or(0.0) + b.value(k).unwrap_or(0.0)));
    let default = match (a.default(), b.default()) {
        (Some(x), Some(y)) => Some(x + y),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    };
    NumDict::from_pairs(pairs, default)
}

impl<K: Key> Default for GradientTape<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Explicit context for nested differentiation: a stack of tapes where
/// the innermost (top) tape records. Passed where recording should
/// happen rather than consulted as ambient global state.
#[derive(Debug, Default)]
pub struct TapeStack<K: Key> {
    tapes: Vec<GradientTape<K>>,
}

impl<K: Key> TapeStack<K> {
    pub fn new() -> Self {
        Self { tapes: Vec::new() }
    }

    pub fn depth(&self) -> usize {
        self.tapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tapes.is_empty()
    }

    pub fn push(&mut self, tape: GradientTape<K>) {
        self.tapes.push(tape);
    }

    pub fn pop(&mut self) -> Option<GradientTape<K>> {
        self.tapes.pop()
    }

    /// The innermost tape, if any.
    pub fn top(&self) -> Option<&GradientTape<K>> {
        self.tapes.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut GradientTape<K>> {
        self.tapes.last_mut()
    }

    /// Run `f` with a fresh innermost tape pushed, then pop and return
    /// it alongside `f`'s result. Nested calls to `scope` record on
    /// their own (inner) tape only.
    pub fn scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> (GradientTape<K>, R) {
        self.tapes.push(GradientTape::new());
        let result = f(self);
        let tape = self.tapes.pop().unwrap_or_default();
        (tape, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(pairs: &[(i32, f64)], default: Option<f64>) -> NumDict<i32> {
        NumDict::from_pairs(pairs.iter().copied(), default)
    }

    #[test]
    fn test_gradient_of_square_sum() {
        let mut tape: GradientTape<i32> = GradientTape::new();
        let x = tape.variable(d(&[(1, 2.0), (2, 3.0)], None));
        let sq = tape.mul(x, x).unwrap();
        let y = tape.sum_by(sq, |_| 0).unwrap();

        let (value, grads) = tape.gradients(y, &[x]).unwrap();
        assert_eq!(value, d(&[(0, 13.0)], None));
        assert_eq!(grads[0], d(&[(1, 4.0), (2, 6.0)], None));
    }

    #[test]
    fn test_gradient_accumulates_at_fan_out() {
        // y = sum(x + x): dy/dx = 2 everywhere
        let mut tape: GradientTape<i32> = GradientTape::new();
        let x = tape.variable(d(&[(1, 1.0), (2, 5.0)], None));
        let twice = tape.add(x, x).unwrap();
        let y = tape.sum_by(twice, |_| 0).unwrap();

        let (_, grads) = tape.gradients(y, &[x]).unwrap();
        assert_eq!(grads[0], d(&[(1, 2.0), (2, 2.0)], None));
    }

    #[test]
    fn test_unreached_source_gets_zero_gradient() {
        let mut tape: GradientTape<i32> = GradientTape::new();
        let x = tape.variable(d(&[(1, 1.0)], None));
        let z = tape.variable(d(&[(1, 9.0)], None));
        let y = tape.sum_by(x, |_| 0).unwrap();

        let (_, grads) = tape.gradients(y, &[z]).unwrap();
        assert_eq!(grads[0], d(&[(1, 0.0)], None));
    }

    #[test]
    fn test_arity_mismatch() {
        let mut tape: GradientTape<i32> = GradientTape::new();
        let x = tape.variable(d(&[(1, 1.0)], None));
        let err = tape.record(TapeOp::Add, &[x]);
        assert!(matches!(err, Err(TapeError::ArityMismatch { .. })));
    }

    #[test]
    fn test_persistent_forward_recomputes() {
        let mut tape: GradientTape<i32> = GradientTape::persistent();
        let x = tape.variable(d(&[(1, 2.0)], None));
        let y = tape.mul(x, x).unwrap();
        assert_eq!(*tape.value(y).unwrap(), d(&[(1, 4.0)], None));

        tape.set_variable(x, d(&[(1, 3.0)], None)).unwrap();
        tape.forward().unwrap();
        assert_eq!(*tape.value(y).unwrap(), d(&[(1, 9.0)], None));
    }

    #[test]
    fn test_forward_requires_persistence() {
        let mut tape: GradientTape<i32> = GradientTape::new();
        let x = tape.variable(d(&[(1, 2.0)], None));
        assert!(matches!(
            tape.set_variable(x, d(&[(1, 3.0)], None)),
            Err(TapeError::NotPersistent)
        ));
        assert!(matches!(tape.forward(), Err(TapeError::NotPersistent)));
    }

    #[test]
    fn test_open_output_seeds_open_gradient() {
        let mut tape: GradientTape<i32> = GradientTape::new();
        let x = tape.variable(d(&[(1, 2.0)], Some(1.0)));
        let y = tape.mul(x, x).unwrap();

        let (_, grads) = tape.gradients(y, &[x]).unwrap();
        // d(x*x)/dx = 2x at both the key and the default
        assert_eq!(grads[0], d(&[(1, 4.0)], Some(2.0)));
    }

    #[test]
    fn test_stack_records_innermost() {
        let mut stack: TapeStack<i32> = TapeStack::new();
        let (outer, (inner, ())) = stack.scope(|outer_stack| {
            let ov = match outer_stack.top_mut() {
                Some(t) => t.variable(d(&[(1, 1.0)], None)),
                None => panic!("empty stack"),
            };
            let _ = ov;
            outer_stack.scope(|inner_stack| {
                if let Some(t) = inner_stack.top_mut() {
                    let v = t.variable(d(&[(2, 2.0)], None));
                    let _ = t.mul(v, v);
                }
            })
        });
        assert_eq!(outer.len(), 1);
        assert_eq!(inner.len(), 2);
        assert!(stack.is_empty());
    }
}
