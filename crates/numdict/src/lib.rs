//! # clarion-numdict - Sparse Keyed Numerical Dictionaries
//!
//! Activation signals in a Clarion-style agent are sparse mappings from
//! symbolic keys to `f64` values. This crate provides that mapping and
//! the machinery to differentiate through computations built from it:
//!
//! - [`NumDict`] — immutable numdicts with elementwise arithmetic over
//!   key-set unions, keyed reductions, restriction, and stochastic
//!   selection helpers
//! - [`MutableNumDict`] — the in-place accumulator variant, a distinct
//!   type so mutation is opt-in at the signature level
//! - [`TapeOp`] / [`VjpRule`] — the differentiable op set, each op
//!   paired with its vector-Jacobian product
//! - [`GradientTape`] — reverse-mode autodiff over a recorded
//!   computation graph, with [`TapeStack`] for nested differentiation
//!
//! ## Example
//!
//! ```rust
//! use clarion_numdict::{GradientTape, NumDict};
//!
//! let x = NumDict::from_pairs([("a", 1.0), ("b", 2.0)], None);
//! let w = NumDict::from_pairs([("a", 0.5), ("b", -0.5)], None);
//!
//! // Plain arithmetic needs no tape.
//! let weighted = x.mul(&w).unwrap();
//! assert_eq!(weighted.get(&"b").unwrap(), -1.0);
//!
//! // Differentiable arithmetic is recorded.
//! let mut tape = GradientTape::new();
//! let xv = tape.variable(x);
//! let wv = tape.variable(w);
//! let prod = tape.mul(xv, wv).unwrap();
//! let loss = tape.sum_by(prod, |_| "loss").unwrap();
//! let (_, grads) = tape.gradients(loss, &[wv]).unwrap();
//! assert_eq!(grads[0], NumDict::from_pairs([("a", 1.0), ("b", 2.0)], None));
//! ```

pub mod accumulator;
pub mod error;
pub mod numdict;
pub mod ops;
pub mod tape;

// Re-export key types at crate root for convenience
pub use accumulator::MutableNumDict;
pub use error::{NumDictError, TapeError};
pub use numdict::{Key, KeyedValue, NumDict};
pub use ops::{KeyFn, TapeOp, VjpRule};
pub use tape::{GradientTape, TapeStack, Var};
