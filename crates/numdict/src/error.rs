//! # Error Types
//!
//! Numdict arithmetic is partial: elementwise operations run over the
//! union of two key sets, and a key present on one side but absent on a
//! default-less other side has no defined value. Those lookups fail
//! loudly here rather than filling in a silent zero.

use thiserror::Error;

/// Errors from numdict arithmetic and reductions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NumDictError {
    /// A key had no stored value and the numdict carries no default.
    #[error("key {key} is not present and no default is defined")]
    MissingKey { key: String },

    /// The operation requires a default value (e.g. `squeezed`).
    #[error("operation '{op}' requires a default value")]
    MissingDefault { op: &'static str },

    /// Boltzmann selection with a non-positive temperature.
    #[error("temperature must be positive, got {temperature}")]
    BadTemperature { temperature: f64 },
}

/// Errors from tape recording and gradient computation.
///
/// Note that asking for the gradient of a source the backward pass
/// never reached is NOT an error; it yields a zero numdict.
#[derive(Debug, Error)]
pub enum TapeError {
    /// A `Var` handle does not belong to this tape.
    #[error("variable {index} is not registered on this tape")]
    UnknownVariable { index: usize },

    /// An op was recorded with the wrong number of operands.
    #[error("op '{op}' expects {expected} operand(s), got {got}")]
    ArityMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    /// `forward` was called on a non-persistent tape.
    #[error("cannot rerun the forward pass on a non-persistent tape")]
    NotPersistent,

    /// The recorded value for an operand slot was missing during
    /// replay. Indicates tape corruption; should not occur through the
    /// public API.
    #[error("operand slot {slot} of node {index} has no recorded value")]
    MissingOperand { index: usize, slot: usize },

    #[error(transparent)]
    Numeric(#[from] NumDictError),
}
