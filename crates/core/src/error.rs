//! # Error Types
//!
//! Assembly errors are fatal: a mis-spelled address or a failed
//! validation means the agent was mis-specified, and partial assembly
//! is never observable. Cycle errors abort the running cycle without
//! rolling back outputs already published in it.

use thiserror::Error;

/// Errors raised while assembling a structure of realizers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssemblyError {
    /// Text that does not parse as a construct symbol or address.
    #[error("malformed address '{text}': {reason}")]
    MalformedAddress { text: String, reason: String },

    /// A syntactically valid address naming no realizer.
    #[error("address '{address}' declared at '{at}' names no realizer")]
    UnresolvedAddress { address: String, at: String },

    /// A process rejected its configuration at finalization.
    #[error("validation failed at '{path}': {reason}")]
    Validation { path: String, reason: String },

    /// Two members with the same name under one parent.
    #[error("duplicate member name '{path}'")]
    DuplicateName { path: String },

    /// Mutation attempted after finalization. The structure is
    /// unchanged.
    #[error("structure '{path}' is already finalized")]
    AlreadyFinalized { path: String },

    /// A structure operation was aimed at a construct member.
    #[error("'{path}' is not a structure")]
    NotAStructure { path: String },

    /// A feature-space address without a recognized fragment, or one
    /// whose target exposes no such space.
    #[error("'{address}' does not name a feature space (expected fragment reprs|cmds|params|flags)")]
    InvalidFspace { address: String },
}

/// A process failure surfaced during a cycle.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessError {
    message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<clarion_numdict::NumDictError> for ProcessError {
    fn from(err: clarion_numdict::NumDictError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<clarion_numdict::TapeError> for ProcessError {
    fn from(err: clarion_numdict::TapeError) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors raised while stepping an assembled structure.
///
/// A cycle error leaves outputs published earlier in the cycle in
/// place; members after the failure point keep their previous-cycle
/// outputs.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("cannot step '{path}': assembly is not finalized")]
    NotFinalized { path: String },

    #[error("process at '{path}' failed")]
    Process {
        path: String,
        #[source]
        source: ProcessError,
    },
}
