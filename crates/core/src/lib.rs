//! # clarion-core - Construct Realizers
//!
//! This crate provides the assembly and runtime layer of a
//! Clarion-style cognitive agent:
//!
//! - **Symbols**: typed names (`feature:color-red`, `chunk:apple@1`)
//!   keying activation numdicts
//! - **Addresses**: URI-like paths locating realizers in an agent
//!   hierarchy, resolved exactly once at assembly
//! - **Processes**: the behavioral contract of a construct realizer
//! - **Realizers**: scope-based assembly into a flat arena with direct
//!   index links, and deterministic synchronous cycle execution
//! - **Assets**: shared typed-any namespaces for chunk and rule stores
//!
//! ## Design Philosophy
//!
//! Agents are specified declaratively and wired once: every symbolic
//! address is resolved at finalization, so a running cycle is just an
//! index walk over a fixed plan. Misconfiguration is an assembly-time
//! error, never a silent runtime fallback.

pub mod address;
pub mod assets;
pub mod error;
pub mod process;
pub mod realizer;
pub mod symbols;

// Re-export key types at crate root for convenience
pub use address::{strip_owner, Address};
pub use assets::Assets;
pub use error::{AssemblyError, CycleError, ProcessError};
pub use process::{Activation, FspaceHandle, Inputs, Process, FSPACE_NAMES};
pub use realizer::{Scope, Stage, Structure};
pub use symbols::{
    agent, buffer, chunk, dimension, feature, flow, lag, rule, subsystem, updater,
    ConstructKind, ConstructSymbol,
};

// The activation value type comes from the sibling crate; re-export it
// so downstream code needs only one dependency for common use.
pub use clarion_numdict::{MutableNumDict, NumDict};
