//! # The Process Contract
//!
//! A [`Process`] is the behavior of one construct realizer: given the
//! activations pulled from its declared inputs, produce a new output
//! activation. Processes own whatever internal state they need; the
//! realizer machinery owns wiring and step order.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use clarion_numdict::{MutableNumDict, NumDict};

use crate::address::Address;
use crate::error::ProcessError;
use crate::symbols::ConstructSymbol;

/// An activation signal: a numdict keyed by construct symbols.
pub type Activation = NumDict<ConstructSymbol>;

/// The feature-space names a realizer may expose: representations,
/// commands, parameters, and flags.
pub const FSPACE_NAMES: [&str; 4] = ["reprs", "cmds", "params", "flags"];

/// The behavior of a construct realizer.
///
/// Implementations must be deterministic given their inputs and
/// internal state; any stochastic choice takes its RNG as explicit
/// state so cycles replay.
pub trait Process {
    /// The output published before the first cycle runs. Defaults to
    /// the empty activation.
    fn initial(&self) -> Activation {
        Activation::new()
    }

    /// One activation step. `inputs` holds the current outputs of the
    /// resolved input links, in declared order.
    fn call(&mut self, inputs: &Inputs) -> Result<Activation, ProcessError>;

    /// Configuration check, run once at assembly finalization. A
    /// failure here aborts assembly.
    fn validate(&self) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Receive handles to the feature spaces this realizer declared,
    /// in declared order. Called once at finalization.
    fn bind_fspaces(&mut self, _handles: Vec<FspaceHandle>) {}

    /// The current key set of a named feature space this process
    /// exposes, if any. `name` is one of [`FSPACE_NAMES`].
    fn fspace(&self, _name: &str) -> Option<Vec<ConstructSymbol>> {
        None
    }
}

/// The activations pulled for one process call, keyed by the declared
/// input address and ordered as declared.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    entries: Vec<(Address, Activation)>,
}

impl Inputs {
    /// Build an input set directly. The realizer does this when
    /// stepping; it is public so processes can be exercised standalone
    /// in tests.
    pub fn new(entries: Vec<(Address, Activation)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The activation at declared position `i`.
    pub fn at(&self, i: usize) -> Option<&Activation> {
        self.entries.get(i).map(|(_, act)| act)
    }

    /// The activation pulled for the declared address `addr` (matched
    /// on canonical text form).
    pub fn get(&self, addr: &str) -> Option<&Activation> {
        self.entries
            .iter()
            .find(|(a, _)| a.to_string() == addr)
            .map(|(_, act)| act)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Activation)> {
        self.entries.iter().map(|(a, act)| (a, act))
    }

    /// Max-pool all pulled activations into one: each key takes its
    /// largest value across inputs. Defaults are discarded.
    pub fn pool_max(&self) -> Activation {
        let mut pooled: MutableNumDict<ConstructSymbol> = MutableNumDict::new();
        for (_, act) in &self.entries {
            for (k, v) in act.iter() {
                match pooled.value(k) {
                    Some(existing) if existing >= *v => {}
                    _ => {
                        pooled.insert(k.clone(), *v);
                    }
                }
            }
        }
        pooled.freeze()
    }
}

/// A live view onto a named feature space of another realizer.
///
/// Handles stay current: `keys` reads the source process at call time
/// rather than snapshotting at finalization, so spaces that grow as
/// the agent learns are seen in their latest state. A handle never
/// points back at its declaring realizer; assembly rejects
/// self-referential space declarations, since the source process is
/// mutably borrowed while its own `call` runs.
#[derive(Clone)]
pub struct FspaceHandle {
    name: String,
    source: Address,
    process: Weak<RefCell<dyn Process>>,
}

impl FspaceHandle {
    pub(crate) fn new(
        name: String,
        source: Address,
        process: &Rc<RefCell<dyn Process>>,
    ) -> Self {
        Self {
            name,
            source,
            process: Rc::downgrade(process),
        }
    }

    /// The feature-space name, one of [`FSPACE_NAMES`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address of the realizer exposing the space.
    pub fn source(&self) -> &Address {
        &self.source
    }

    /// The space's current key set. Empty when the source realizer is
    /// gone or exposes no space under this name.
    pub fn keys(&self) -> Vec<ConstructSymbol> {
        self.process
            .upgrade()
            .and_then(|p| p.borrow().fspace(&self.name))
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for FspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FspaceHandle({}#{})", self.source, self.name)
    }
}
