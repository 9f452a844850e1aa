//! # Realizers - Assembly and Cycle Execution
//!
//! A [`Structure`] owns a tree of members: *constructs* (a name plus a
//! [`Process`]) and nested structures grouping them. Members declare
//! their inputs as relative addresses; at finalization every address is
//! resolved exactly once into a direct index link, feature-space
//! handles are bound, processes are validated, and a fixed step plan is
//! laid down. After that, [`Structure::step`] runs one synchronous
//! activation cycle per call with no name lookups on the hot path.
//!
//! ## Assembly
//!
//! Assembly is scope-based: [`Structure::assemble`] hands a [`Scope`]
//! to a closure, and nested structures open nested scopes.
//!
//! ```rust,ignore
//! let mut agent = Structure::new(agent("demo"));
//! agent.assemble(|s| {
//!     s.add_construct("stimulus", StimulusUnit::new(), &[], &[])?;
//!     s.add_structure("nacs", |nacs| {
//!         nacs.add_construct("assoc", Associator::new(), &["../stimulus"], &[])
//!     })
//! })?;
//! ```
//!
//! ## Cycle semantics
//!
//! The plan visits constructs in insertion (depth-first) order, then
//! runs each structure's aggregation process after its children. A
//! member reading a link stepped *later* in the plan sees that link's
//! previous-cycle output, which is what makes lagged recurrent wiring
//! work without any special casing. A process failure aborts the cycle
//! in place: earlier outputs stand, later members keep prior values.
//!
//! Feature-space declarations are checked at finalization: the target
//! must answer for the named space, so a process exposing a space
//! should return `Some` (possibly of an empty vector) even before the
//! space is populated.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::address::{valid_segment, Address};
use crate::assets::Assets;
use crate::error::{AssemblyError, CycleError};
use crate::process::{Activation, FspaceHandle, Inputs, Process, FSPACE_NAMES};
use crate::symbols::ConstructSymbol;

/// Lifecycle of an assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Members may still be added; addresses are unresolved.
    Unassembled,
    /// Addresses resolved into index links; not yet validated.
    Linked,
    /// Validated and runnable; membership is frozen.
    Finalized,
}

enum MemberKind {
    Construct {
        process: Rc<RefCell<dyn Process>>,
        input_addrs: Vec<Address>,
        fspace_addrs: Vec<Address>,
        /// Arena indices of the input targets, filled at finalization.
        links: Vec<usize>,
    },
    Structure {
        assets: Assets,
        aggregate: Option<Rc<RefCell<dyn Process>>>,
        children: Vec<usize>,
    },
}

struct Member {
    path: Address,
    parent: Option<usize>,
    kind: MemberKind,
}

#[derive(Debug, Clone, Copy)]
enum PlanStep {
    Construct(usize),
    Aggregate(usize),
}

/// A named hierarchy of construct realizers with one-shot assembly and
/// synchronous cycle execution.
pub struct Structure {
    symbol: ConstructSymbol,
    stage: Stage,
    /// Flat arena in depth-first insertion order; index 0 is the root.
    members: Vec<Member>,
    /// Canonical path text to arena index.
    index: HashMap<String, usize>,
    /// Current outputs, parallel to `members`.
    outputs: Vec<Activation>,
    plan: Vec<PlanStep>,
    cycles: u64,
}

impl Structure {
    pub fn new(symbol: ConstructSymbol) -> Self {
        let root = Member {
            path: Address::root(),
            parent: None,
            kind: MemberKind::Structure {
                assets: Assets::new(),
                aggregate: None,
                children: Vec::new(),
            },
        };
        let mut index = HashMap::new();
        index.insert(Address::root().to_string(), 0);
        Self {
            symbol,
            stage: Stage::Unassembled,
            members: vec![root],
            index,
            outputs: Vec::new(),
            plan: Vec::new(),
            cycles: 0,
        }
    }

    pub fn symbol(&self) -> &ConstructSymbol {
        &self.symbol
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Number of members, the root included.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.len() == 1
    }

    /// Completed cycle count.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// The root structure's shared asset namespace.
    pub fn assets(&self) -> Assets {
        match &self.members[0].kind {
            MemberKind::Structure { assets, .. } => assets.clone(),
            MemberKind::Construct { .. } => Assets::new(),
        }
    }

    /// Populate and finalize in one pass. Fails without touching the
    /// member tree when called on a finalized structure; fails with the
    /// structure left unrunnable when assembly itself errors.
    pub fn assemble(
        &mut self,
        f: impl FnOnce(&mut Scope<'_>) -> Result<(), AssemblyError>,
    ) -> Result<(), AssemblyError> {
        if self.stage == Stage::Finalized {
            return Err(AssemblyError::AlreadyFinalized {
                path: self.symbol.to_string(),
            });
        }
        debug!(agent = %self.symbol, "assembling");
        {
            let mut scope = Scope {
                members: &mut self.members,
                index: &mut self.index,
                at: 0,
            };
            f(&mut scope)?;
        }
        self.finalize()
    }

    fn finalize(&mut self) -> Result<(), AssemblyError> {
        // Resolve every declared input address into an arena index.
        for i in 0..self.members.len() {
            let declared = match &self.members[i].kind {
                MemberKind::Construct { input_addrs, .. } => input_addrs.clone(),
                MemberKind::Structure { .. } => continue,
            };
            let base = self.parent_path(i);
            let mut links = Vec::with_capacity(declared.len());
            for addr in &declared {
                let target = base.join(addr).path();
                let idx = self.index.get(&target.to_string()).copied().ok_or_else(|| {
                    AssemblyError::UnresolvedAddress {
                        address: addr.to_string(),
                        at: self.members[i].path.to_string(),
                    }
                })?;
                debug!(from = %self.members[i].path, to = %target, "linked input");
                links.push(idx);
            }
            if let MemberKind::Construct { links: slot, .. } = &mut self.members[i].kind {
                *slot = links;
            }
        }
        self.stage = Stage::Linked;

        // Bind feature-space handles.
        for i in 0..self.members.len() {
            let declared = match &self.members[i].kind {
                MemberKind::Construct { fspace_addrs, .. } => fspace_addrs.clone(),
                MemberKind::Structure { .. } => continue,
            };
            if declared.is_empty() {
                continue;
            }
            let base = self.parent_path(i);
            let mut handles = Vec::with_capacity(declared.len());
            for addr in &declared {
                let resolved = base.join(addr);
                let frag = resolved
                    .fragment()
                    .ok_or_else(|| AssemblyError::InvalidFspace {
                        address: resolved.to_string(),
                    })?
                    .to_string();
                let target = resolved.path();
                let t = self.index.get(&target.to_string()).copied().ok_or_else(|| {
                    AssemblyError::UnresolvedAddress {
                        address: addr.to_string(),
                        at: self.members[i].path.to_string(),
                    }
                })?;
                // A realizer's own process is mutably borrowed while it
                // runs, so a handle back to itself could never be read.
                if t == i {
                    return Err(AssemblyError::InvalidFspace {
                        address: resolved.to_string(),
                    });
                }
                let process = match &self.members[t].kind {
                    MemberKind::Construct { process, .. } => Rc::clone(process),
                    MemberKind::Structure { .. } => {
                        return Err(AssemblyError::InvalidFspace {
                            address: resolved.to_string(),
                        })
                    }
                };
                if process.borrow().fspace(&frag).is_none() {
                    return Err(AssemblyError::InvalidFspace {
                        address: resolved.to_string(),
                    });
                }
                debug!(from = %self.members[i].path, space = %resolved, "bound feature space");
                handles.push(FspaceHandle::new(frag, target, &process));
            }
            if let MemberKind::Construct { process, .. } = &self.members[i].kind {
                process.borrow_mut().bind_fspaces(handles);
            }
        }

        // Validate every process; any failure aborts assembly.
        for m in &self.members {
            let process = match &m.kind {
                MemberKind::Construct { process, .. } => Rc::clone(process),
                MemberKind::Structure {
                    aggregate: Some(p), ..
                } => Rc::clone(p),
                MemberKind::Structure { .. } => continue,
            };
            process
                .borrow()
                .validate()
                .map_err(|e| AssemblyError::Validation {
                    path: m.path.to_string(),
                    reason: e.to_string(),
                })?;
        }

        // Publish initial outputs and lay down the step plan.
        self.outputs = self
            .members
            .iter()
            .map(|m| match &m.kind {
                MemberKind::Construct { process, .. } => process.borrow().initial(),
                MemberKind::Structure {
                    aggregate: Some(p), ..
                } => p.borrow().initial(),
                MemberKind::Structure { .. } => Activation::new(),
            })
            .collect();
        let mut plan = Vec::new();
        build_plan(&self.members, 0, &mut plan);
        self.plan = plan;
        self.stage = Stage::Finalized;
        debug!(
            agent = %self.symbol,
            members = self.members.len(),
            steps = self.plan.len(),
            "assembly finalized"
        );
        Ok(())
    }

    fn parent_path(&self, i: usize) -> Address {
        match self.members[i].parent {
            Some(p) => self.members[p].path.clone(),
            None => Address::root(),
        }
    }

    /// Run one synchronous activation cycle in plan order.
    pub fn step(&mut self) -> Result<(), CycleError> {
        if self.stage != Stage::Finalized {
            return Err(CycleError::NotFinalized {
                path: self.symbol.to_string(),
            });
        }
        for step in &self.plan {
            let (i, process, entries) = match *step {
                PlanStep::Construct(i) => match &self.members[i].kind {
                    MemberKind::Construct {
                        process,
                        input_addrs,
                        links,
                        ..
                    } => {
                        let entries = input_addrs
                            .iter()
                            .zip(links)
                            .map(|(addr, &l)| (addr.clone(), self.outputs[l].clone()))
                            .collect();
                        (i, Rc::clone(process), entries)
                    }
                    MemberKind::Structure { .. } => continue,
                },
                PlanStep::Aggregate(i) => match &self.members[i].kind {
                    MemberKind::Structure {
                        aggregate: Some(p),
                        children,
                        ..
                    } => {
                        let entries = children
                            .iter()
                            .map(|&c| (self.members[c].path.clone(), self.outputs[c].clone()))
                            .collect();
                        (i, Rc::clone(p), entries)
                    }
                    _ => continue,
                },
            };
            let output = process
                .borrow_mut()
                .call(&Inputs::new(entries))
                .map_err(|e| CycleError::Process {
                    path: self.members[i].path.to_string(),
                    source: e,
                })?;
            self.outputs[i] = output;
        }
        self.cycles += 1;
        debug!(agent = %self.symbol, cycle = self.cycles, "cycle complete");
        Ok(())
    }

    /// The current output of the member at `path` (absolute or
    /// root-relative).
    pub fn output(&self, path: &str) -> Result<&Activation, AssemblyError> {
        let addr: Address = path.parse()?;
        let abs = Address::root().join(&addr).path();
        let idx = self.index.get(&abs.to_string()).copied().ok_or_else(|| {
            AssemblyError::UnresolvedAddress {
                address: path.to_string(),
                at: Address::root().to_string(),
            }
        })?;
        Ok(&self.outputs[idx])
    }

    /// All member paths in arena (depth-first insertion) order.
    pub fn paths(&self) -> impl Iterator<Item = &Address> {
        self.members.iter().map(|m| &m.path)
    }
}

fn build_plan(members: &[Member], at: usize, plan: &mut Vec<PlanStep>) {
    if let MemberKind::Structure {
        children, aggregate, ..
    } = &members[at].kind
    {
        for &c in children {
            match &members[c].kind {
                MemberKind::Construct { .. } => plan.push(PlanStep::Construct(c)),
                MemberKind::Structure { .. } => build_plan(members, c, plan),
            }
        }
        if aggregate.is_some() {
            plan.push(PlanStep::Aggregate(at));
        }
    }
}

/// A view into one structure member during assembly.
pub struct Scope<'a> {
    members: &'a mut Vec<Member>,
    index: &'a mut HashMap<String, usize>,
    at: usize,
}

impl<'a> Scope<'a> {
    /// The absolute path of the structure being populated.
    pub fn path(&self) -> Address {
        self.members[self.at].path.clone()
    }

    /// The asset namespace of the structure being populated.
    pub fn assets(&self) -> Assets {
        match &self.members[self.at].kind {
            MemberKind::Structure { assets, .. } => assets.clone(),
            MemberKind::Construct { .. } => Assets::new(),
        }
    }

    /// Add a construct member. `inputs` and `fspaces` are addresses
    /// relative to this scope; fspace addresses must carry a fragment
    /// naming one of the recognized spaces.
    pub fn add_construct(
        &mut self,
        name: &str,
        process: impl Process + 'static,
        inputs: &[&str],
        fspaces: &[&str],
    ) -> Result<(), AssemblyError> {
        let input_addrs = inputs
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Address>, _>>()?;
        let mut fspace_addrs = Vec::with_capacity(fspaces.len());
        for s in fspaces {
            let addr: Address = s.parse()?;
            match addr.fragment() {
                Some(frag) if FSPACE_NAMES.contains(&frag) => fspace_addrs.push(addr),
                _ => {
                    return Err(AssemblyError::InvalidFspace {
                        address: s.to_string(),
                    })
                }
            }
        }
        let idx = self.add_member(
            name,
            MemberKind::Construct {
                process: Rc::new(RefCell::new(process)),
                input_addrs,
                fspace_addrs,
                links: Vec::new(),
            },
        )?;
        debug!(path = %self.members[idx].path, "added construct");
        Ok(())
    }

    /// Add a nested structure and populate it through `f`.
    pub fn add_structure(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Scope<'_>) -> Result<(), AssemblyError>,
    ) -> Result<(), AssemblyError> {
        self.add_structure_inner(name, None, f)
    }

    /// Add a nested structure with an aggregation process, run after
    /// the structure's children each cycle. It receives the children's
    /// outputs keyed by their absolute paths, and its output becomes
    /// the structure's own.
    pub fn add_structure_with(
        &mut self,
        name: &str,
        aggregate: impl Process + 'static,
        f: impl FnOnce(&mut Scope<'_>) -> Result<(), AssemblyError>,
    ) -> Result<(), AssemblyError> {
        self.add_structure_inner(name, Some(Rc::new(RefCell::new(aggregate))), f)
    }

    fn add_structure_inner(
        &mut self,
        name: &str,
        aggregate: Option<Rc<RefCell<dyn Process>>>,
        f: impl FnOnce(&mut Scope<'_>) -> Result<(), AssemblyError>,
    ) -> Result<(), AssemblyError> {
        let idx = self.add_member(
            name,
            MemberKind::Structure {
                assets: Assets::new(),
                aggregate,
                children: Vec::new(),
            },
        )?;
        debug!(path = %self.members[idx].path, "added structure");
        let mut inner = Scope {
            members: &mut *self.members,
            index: &mut *self.index,
            at: idx,
        };
        f(&mut inner)
    }

    fn add_member(&mut self, name: &str, kind: MemberKind) -> Result<usize, AssemblyError> {
        if !valid_segment(name) {
            return Err(AssemblyError::MalformedAddress {
                text: name.to_string(),
                reason: "member name is not an identifier".to_string(),
            });
        }
        let path = self.members[self.at].path.child(name);
        let key = path.to_string();
        if self.index.contains_key(&key) {
            return Err(AssemblyError::DuplicateName { path: key });
        }
        let idx = self.members.len();
        self.members.push(Member {
            path,
            parent: Some(self.at),
            kind,
        });
        self.index.insert(key, idx);
        if let MemberKind::Structure { children, .. } = &mut self.members[self.at].kind {
            children.push(idx);
        }
        Ok(idx)
    }
}
