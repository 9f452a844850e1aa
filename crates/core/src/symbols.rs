//! # Construct Symbols
//!
//! Symbols name the things activations are *about*: features, chunks,
//! rules, flows. They key numdicts, so they are cheap to clone, totally
//! ordered, and hashable. A symbol may carry a lag marking a reading of
//! the construct some number of cycles in the past.
//!
//! Canonical text form is `kind:id`, with `@lag` appended when lagged:
//! `feature:color-red`, `chunk:apple@1`. `Display` and `FromStr` are
//! exact inverses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AssemblyError;

/// The kind of entity a symbol names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ConstructKind {
    Dimension,
    Feature,
    Chunk,
    Rule,
    Flow,
    Buffer,
    Subsystem,
    Agent,
    Updater,
}

impl ConstructKind {
    pub fn label(self) -> &'static str {
        match self {
            ConstructKind::Dimension => "dimension",
            ConstructKind::Feature => "feature",
            ConstructKind::Chunk => "chunk",
            ConstructKind::Rule => "rule",
            ConstructKind::Flow => "flow",
            ConstructKind::Buffer => "buffer",
            ConstructKind::Subsystem => "subsystem",
            ConstructKind::Agent => "agent",
            ConstructKind::Updater => "updater",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        Some(match label {
            "dimension" => ConstructKind::Dimension,
            "feature" => ConstructKind::Feature,
            "chunk" => ConstructKind::Chunk,
            "rule" => ConstructKind::Rule,
            "flow" => ConstructKind::Flow,
            "buffer" => ConstructKind::Buffer,
            "subsystem" => ConstructKind::Subsystem,
            "agent" => ConstructKind::Agent,
            "updater" => ConstructKind::Updater,
            _ => return None,
        })
    }
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An immutable symbolic name: a kind, an identifier, and an optional
/// lag. Symbols order by kind, then identifier, then lag, which fixes
/// the iteration order of symbol-keyed numdicts.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ConstructSymbol {
    pub kind: ConstructKind,
    pub id: String,
    pub lag: Option<u32>,
}

impl ConstructSymbol {
    pub fn new(kind: ConstructKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            lag: None,
        }
    }

    /// A copy lagged `n` additional cycles into the past. Lags add: a
    /// symbol already at lag 1 lagged by 1 reads two cycles back.
    pub fn lagged(&self, n: u32) -> Self {
        Self {
            kind: self.kind,
            id: self.id.clone(),
            lag: Some(self.lag.unwrap_or(0) + n),
        }
    }

    /// The unlagged reading of this symbol.
    pub fn current(&self) -> Self {
        Self {
            kind: self.kind,
            id: self.id.clone(),
            lag: None,
        }
    }

    pub fn is_lagged(&self) -> bool {
        matches!(self.lag, Some(l) if l > 0)
    }
}

/// Shift a symbol `n` cycles into the past. Free-function form of
/// [`ConstructSymbol::lagged`] for building lagged key sets inline.
pub fn lag(sym: &ConstructSymbol, n: u32) -> ConstructSymbol {
    sym.lagged(n)
}

macro_rules! factories {
    ($($fn_name:ident => $kind:ident),* $(,)?) => {
        $(
            pub fn $fn_name(id: impl Into<String>) -> ConstructSymbol {
                ConstructSymbol::new(ConstructKind::$kind, id)
            }
        )*
    };
}

factories! {
    dimension => Dimension,
    feature => Feature,
    chunk => Chunk,
    rule => Rule,
    flow => Flow,
    buffer => Buffer,
    subsystem => Subsystem,
    agent => Agent,
    updater => Updater,
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

impl fmt::Display for ConstructSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)?;
        if let Some(l) = self.lag {
            write!(f, "@{}", l)?;
        }
        Ok(())
    }
}

impl FromStr for ConstructSymbol {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| AssemblyError::MalformedAddress {
            text: s.to_string(),
            reason: reason.to_string(),
        };

        let (body, lag) = match s.split_once('@') {
            Some((body, lag_text)) => {
                let lag = lag_text
                    .parse::<u32>()
                    .map_err(|_| malformed("lag is not a non-negative integer"))?;
                (body, Some(lag))
            }
            None => (s, None),
        };
        let (kind_text, id) = body
            .split_once(':')
            .ok_or_else(|| malformed("expected 'kind:id'"))?;
        let kind = ConstructKind::from_label(kind_text)
            .ok_or_else(|| malformed("unknown construct kind"))?;
        if !valid_id(id) {
            return Err(malformed(
                "identifier must be non-empty and use [A-Za-z0-9_.-]",
            ));
        }
        Ok(Self {
            kind,
            id: id.to_string(),
            lag,
        })
    }
}
