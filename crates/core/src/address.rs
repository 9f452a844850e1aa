//! # Addresses
//!
//! Realizers are addressed by URI-like paths: `/` separates segments,
//! a leading `/` marks an absolute path, `..` climbs to the enclosing
//! structure, and an optional `#fragment` names a feature space on the
//! target. Declared addresses are resolved exactly once, at assembly
//! finalization; afterwards members reference each other by index.
//!
//! Examples: `stimulus`, `../nacs/assoc`, `/agent/stimulus#reprs`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AssemblyError;

pub const SEP: char = '/';
pub const FSEP: char = '#';
pub const SUP: &str = "..";

/// A parsed address: path segments plus an optional fragment.
///
/// Relative addresses may begin with a run of `..` segments; a `..`
/// after an ordinary segment is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    absolute: bool,
    segments: Vec<String>,
    fragment: Option<String>,
}

pub(crate) fn valid_segment(seg: &str) -> bool {
    let mut chars = seg.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Address {
    /// The absolute root address, `/`.
    pub fn root() -> Self {
        Self {
            absolute: true,
            segments: Vec::new(),
            fragment: None,
        }
    }

    /// A relative address naming the current location.
    pub fn here() -> Self {
        Self {
            absolute: false,
            segments: Vec::new(),
            fragment: None,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// This address without its fragment.
    pub fn path(&self) -> Self {
        Self {
            absolute: self.absolute,
            segments: self.segments.clone(),
            fragment: None,
        }
    }

    /// This address extended by one child segment.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self {
            absolute: self.absolute,
            segments,
            fragment: None,
        }
    }

    /// Resolve `other` against this address. An absolute `other` wins
    /// outright; a relative one appends, with leading `..` segments
    /// popping off this address (saturating at the root). The result
    /// carries `other`'s fragment.
    pub fn join(&self, other: &Address) -> Address {
        if other.absolute {
            return other.clone();
        }
        let mut segments = self.segments.clone();
        for seg in &other.segments {
            if seg == SUP {
                segments.pop();
            } else {
                segments.push(seg.clone());
            }
        }
        Address {
            absolute: self.absolute,
            segments,
            fragment: other.fragment.clone(),
        }
    }

    /// The longest shared leading path of two addresses.
    pub fn common_prefix(&self, other: &Address) -> Address {
        let segments = self
            .segments
            .iter()
            .zip(&other.segments)
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.clone())
            .collect();
        Address {
            absolute: self.absolute && other.absolute,
            segments,
            fragment: None,
        }
    }

    /// The relative address that reaches `self` from `base`, so that
    /// `base.join(&base.relativize(x)) == x` for fragment-free `x`.
    pub fn relativize(&self, base: &Address) -> Address {
        let common = self.common_prefix(base).len();
        let mut segments: Vec<String> = std::iter::repeat(SUP.to_string())
            .take(base.segments.len() - common)
            .collect();
        segments.extend(self.segments[common..].iter().cloned());
        Address {
            absolute: false,
            segments,
            fragment: self.fragment.clone(),
        }
    }

    /// A write-once composite identifier: this address qualified by a
    /// fragment, in canonical text form. Used to mint symbol
    /// identifiers owned by a realizer.
    pub fn qualified(&self, frag: &str) -> String {
        format!("{}{}{}", self, FSEP, frag)
    }
}

/// Recover the part of a composite identifier under `owner`, by
/// string-prefix matching on the canonical text form. Returns `None`
/// when `composite` is not owned by `owner`. Full inversion of
/// [`Address::qualified`] is not guaranteed once identifiers are
/// rewritten downstream.
pub fn strip_owner<'a>(composite: &'a str, owner: &Address) -> Option<&'a str> {
    let prefix = owner.to_string();
    let rest = composite.strip_prefix(&prefix)?;
    if rest.is_empty() {
        return Some(rest);
    }
    rest.strip_prefix(SEP).or_else(|| rest.strip_prefix(FSEP))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "{}", SEP)?;
        }
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEP)?;
            }
            f.write_str(seg)?;
        }
        if let Some(frag) = &self.fragment {
            write!(f, "{}{}", FSEP, frag)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| AssemblyError::MalformedAddress {
            text: s.to_string(),
            reason: reason.to_string(),
        };

        let (path_text, fragment) = match s.split_once(FSEP) {
            Some((path, frag)) => {
                if frag.is_empty() || frag.contains(FSEP) {
                    return Err(malformed("bad fragment"));
                }
                if !valid_segment(frag) {
                    return Err(malformed("fragment must be an identifier"));
                }
                (path, Some(frag.to_string()))
            }
            None => (s, None),
        };

        let (absolute, body) = match path_text.strip_prefix(SEP) {
            Some(rest) => (true, rest),
            None => (false, path_text),
        };

        let mut segments = Vec::new();
        if !body.is_empty() {
            let mut past_sup = false;
            for seg in body.split(SEP) {
                if seg == SUP {
                    if absolute {
                        return Err(malformed("'..' in an absolute address"));
                    }
                    if past_sup {
                        return Err(malformed("'..' after an ordinary segment"));
                    }
                } else if valid_segment(seg) {
                    past_sup = true;
                } else if seg.is_empty() {
                    return Err(malformed("empty segment"));
                } else {
                    return Err(malformed("segment is not an identifier"));
                }
                segments.push(seg.to_string());
            }
        }

        Ok(Self {
            absolute,
            segments,
            fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_display_round_trip() {
        for text in [
            "/",
            "/agent/stimulus",
            "stimulus",
            "../nacs/assoc",
            "../../top",
            "stimulus#reprs",
            "#cmds",
        ] {
            assert_eq!(a(text).to_string(), text);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in [
            "a//b",
            "a/",
            "1abc",
            "a b",
            "x#",
            "x#a#b",
            "a/../b",
            "/../a",
            "x#1frag",
        ] {
            assert!(text.parse::<Address>().is_err(), "parsed '{text}'");
        }
    }

    #[test]
    fn test_join_relative() {
        let base = a("/agent/nacs");
        assert_eq!(base.join(&a("assoc")), a("/agent/nacs/assoc"));
        assert_eq!(base.join(&a("../stimulus")), a("/agent/stimulus"));
        assert_eq!(base.join(&a("/other")), a("/other"));
        assert_eq!(base.join(&a("../stimulus#reprs")), a("/agent/stimulus#reprs"));
    }

    #[test]
    fn test_join_saturates_at_root() {
        assert_eq!(a("/x").join(&a("../../y")), a("/y"));
    }

    #[test]
    fn test_relativize_inverts_join() {
        let base = a("/agent/nacs/assoc");
        for target in ["/agent/stimulus", "/agent/nacs/terms", "/agent"] {
            let rel = a(target).relativize(&base);
            assert_eq!(base.join(&rel), a(target), "via {rel}");
        }
    }

    #[test]
    fn test_common_prefix() {
        assert_eq!(
            a("/agent/nacs/assoc").common_prefix(&a("/agent/acs")),
            a("/agent")
        );
    }

    #[test]
    fn test_qualified_and_strip_owner() {
        let owner = a("/agent/stimulus");
        let composite = owner.qualified("reprs");
        assert_eq!(composite, "/agent/stimulus#reprs");
        assert_eq!(strip_owner(&composite, &owner), Some("reprs"));
        assert_eq!(strip_owner("/agent/stimulus/sub", &owner), Some("sub"));
        assert_eq!(strip_owner(&composite, &a("/agent/other")), None);
    }

    #[test]
    fn test_serde_round_trip() {
        let addr = a("../nacs/assoc#params");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);
    }
}
