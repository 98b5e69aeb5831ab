//! Dotted attribute paths and element scope segments.
//!
//! A path addresses a nested location inside a message by field name; the
//! empty path is the message root. Collection and overlay maps are keyed by
//! path, so paths also carry *synthetic* segments of the form
//! `name[<guid-hex>]` that scope state under an individual set/list element.
//! Synthetic segments never name a real field; they exist only as map keys
//! and are produced by [`path_for_set_element`] / [`path_for_list_element`].

use crate::Guid;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AttributePath {
    segments: Vec<String>,
}

impl AttributePath {
    pub fn root() -> Self {
        AttributePath::default()
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributePath {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse dotted text (`"objective.waypoints"`). Empty input is the root.
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return AttributePath::root();
        }
        AttributePath::from_segments(text.split('.'))
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Extend by one segment, returning the longer path.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        AttributePath { segments }
    }

    /// Concatenate `other` under `self`.
    pub fn join(&self, other: &AttributePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        AttributePath { segments }
    }

    /// Path of everything but the last segment. Root has no parent.
    pub fn parent(&self) -> Option<AttributePath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(AttributePath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn starts_with(&self, prefix: &AttributePath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Remove `prefix`, re-rooting the remainder. `None` when `prefix` does
    /// not lead this path.
    pub fn strip_prefix(&self, prefix: &AttributePath) -> Option<AttributePath> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(AttributePath {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("<root>");
        }
        f.write_str(&self.segments.join("."))
    }
}

// Debug mirrors Display; paths appear constantly in trace output.
impl fmt::Debug for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Scope path for state nested under one set element.
pub fn path_for_set_element(name: &str, elem_id: Guid) -> AttributePath {
    AttributePath::from_segments([format!("{name}[{}]", elem_id.compact_hex())])
}

/// Scope path for state nested under one list element. Same shape as the set
/// form; the collection kind is carried by the owning decorator, not the key.
pub fn path_for_list_element(name: &str, elem_id: Guid) -> AttributePath {
    path_for_set_element(name, elem_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let p = AttributePath::parse("objective.waypoints");
        assert_eq!(p.segments(), &["objective", "waypoints"]);
        assert_eq!(p.to_string(), "objective.waypoints");
        assert!(AttributePath::parse("").is_root());
    }

    #[test]
    fn child_and_join() {
        let base = AttributePath::parse("objective");
        let deep = base.child("waypoints");
        assert_eq!(deep.to_string(), "objective.waypoints");
        let joined = base.join(&AttributePath::parse("a.b"));
        assert_eq!(joined.to_string(), "objective.a.b");
        assert_eq!(base.to_string(), "objective", "join must not mutate");
    }

    #[test]
    fn prefix_stripping() {
        let full = AttributePath::parse("objective.waypoints.speed");
        let prefix = AttributePath::parse("objective");
        assert!(full.starts_with(&prefix));
        let rest = full.strip_prefix(&prefix).expect("prefix applies");
        assert_eq!(rest.to_string(), "waypoints.speed");
        assert!(
            full.strip_prefix(&AttributePath::parse("other")).is_none(),
            "non-prefix must not strip"
        );
        assert_eq!(
            full.strip_prefix(&AttributePath::root()).expect("root strips"),
            full
        );
    }

    #[test]
    fn element_scope_segment_is_unique_per_guid() {
        let a = Guid::from_octets([1; 16]);
        let b = Guid::from_octets([2; 16]);
        let pa = path_for_set_element("waypoints", a);
        let pb = path_for_set_element("waypoints", b);
        assert_ne!(pa, pb);
        assert_eq!(pa.len(), 1);
        assert!(pa.segments()[0].starts_with("waypoints["));
        assert_eq!(path_for_list_element("waypoints", a), pa);
    }

    #[test]
    fn parent_walks_up() {
        let p = AttributePath::parse("a.b");
        assert_eq!(p.parent().expect("has parent").to_string(), "a");
        assert!(AttributePath::root().parent().is_none());
    }
}
