//! Identity and addressing primitives shared by every assembly crate.
//!
//! Three small value types live here:
//! - [`Guid`]: the 16-octet UMAA identifier. Equality and hashing are defined
//!   over the raw octet sequence, so a `Guid` is directly usable as a map key
//!   anywhere the engine buffers by `setID` / `listID` / `specializationID`.
//!   The all-zero [`Guid::NIL`] sentinel means "unassigned": readers decline
//!   to match it and writers allocate a fresh value in its place.
//! - [`Timestamp`]: seconds + nanoseconds, normalized on construction so the
//!   derived total order is meaningful.
//! - [`AttributePath`]: a dotted sequence of field-name segments addressing a
//!   nested location inside a message, plus the synthetic per-element scope
//!   segments used to nest collections under set/list elements.

mod path;
mod time;

pub use path::{AttributePath, path_for_list_element, path_for_set_element};
pub use time::Timestamp;

use std::fmt;

/// 16-octet opaque identifier.
///
/// Hash and equality are the octet sequence; wrapper provenance is
/// irrelevant. Display renders lowercase space-separated hex to match the
/// wire-debugging convention of the surrounding tooling.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid([u8; 16]);

impl Guid {
    /// All-zero sentinel meaning "unassigned".
    pub const NIL: Guid = Guid([0u8; 16]);

    pub const fn from_octets(octets: [u8; 16]) -> Self {
        Guid(octets)
    }

    pub const fn octets(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        *self == Guid::NIL
    }

    /// Mint a fresh random identifier (UUIDv4 octets).
    pub fn generate() -> Self {
        Guid(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Parse the canonical hyphenated UUID form. Used by configuration and
    /// tests; wire samples always carry raw octets.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Guid(*u.as_bytes()))
    }

    /// Compact lowercase hex without separators. Stable, filesystem- and
    /// segment-safe; used to build element scope path segments.
    pub fn compact_hex(&self) -> String {
        let mut out = String::with_capacity(32);
        for b in &self.0 {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return f.write_str("Guid(nil)");
        }
        write!(f, "Guid({})", self.compact_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn nil_is_all_zero_and_default() {
        assert!(Guid::NIL.is_nil());
        assert!(Guid::default().is_nil());
        assert_eq!(Guid::NIL.octets(), &[0u8; 16]);
    }

    #[test]
    fn equality_is_octet_sequence() {
        let a = Guid::from_octets([1; 16]);
        let b = Guid::from_octets([1; 16]);
        let c = Guid::from_octets([2; 16]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b), "hash must follow octet equality");
    }

    #[test]
    fn generate_is_unique_and_non_nil() {
        let a = Guid::generate();
        let b = Guid::generate();
        assert!(!a.is_nil());
        assert_ne!(a, b);
    }

    #[test]
    fn display_spaced_hex() {
        let g = Guid::from_octets([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0xff,
        ]);
        assert_eq!(
            g.to_string(),
            "00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e ff"
        );
        assert_eq!(g.compact_hex(), "000102030405060708090a0b0c0d0eff");
    }

    #[test]
    fn uuid_round_trip() {
        let g = Guid::from_uuid_str("67e55044-10b1-426f-9247-bb680e5fe0c8").expect("valid uuid");
        assert_eq!(&g.octets()[..4], &[0x67, 0xe5, 0x50, 0x44]);
        assert!(Guid::from_uuid_str("not-a-uuid").is_none());
    }
}
