//! Canonical JSON encoding for handshake-signed structures.
//!
//! Signing must be reproducible byte-for-byte across implementations:
//! compact (no insignificant whitespace), fields in declaration order
//! (serde_json preserves struct field order as written), with the `sig`
//! field of whatever's being signed zeroed out first.

use crate::error::Result;
use serde::Serialize;

/// Encode `value` as compact JSON, the exact bytes a signature covers.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        b: u32,
        a: u32,
    }

    #[test]
    fn preserves_declaration_order() {
        let bytes = canonical_bytes(&Sample { b: 1, a: 2 }).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        assert_eq!(s, r#"{"b":1,"a":2}"#);
    }

    #[test]
    fn is_compact() {
        let bytes = canonical_bytes(&Sample { b: 1, a: 2 }).unwrap();
        assert!(!bytes.contains(&b' '));
        assert!(!bytes.contains(&b'\n'));
    }
}
