//! Envelope commands.

use std::fmt::Write as _;

use theorydb_core::crypto::associated_data;

/// The associated data an envelope for `attribute` is sealed with, as text
/// or lowercase hex.
pub fn aad(attribute: &str, hex: bool) -> String {
    let bytes = associated_data(attribute);
    if !hex {
        return String::from_utf8_lossy(&bytes).into_owned();
    }
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form() {
        assert_eq!(aad("secret", false), "theorydb:encrypted:v1|attr=secret");
    }

    #[test]
    fn hex_form() {
        let hex = aad("a", true);
        assert!(hex.starts_with("7468656f7279"));
        assert!(hex.ends_with("3d61"));
    }
}
