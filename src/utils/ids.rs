//! Task and context id generation.
//!
//! Task and context ids are 16 random bytes rendered as lowercase hex, rather
//! than UUIDs — this crate reserves `uuid` for artifact and message ids,
//! where the `artifact-N`/message-id wire shape already carries its own
//! identity scheme.

use rand::RngCore;

/// Generate a new random id: 16 bytes of randomness, hex-encoded.
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_32_hex_chars() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_are_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }
}
