//! Correlation and message identifiers.
//!
//! The wire protocol wants a UUID-shaped correlation id with the hyphens
//! stripped out. Rather than pull in a dedicated UUID crate the agent
//! follows the same approach `mqtt_channel` uses for its random session
//! names: generate the random bits with `fastrand` and hex-encode them,
//! stamping in the version/variant nibbles so the result still *looks*
//! like a v4 UUID to anything logging it.

/// Generates a fresh correlation id: 32 lowercase hex characters, no hyphens.
///
/// An empty string is reserved to mean "no request in flight" (see
/// [`crate::operation::OperationContext`]), so this never returns one.
pub fn new_correlation_id() -> String {
    let mut bytes = [0u8; 16];
    for b in bytes.iter_mut() {
        *b = fastrand::u8(..);
    }
    // Version 4, variant 1, purely cosmetic but keeps the id recognisable.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let mut id = String::with_capacity(32);
    for b in bytes {
        id.push_str(&format!("{b:02x}"));
    }
    id
}

/// `true` for the sentinel value meaning "no request is currently in flight".
pub fn is_no_request_in_flight(correlation_id: &str) -> bool {
    correlation_id.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_32_lowercase_hex_chars() {
        let id = new_correlation_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn empty_string_means_no_request_in_flight() {
        assert!(is_no_request_in_flight(""));
        assert!(!is_no_request_in_flight(&new_correlation_id()));
    }

    #[test]
    fn ids_are_not_trivially_repeated() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
    }
}
