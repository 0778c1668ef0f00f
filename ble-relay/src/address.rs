//! Hardware address normalization.
//!
//! Addresses are compared and stored as lowercase hex with separators removed, so
//! `AA:BB:CC:DD:EE:FF` becomes `aabbccddeeff`.

const SEPARATORS: [char; 2] = [':', '-'];

/// Lowercases the given hardware address and strips any separators from it.
pub fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| !SEPARATORS.contains(c))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_colon_separated() {
        assert_eq!(normalize_address("AA:BB:CC:DD:EE:FF"), "aabbccddeeff");
        assert_eq!(normalize_address("a4:c1:38:01:02:03"), "a4c138010203");
    }

    #[test]
    fn normalize_dash_separated() {
        assert_eq!(normalize_address("A4-C1-38-01-02-03"), "a4c138010203");
    }

    #[test]
    fn normalize_is_idempotent() {
        for address in [
            "AA:BB:CC:DD:EE:FF",
            "aabbccddeeff",
            "A4-c1:38-0A:0b-0C",
            "",
            "not an address",
        ] {
            let once = normalize_address(address);
            assert_eq!(normalize_address(&once), once);
        }
    }
}
