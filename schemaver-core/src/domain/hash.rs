//! Statement fingerprints
//!
//! A ledger row stores the fingerprint of the statement that produced it, so a
//! later build can tell whether its catalog still agrees with what was
//! deployed. Formatting is not part of the fingerprint: spaces, tabs and
//! newlines are dropped before digesting.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Length of an encoded fingerprint (32 byte digest, padded base64)
pub const HASH_LEN: usize = 44;

/// Remove every space, tab and newline character
pub fn normalize(statement: &str) -> String {
    statement
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\n'))
        .collect()
}

/// SHA-256 of the normalized statement, URL-safe base64 encoded
pub fn statement_hash(statement: &str) -> String {
    let digest = Sha256::digest(normalize(statement).as_bytes());
    URL_SAFE.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAME_1: &str = "hello\nmy name\t\tis earl";
    const SAME_2: &str = "hello my name is \tearl";
    const SAME_3: &str = "hellomynameisearl";
    const DIFFERENT: &str = "hellomynameisearly";

    #[test]
    fn test_whitespace_is_ignored() {
        assert_eq!(statement_hash(SAME_1), statement_hash(SAME_2));
        assert_eq!(statement_hash(SAME_2), statement_hash(SAME_3));
        assert_eq!(
            statement_hash("CREATE TABLE t (a INT)"),
            statement_hash("CREATE   TABLE\tt (a INT)\n")
        );
    }

    #[test]
    fn test_content_change_is_detected() {
        assert_ne!(statement_hash(SAME_3), statement_hash(DIFFERENT));
        assert_ne!(
            statement_hash("CREATE TABLE t (a INT)"),
            statement_hash("CREATE TABLE t (a BIGINT)")
        );
    }

    #[test]
    fn test_carriage_return_is_significant() {
        // Only space, tab and newline are normalized away
        assert_ne!(statement_hash("SELECT 1"), statement_hash("SELECT\r1"));
    }

    #[test]
    fn test_fixed_length_and_url_safe() {
        for input in ["", "a", "CREATE TABLE product (id INTEGER)", &"x".repeat(10_000)] {
            let hash = statement_hash(input);
            assert_eq!(hash.len(), HASH_LEN);
            assert!(!hash.contains('+') && !hash.contains('/'));
        }
    }

    #[test]
    fn test_known_digest() {
        // sha256("") in padded URL-safe base64
        assert_eq!(
            statement_hash(" \t\n"),
            "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }
}
