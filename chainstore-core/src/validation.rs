//! Account name validation.
//!
//! Names are dot-separated segments. Each segment starts with a lowercase
//! letter, ends with a letter or digit, contains only `[a-z0-9-]` and never
//! two dashes in a row. The full name is 3 to 63 characters; `allow_short`
//! lifts the 3-character minimum, which lookups use so short legacy names
//! still resolve.

use crate::error::ValidationError;

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 63;

pub fn validate_account_name(name: &str, allow_short: bool) -> Result<(), ValidationError> {
    let fail = |reason: &'static str| {
        Err(ValidationError::InvalidAccountName {
            value: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return fail("name is empty");
    }
    if !allow_short && name.len() < MIN_NAME_LEN {
        return fail("name is shorter than 3 characters");
    }
    if name.len() > MAX_NAME_LEN {
        return fail("name is longer than 63 characters");
    }

    for segment in name.split('.') {
        let bytes = segment.as_bytes();
        let Some((&first, _)) = bytes.split_first() else {
            return fail("name has an empty segment");
        };
        if !allow_short && bytes.len() < MIN_NAME_LEN {
            return fail("segment is shorter than 3 characters");
        }
        if !first.is_ascii_lowercase() {
            return fail("segment must start with a lowercase letter");
        }
        if !bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        {
            return fail("segment may only contain lowercase letters, digits and dashes");
        }
        if segment.contains("--") {
            return fail("segment contains consecutive dashes");
        }
        if bytes.last().is_some_and(|b| *b == b'-') {
            return fail("segment must end with a letter or digit");
        }
    }
    Ok(())
}

/// Convenience wrapper over [`validate_account_name`].
pub fn is_account_name(name: &str, allow_short: bool) -> bool {
    validate_account_name(name, allow_short).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["alice", "bob-2", "init0", "a1b.c-d.efg", "dev.null"] {
            assert!(is_account_name(name, false), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "Alice", "1alice", "ali--ce", "alice-", "al..ice", ".alice", "al_ice", "ab"] {
            assert!(!is_account_name(name, false), "{name:?} should be invalid");
        }
    }

    #[test]
    fn test_allow_short() {
        assert!(is_account_name("ab", true));
        assert!(is_account_name("a.b", true));
        assert!(!is_account_name("ab", false));
    }

    #[test]
    fn test_too_long() {
        let name = "a".repeat(64);
        assert!(!is_account_name(&name, true));
        assert!(is_account_name(&"a".repeat(63), false));
    }

    #[test]
    fn test_object_ids_are_not_names() {
        assert!(!is_account_name("1.2.100", true));
    }
}
