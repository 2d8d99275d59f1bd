//! Deterministic fingerprinting (spec.md §4.1): a job's cache key is a pure
//! function of its semantically significant inputs, never of wall-clock time
//! or process identity.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Fingerprint of a primary job: the generated SQL text alone.
pub fn fingerprint_primary(sql_text: &str) -> String {
    hash_hex(&sql_text)
}

/// Fingerprint of a sentence or metadata job: its own SQL text plus the
/// primary it depends on, the pagination window, and the full-corpus flag.
/// Equal fingerprints across requests imply interchangeable results
/// (spec.md §3 invariant), which is what makes cache replay (§4.1) sound.
pub fn fingerprint_dependent(
    sql_text: &str,
    dependency_fingerprint: &str,
    offset: i64,
    needed: i64,
    full: bool,
) -> String {
    hash_hex(&(sql_text, dependency_fingerprint, offset, needed, full))
}

fn hash_hex<T: Hash>(value: &T) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_fingerprint_is_deterministic() {
        let a = fingerprint_primary("SELECT 1");
        let b = fingerprint_primary("SELECT 1");
        assert_eq!(a, b);
    }

    #[test]
    fn primary_fingerprint_depends_only_on_sql_text() {
        let a = fingerprint_primary("SELECT 1 FROM a");
        let b = fingerprint_primary("SELECT 1 FROM b");
        assert_ne!(a, b);
    }

    #[test]
    fn dependent_fingerprint_is_sensitive_to_every_input() {
        let base = fingerprint_dependent("SELECT :ids", "parent-fp", 0, 100, false);
        assert_ne!(base, fingerprint_dependent("SELECT :ids", "other-fp", 0, 100, false));
        assert_ne!(base, fingerprint_dependent("SELECT :ids", "parent-fp", 1, 100, false));
        assert_ne!(base, fingerprint_dependent("SELECT :ids", "parent-fp", 0, 101, false));
        assert_ne!(base, fingerprint_dependent("SELECT :ids", "parent-fp", 0, 100, true));
    }

    #[test]
    fn equal_fingerprints_imply_equal_inputs_were_hashed() {
        let a = fingerprint_dependent("SELECT :ids", "fp", 10, -1, true);
        let b = fingerprint_dependent("SELECT :ids", "fp", 10, -1, true);
        assert_eq!(a, b);
    }
}
