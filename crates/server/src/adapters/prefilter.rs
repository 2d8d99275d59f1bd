//! Prefilter adapter (spec.md §4.8). Consumes the structured query and the
//! corpus config and returns either a SQL fragment (a sub-SELECT narrowing
//! the row space via a full-text vector) or the empty string; a non-empty
//! fragment is inserted verbatim into the generated SQL.

use serde_json::Value;

pub trait Prefilter: Send + Sync {
    fn build(&self, structured_query: &Value, corpus_config: &Value) -> String;
}

/// Stands in for the real full-text-vector prefilter (out of scope: the
/// engine doesn't parse query DSLs, so it can't derive prefilter fragments
/// from a structured query on its own). Always declines.
#[derive(Debug, Default)]
pub struct NoopPrefilter;

impl Prefilter for NoopPrefilter {
    fn build(&self, _structured_query: &Value, _corpus_config: &Value) -> String {
        String::new()
    }
}

/// Removes a fragment that is a strict, whitespace-bearing substring of
/// another surviving fragment, then joins what's left with `& ` in sorted
/// order. This is the substring-dedup pass the original source marks as
/// "not sure if needed anymore" — kept opt-in and default-off (Open
/// Question 3 in DESIGN.md) rather than applied unconditionally.
///
/// A real `Prefilter` implementation that builds fragments per conjunct
/// should run them through this before joining, but only when explicitly
/// asked to.
pub fn finalise_prefilters(fragments: &[String]) -> String {
    let trimmed: Vec<String> = fragments.iter().map(|s| s.trim().to_string()).collect();

    let mut removable = vec![false; trimmed.len()];
    for (ix, s) in trimmed.iter().enumerate() {
        let dominated = trimmed
            .iter()
            .any(|other| other != s && other.contains(s.as_str()) && (other.contains(' ') || other.contains('\n')));
        if dominated {
            removable[ix] = true;
        }
    }

    let mut survivors: Vec<&String> = trimmed
        .iter()
        .enumerate()
        .filter(|(ix, _)| !removable[*ix])
        .map(|(_, s)| s)
        .collect();
    survivors.sort();
    survivors.dedup();

    survivors.into_iter().cloned().collect::<Vec<_>>().join(" & ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_prefilter_always_declines() {
        let prefilter = NoopPrefilter;
        let result = prefilter.build(&serde_json::json!({"q": 1}), &serde_json::json!({}));
        assert_eq!(result, "");
    }

    #[test]
    fn finalise_drops_fragment_dominated_by_a_longer_one() {
        let fragments = vec!["cat".to_string(), "the cat sat".to_string()];
        assert_eq!(finalise_prefilters(&fragments), "the cat sat");
    }

    #[test]
    fn finalise_keeps_fragments_that_are_not_substrings() {
        let fragments = vec!["cat".to_string(), "dog".to_string()];
        assert_eq!(finalise_prefilters(&fragments), "cat & dog");
    }

    #[test]
    fn finalise_is_idempotent_on_its_own_output() {
        let fragments = vec!["zebra".to_string(), "apple".to_string()];
        let once = finalise_prefilters(&fragments);
        let twice = finalise_prefilters(&once.split(" & ").map(String::from).collect::<Vec<_>>());
        assert_eq!(once, twice);
    }
}
