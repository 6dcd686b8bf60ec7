//! # Stop-Word Filter
//! Combines the global word list with the stop-words of every active group
//! containing a source. Matching is lower-cased substring containment; a hit
//! drops the post before it is persisted or counted.

use std::collections::HashSet;

use crate::model::{SourceGroup, SourceId};

#[derive(Debug, Clone, Default)]
pub struct StopWordSet {
    words: HashSet<String>,
}

impl StopWordSet {
    /// Build the effective set for one source: global words plus the words of
    /// every *active* group listing that source. Lower-cased, deduplicated.
    pub fn for_source(global: &[String], groups: &[SourceGroup], source_id: &SourceId) -> Self {
        let mut words: HashSet<String> = HashSet::new();
        for w in global {
            let w = w.trim().to_lowercase();
            if !w.is_empty() {
                words.insert(w);
            }
        }
        for g in groups {
            if !g.active || !g.source_ids.contains(source_id) {
                continue;
            }
            for w in &g.stop_words {
                let w = w.trim().to_lowercase();
                if !w.is_empty() {
                    words.insert(w);
                }
            }
        }
        Self { words }
    }

    /// True when the lower-cased text contains any stop-word as a substring.
    pub fn matches(&self, text: &str) -> bool {
        if self.words.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.words.iter().any(|w| lower.contains(w.as_str()))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, active: bool, sources: &[&str], words: &[&str]) -> SourceGroup {
        SourceGroup {
            id: id.into(),
            name: id.into(),
            source_ids: sources.iter().map(|s| s.to_string()).collect(),
            stop_words: words.iter().map(|s| s.to_string()).collect(),
            active,
        }
    }

    #[test]
    fn combines_global_and_member_groups() {
        let global = vec!["Casino".to_string()];
        let groups = vec![
            group("g1", true, &["s1"], &["Crypto", " spam "]),
            group("g2", true, &["s2"], &["unrelated"]),
            group("g3", false, &["s1"], &["inactive-word"]),
        ];
        let set = StopWordSet::for_source(&global, &groups, &"s1".to_string());
        assert_eq!(set.len(), 3);
        assert!(set.matches("Best CRYPTO deals"));
        assert!(set.matches("visit our casino tonight"));
        assert!(!set.matches("inactive-word appears but its group is off"));
        assert!(!set.matches("plain text"));
    }

    #[test]
    fn inactive_group_words_are_ignored() {
        let groups = vec![group("g", false, &["s1"], &["blocked"])];
        let set = StopWordSet::for_source(&[], &groups, &"s1".to_string());
        assert!(!set.matches("blocked content"));
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let set = StopWordSet::for_source(&["Sale".to_string()], &[], &"s1".to_string());
        assert!(set.matches("WHOLESALE prices"));
    }

    #[test]
    fn empty_set_matches_nothing() {
        let set = StopWordSet::for_source(&[], &[], &"s1".to_string());
        assert!(!set.matches("anything at all"));
    }
}
