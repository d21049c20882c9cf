//! Search guard
//!
//! Per-conversation rate limiter and near-duplicate detector protecting the
//! web-search capability from runaway invocation. Three checks, in order:
//! raw query length, session-lifetime cap, and token-set similarity against
//! every earlier query in the same conversation.

use crate::error::GuardReason;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

/// Filler and quantifier words stripped before similarity comparison, so a
/// reworded query with the same substance still matches.
const STOP_WORDS: &[&str] = &[
    "帮我", "请问", "查一下", "查查", "搜一下", "搜索", "一下", "请", "那个", "这个", "什么",
    "哪些", "有没有", "的", "了", "吗", "呢", "啊", "the", "a", "an", "please", "search", "find",
    "some", "any", "about",
];

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Max guarded invocations per session lifetime.
    pub max_searches: usize,
    /// Token-set Jaccard similarity at or above which a query is rejected.
    pub similarity_threshold: f64,
    /// Max raw query length in characters.
    pub max_query_chars: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_searches: 3,
            similarity_threshold: 0.7,
            max_query_chars: 30,
        }
    }
}

/// Guard state: per conversation, the normalized queries already allowed.
pub struct SearchGuard {
    config: GuardConfig,
    history: DashMap<String, Vec<(String, DateTime<Utc>)>>,
}

impl SearchGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            history: DashMap::new(),
        }
    }

    /// Check a query against the guard policy and, on allow, record it.
    pub fn check_and_record(
        &self,
        conversation_id: &str,
        query: &str,
    ) -> Result<(), GuardReason> {
        let chars = query.chars().count();
        if chars > self.config.max_query_chars {
            return Err(GuardReason::QueryTooLong {
                chars,
                max: self.config.max_query_chars,
            });
        }

        let normalized = normalize_query(query);
        let tokens = tokenize(&normalized);

        let mut entry = self
            .history
            .entry(conversation_id.to_string())
            .or_default();

        if entry.len() >= self.config.max_searches {
            return Err(GuardReason::CapReached {
                limit: self.config.max_searches,
            });
        }

        for (prior, _) in entry.iter() {
            let similarity = jaccard(&tokens, &tokenize(prior));
            if similarity >= self.config.similarity_threshold {
                tracing::debug!(
                    conversation_id,
                    query,
                    prior = prior.as_str(),
                    similarity,
                    "Rejecting near-duplicate search"
                );
                return Err(GuardReason::NearDuplicate { similarity });
            }
        }

        entry.push((normalized, Utc::now()));
        Ok(())
    }

    /// Forget a conversation's search history.
    pub fn clear(&self, conversation_id: &str) {
        self.history.remove(conversation_id);
    }

    /// Allowed searches so far for a conversation.
    pub fn count(&self, conversation_id: &str) -> usize {
        self.history
            .get(conversation_id)
            .map(|e| e.len())
            .unwrap_or(0)
    }
}

/// Casefold, strip stop words, collapse whitespace.
fn normalize_query(query: &str) -> String {
    let mut s = query.to_lowercase();
    for word in STOP_WORDS {
        s = s.replace(word, " ");
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token set: ASCII alphanumeric words plus individual CJK characters, so
/// re-segmented Chinese queries ("在售楼盘" vs "楼盘 在售") compare equal.
fn tokenize(normalized: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut word = String::new();
    for ch in normalized.chars() {
        if ch.is_ascii_alphanumeric() {
            word.push(ch);
        } else {
            if !word.is_empty() {
                tokens.insert(std::mem::take(&mut word));
            }
            if !ch.is_whitespace() {
                tokens.insert(ch.to_string());
            }
        }
    }
    if !word.is_empty() {
        tokens.insert(word);
    }
    tokens
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SearchGuard {
        SearchGuard::new(GuardConfig::default())
    }

    #[test]
    fn cap_is_enforced_per_conversation() {
        let g = guard();
        assert!(g.check_and_record("c1", "东莞 在售楼盘").is_ok());
        assert!(g.check_and_record("c1", "深圳 房价").is_ok());
        assert!(g.check_and_record("c1", "黄金 走势").is_ok());
        let err = g.check_and_record("c1", "白银 走势今日").unwrap_err();
        assert!(matches!(err, GuardReason::CapReached { limit: 3 }));
        // Other conversations are unaffected.
        assert!(g.check_and_record("c2", "白银 走势今日").is_ok());
    }

    #[test]
    fn reworded_query_is_rejected_as_duplicate() {
        let g = guard();
        assert!(g.check_and_record("c1", "东莞 在售楼盘").is_ok());
        let err = g.check_and_record("c1", "东莞 楼盘 在售").unwrap_err();
        assert!(matches!(err, GuardReason::NearDuplicate { .. }));
    }

    #[test]
    fn disjoint_query_is_allowed() {
        let g = guard();
        assert!(g.check_and_record("c1", "东莞 在售楼盘").is_ok());
        assert!(g.check_and_record("c1", "深圳 房价").is_ok());
    }

    #[test]
    fn stop_words_do_not_mask_duplicates() {
        let g = guard();
        assert!(g.check_and_record("c1", "深圳 房价").is_ok());
        let err = g.check_and_record("c1", "帮我查一下深圳的房价").unwrap_err();
        assert!(matches!(err, GuardReason::NearDuplicate { .. }));
    }

    #[test]
    fn overlong_query_is_rejected_without_recording() {
        let g = guard();
        let long = "楼".repeat(31);
        let err = g.check_and_record("c1", &long).unwrap_err();
        assert!(matches!(err, GuardReason::QueryTooLong { chars: 31, max: 30 }));
        assert_eq!(g.count("c1"), 0);
    }

    #[test]
    fn clear_resets_cap_and_history() {
        let g = guard();
        for q in ["a b", "c d", "e f"] {
            assert!(g.check_and_record("c1", q).is_ok());
        }
        assert!(g.check_and_record("c1", "g h").is_err());
        g.clear("c1");
        assert_eq!(g.count("c1"), 0);
        assert!(g.check_and_record("c1", "a b").is_ok());
    }

    #[test]
    fn rejected_queries_do_not_consume_the_cap() {
        let g = guard();
        assert!(g.check_and_record("c1", "深圳 房价").is_ok());
        assert!(g.check_and_record("c1", "深圳的房价").is_err());
        assert_eq!(g.count("c1"), 1);
    }
}
