//! Per-address block state and configured ban rules.

use std::collections::HashSet;

use domains::SourceAddr;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("invalid banned address pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Owned by the live store and mutated only through its admin operations.
#[derive(Debug, Default, Clone)]
pub struct ModerationRecord {
    blocked: HashSet<SourceAddr>,
    /// Evaluated in order against the textual address.
    address_rules: Vec<Regex>,
    banned_words: Vec<String>,
}

impl ModerationRecord {
    /// Compiles the configured rules; patterns are validated once here so the
    /// request path never compiles a regex.
    pub fn from_rules<P, W>(address_patterns: P, banned_words: W) -> Result<Self, ModerationError>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        W: IntoIterator,
        W::Item: Into<String>,
    {
        let address_rules = address_patterns
            .into_iter()
            .map(|p| {
                let pattern = p.as_ref();
                Regex::new(pattern).map_err(|source| ModerationError::BadPattern {
                    pattern: pattern.to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            blocked: HashSet::new(),
            address_rules,
            banned_words: banned_words
                .into_iter()
                .map(Into::<String>::into)
                .filter(|w| !w.is_empty())
                .collect(),
        })
    }

    /// Returns `false` if the address was already blocked.
    pub fn block(&mut self, addr: SourceAddr) -> bool {
        self.blocked.insert(addr)
    }

    /// Returns `false` if the address was not blocked.
    pub fn unblock(&mut self, addr: SourceAddr) -> bool {
        self.blocked.remove(&addr)
    }

    pub fn is_blocked(&self, addr: SourceAddr) -> bool {
        if self.is_exact_blocked(addr) {
            return true;
        }
        if self.address_rules.is_empty() {
            return false;
        }
        let text = addr.to_string();
        self.address_rules.iter().any(|rule| rule.is_match(&text))
    }

    pub fn is_message_blocked(&self, message: &str) -> bool {
        self.banned_words.iter().any(|w| message.contains(w.as_str()))
    }

    /// Exact block set only; address patterns are not consulted.
    pub fn is_exact_blocked(&self, addr: SourceAddr) -> bool {
        self.blocked.contains(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SourceAddr {
        s.parse().unwrap()
    }

    #[test]
    fn exact_block_and_unblock() {
        let mut record = ModerationRecord::default();
        assert!(record.block(addr("10.1.1.1")));
        assert!(!record.block(addr("10.1.1.1")));
        assert!(record.is_blocked(addr("10.1.1.1")));
        assert!(record.is_exact_blocked(addr("10.1.1.1")));
        assert!(!record.is_blocked(addr("10.1.1.2")));
        assert!(record.unblock(addr("10.1.1.1")));
        assert!(!record.is_blocked(addr("10.1.1.1")));
    }

    #[test]
    fn patterns_match_textual_address() {
        let record = ModerationRecord::from_rules([r"^192\.168\.", r"^2001:db8:"], Vec::<String>::new()).unwrap();
        assert!(record.is_blocked(addr("192.168.4.4")));
        assert!(record.is_blocked(addr("2001:db8::7")));
        assert!(!record.is_exact_blocked(addr("192.168.4.4")));
        assert!(!record.is_blocked(addr("172.16.0.1")));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = ModerationRecord::from_rules(["(unclosed"], Vec::<String>::new()).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }

    #[test]
    fn banned_words_are_substrings() {
        let record = ModerationRecord::from_rules(Vec::<String>::new(), ["casino", ""]).unwrap();
        assert!(record.is_message_blocked("best online casino here"));
        assert!(!record.is_message_blocked("hello"));
    }
}
