//! URL ignore rules
//!
//! Literals are exact matches looked up in a hash set; patterns are tried in
//! registration order and stop at the first hit.

use crate::error::{InspectorError, Result};
use regex::Regex;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    literals: HashSet<String>,
    patterns: Vec<Regex>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_literal(&mut self, url: impl Into<String>) {
        self.literals.insert(url.into());
    }

    /// Compile and add a pattern. An invalid pattern leaves the rules unchanged.
    pub fn add_pattern(&mut self, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|source| InspectorError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.patterns.push(regex);
        Ok(())
    }

    pub fn is_ignored(&self, url: &str) -> bool {
        self.literals.contains(url) || self.patterns.iter().any(|re| re.is_match(url))
    }

    pub fn literals(&self) -> impl Iterator<Item = &str> {
        self.literals.iter().map(String::as_str)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_is_exact_match() {
        let mut rules = IgnoreRules::new();
        rules.add_literal("https://example.com/a");

        assert!(rules.is_ignored("https://example.com/a"));
        assert!(!rules.is_ignored("https://example.com/a/b"));
        assert!(!rules.is_ignored("https://example.com/"));
    }

    #[test]
    fn repeated_literals_are_kept_once() {
        let mut rules = IgnoreRules::new();
        rules.add_literal("https://example.com/a");
        rules.add_literal("https://example.com/a");
        rules.add_literal("https://example.com/b");

        let mut literals: Vec<_> = rules.literals().collect();
        literals.sort_unstable();
        assert_eq!(literals, vec!["https://example.com/a", "https://example.com/b"]);
        assert_eq!(rules.patterns().count(), 0);
    }

    #[test]
    fn pattern_matches_anywhere_in_url() {
        let mut rules = IgnoreRules::new();
        rules.add_pattern(r"analytics\.").unwrap();

        assert!(rules.is_ignored("https://analytics.example.com/track"));
        assert!(!rules.is_ignored("https://api.example.com/track"));
    }

    #[test]
    fn invalid_pattern_is_rejected_without_side_effects() {
        let mut rules = IgnoreRules::new();
        let err = rules.add_pattern("(unclosed").unwrap_err();

        assert!(matches!(err, InspectorError::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
        assert!(rules.is_empty());
    }
}
