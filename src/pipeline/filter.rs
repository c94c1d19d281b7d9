//! Two-stage pattern filter applied to translated message text.
//!
//! A message is notification-worthy only when the primary pattern matches
//! and, after that, the secondary pattern matches the same text. Both are
//! compiled case-insensitive and search anywhere in the text.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::ConfigError;

/// Result of running a text through the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// The primary pattern did not match; the secondary was not evaluated.
    NoPrimaryMatch,
    /// The primary matched but the secondary did not.
    NoSecondaryMatch,
    /// Both patterns matched.
    Matched,
}

impl FilterOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoPrimaryMatch => "no_primary_match",
            Self::NoSecondaryMatch => "no_secondary_match",
            Self::Matched => "matched",
        }
    }
}

/// Primary and secondary matchers composed with logical AND.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    primary: Regex,
    secondary: Regex,
}

impl PatternFilter {
    /// Compile both patterns case-insensitively.
    pub fn new(primary: &str, secondary: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            primary: compile("PATTERN", primary)?,
            secondary: compile("SUB_PATTERN", secondary)?,
        })
    }

    pub fn evaluate(&self, text: &str) -> FilterOutcome {
        if !self.primary.is_match(text) {
            return FilterOutcome::NoPrimaryMatch;
        }
        if !self.secondary.is_match(text) {
            debug!(pattern = %self.secondary.as_str(), "Primary matched, secondary did not");
            return FilterOutcome::NoSecondaryMatch;
        }
        FilterOutcome::Matched
    }

    pub fn matches(&self, text: &str) -> bool {
        self.evaluate(text) == FilterOutcome::Matched
    }
}

fn compile(key: &str, pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::InvalidPattern {
            key: key.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> PatternFilter {
        PatternFilter::new("flood|storm", r"elm\s+st").unwrap()
    }

    #[test]
    fn both_patterns_match() {
        assert_eq!(
            filter().evaluate("Flood warning near Elm St"),
            FilterOutcome::Matched
        );
    }

    #[test]
    fn primary_only_is_rejected() {
        let outcome = filter().evaluate("flood warning on Main Ave");
        assert_eq!(outcome, FilterOutcome::NoSecondaryMatch);
        assert!(!filter().matches("flood warning on Main Ave"));
    }

    #[test]
    fn secondary_only_is_rejected() {
        assert_eq!(
            filter().evaluate("road works on Elm St"),
            FilterOutcome::NoPrimaryMatch
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(filter().matches("STORM approaching ELM   ST"));
    }

    #[test]
    fn search_is_unanchored() {
        let filter = PatternFilter::new("alert", "district 9").unwrap();
        assert!(filter.matches("Evening update: air alert lifted in District 9."));
    }

    #[test]
    fn invalid_secondary_reports_its_key() {
        let err = PatternFilter::new("ok", "[unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { ref key, .. } if key == "SUB_PATTERN"));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(FilterOutcome::Matched.label(), "matched");
        assert_eq!(FilterOutcome::NoPrimaryMatch.label(), "no_primary_match");
    }
}
