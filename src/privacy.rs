//! Sensitive-field classification and value masking.
//!
//! The aggregator asks a [`SensitiveFieldClassifier`] whether an `input`
//! record targets a secret-bearing field. Sensitive entries are never rejected
//! as duplicates and their values are masked before being committed.

use crate::config::PrivacyConfig;
use crate::types::{ActionKind, ActionRecord};
use glob::MatchOptions;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{trace, warn};

/// Mask written in place of a sensitive value
pub const MASKED_VALUE: &str = "••••••••";

lazy_static! {
    // Locators that carry the input type or autocomplete hint
    static ref SENSITIVE_LOCATOR: Regex = Regex::new(
        r#"(?i)(type\s*=\s*["']?password|autocomplete\s*=\s*["']?(cc-[a-z-]+|current-password|new-password|one-time-code))"#
    ).unwrap();
}

/// Decides whether a record targets a sensitive field
pub trait SensitiveFieldClassifier: Send + Sync {
    fn is_sensitive(&self, record: &ActionRecord) -> bool;
}

impl<F> SensitiveFieldClassifier for F
where
    F: Fn(&ActionRecord) -> bool + Send + Sync,
{
    fn is_sensitive(&self, record: &ActionRecord) -> bool {
        self(record)
    }
}

/// Default classifier: producer hint, locator hints, then configured globs
pub struct PrivacyFilter {
    config: PrivacyConfig,
    /// Compiled patterns for sensitive subjects
    patterns: Vec<glob::Pattern>,
}

impl PrivacyFilter {
    /// Create a new privacy filter with the given configuration
    pub fn new(config: PrivacyConfig) -> Self {
        let patterns = config
            .sensitive_patterns
            .iter()
            .filter_map(|pattern| {
                glob::Pattern::new(pattern)
                    .map_err(|e| {
                        warn!("Invalid sensitive field pattern '{}': {}", pattern, e);
                        e
                    })
                    .ok()
            })
            .collect();

        Self { config, patterns }
    }

    /// Whether committed values of sensitive fields should be masked
    pub fn masks_values(&self) -> bool {
        self.config.mask_sensitive_values
    }

    /// Check a subject locator against the locator hints and configured patterns
    pub fn is_sensitive_subject(&self, subject_path: &str) -> bool {
        if SENSITIVE_LOCATOR.is_match(subject_path) {
            trace!("Subject '{}' carries a sensitive input hint", subject_path);
            return true;
        }

        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };
        for pattern in &self.patterns {
            if pattern.matches_with(subject_path, options) {
                trace!("Subject '{}' matched sensitive pattern '{}'", subject_path, pattern);
                return true;
            }
        }

        false
    }
}

impl Default for PrivacyFilter {
    fn default() -> Self {
        Self::new(PrivacyConfig::default())
    }
}

impl SensitiveFieldClassifier for PrivacyFilter {
    fn is_sensitive(&self, record: &ActionRecord) -> bool {
        if record.kind != ActionKind::Input {
            return false;
        }
        if record.sensitive {
            return true;
        }
        record
            .subject_path
            .as_deref()
            .map(|subject| self.is_sensitive_subject(subject))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(subject: &str) -> ActionRecord {
        ActionRecord::new(ActionKind::Input, "https://example.com").with_subject(subject)
    }

    #[test]
    fn test_password_subject_is_sensitive() {
        let filter = PrivacyFilter::default();
        assert!(filter.is_sensitive(&input("form > input#Password")));
        assert!(filter.is_sensitive(&input("input[name=card_number]")));
        assert!(filter.is_sensitive(&input(r#"input[type="password"]"#)));
        assert!(filter.is_sensitive(&input(r#"input[autocomplete="cc-number"]"#)));
    }

    #[test]
    fn test_plain_subject_is_not_sensitive() {
        let filter = PrivacyFilter::default();
        assert!(!filter.is_sensitive(&input("input#email")));
        assert!(!filter.is_sensitive(&ActionRecord::new(ActionKind::Input, "https://example.com")));
    }

    #[test]
    fn test_default_patterns_need_a_word_boundary() {
        let filter = PrivacyFilter::default();
        assert!(filter.is_sensitive(&input("input#otp")));
        assert!(filter.is_sensitive(&input("input[name=sms_otp]")));
        assert!(filter.is_sensitive(&input("#one-time-code")));
        assert!(filter.is_sensitive(&input("#credit-card")));
        assert!(filter.is_sensitive(&input("input#user-ssn")));

        assert!(!filter.is_sensitive(&input("#footprint")));
        assert!(!filter.is_sensitive(&input("#discard-note")));
        assert!(!filter.is_sensitive(&input("input.classname")));
    }

    #[test]
    fn test_producer_hint_is_honoured() {
        let filter = PrivacyFilter::default();
        assert!(filter.is_sensitive(&input("input#pin").sensitive()));
    }

    #[test]
    fn test_only_input_records_are_sensitive() {
        let filter = PrivacyFilter::default();
        let click = ActionRecord::new(ActionKind::Click, "https://example.com")
            .with_subject("button#show-password");
        assert!(!filter.is_sensitive(&click));
    }

    #[test]
    fn test_custom_patterns() {
        let filter = PrivacyFilter::new(PrivacyConfig {
            sensitive_patterns: vec!["*iban*".to_string(), "[invalid".to_string()],
            mask_sensitive_values: false,
        });
        assert!(filter.is_sensitive(&input("input#IBAN")));
        assert!(!filter.is_sensitive(&input("input#password-hint-free")));
        assert!(!filter.masks_values());
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |record: &ActionRecord| record.value.as_deref() == Some("secret");
        let record = input("x").with_value("secret");
        assert!(classifier.is_sensitive(&record));
    }
}
