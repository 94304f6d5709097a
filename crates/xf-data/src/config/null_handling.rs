//! Null token handling for loaded text

use serde::{Serialize, Deserialize};

/// Tokens read as SQL NULL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullConfig {
    pub patterns: Vec<String>,

    /// Trim whitespace before matching
    pub trim_whitespace: bool,

    pub case_sensitive: bool,
}

impl Default for NullConfig {
    fn default() -> Self {
        Self {
            patterns: ["", "-", "N/A", "null", "None"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            trim_whitespace: true,
            case_sensitive: false,
        }
    }
}

impl NullConfig {
    /// Check if a raw field should load as NULL
    pub fn is_null(&self, value: &str) -> bool {
        let value = if self.trim_whitespace { value.trim() } else { value };

        self.patterns.iter().any(|pattern| {
            if self.case_sensitive {
                value == pattern
            } else {
                value.eq_ignore_ascii_case(pattern)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tokens() {
        let config = NullConfig::default();
        assert!(config.is_null("  "));
        assert!(config.is_null("n/a"));
        assert!(config.is_null("NULL"));
        assert!(!config.is_null("0"));
        assert!(!config.is_null("Natural"));
        // Plausible real values, not placeholders
        assert!(!config.is_null("NA"));
        assert!(!config.is_null("NaN"));
    }
}
