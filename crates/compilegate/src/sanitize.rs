//! Source validation
//!
//! Untrusted source is checked before it reaches the compiler. The rules are a
//! heuristic denylist, so they sit behind the [`Sanitizer`] trait and can be
//! replaced wholesale.

use regex_lite::Regex;
use thiserror::Error;

use crate::config::{Config, ConfigError};

/// Patterns rejected by default: shell substitutions and piping into a shell
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    r"`[^`]*`",
    r"\$\([^)]*\)",
    r"\$\{[^}]*\}",
    r";\s*rm\s",
    r";\s*cat\s",
    r"\|\s*sh\b",
    r"\|\s*bash\b",
];

/// Reasons a source is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("Source code exceeds maximum length of {max} characters")]
    TooLong { max: usize },

    #[error("Source contains potentially malicious content")]
    Suspicious,
}

/// Validates and cleans raw source text
pub trait Sanitizer: Send + Sync {
    /// Return the cleaned source, or the reason it was refused
    fn sanitize(&self, source: &str) -> Result<String, SanitizeError>;
}

/// Length limit, NUL stripping and a case-insensitive regex denylist
#[derive(Debug, Clone)]
pub struct DenylistSanitizer {
    max_length: usize,
    patterns: Vec<Regex>,
}

impl DenylistSanitizer {
    /// Create a sanitizer with the default denylist
    pub fn new(max_length: usize) -> Self {
        let patterns = DEFAULT_DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect();
        Self {
            max_length,
            patterns,
        }
    }

    /// Create a sanitizer with a custom denylist
    pub fn with_patterns<I, S>(max_length: usize, patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(&format!("(?i){p}")).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            max_length,
            patterns,
        })
    }

    /// Build the sanitizer described by a config
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        match config.deny_patterns {
            Some(ref patterns) => Self::with_patterns(config.max_source_length, patterns),
            None => Ok(Self::new(config.max_source_length)),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Sanitizer for DenylistSanitizer {
    fn sanitize(&self, source: &str) -> Result<String, SanitizeError> {
        if source.chars().count() > self.max_length {
            return Err(SanitizeError::TooLong {
                max: self.max_length,
            });
        }

        let source = source.replace('\0', "");

        if self.patterns.iter().any(|re| re.is_match(&source)) {
            return Err(SanitizeError::Suspicious);
        }

        Ok(source)
    }
}
