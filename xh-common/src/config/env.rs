//! Environment variable parsing with type safety.
//!
//! Collects every malformed `XH_*` variable so a run can report all of them
//! at once instead of failing on the first.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the `XH_` prefix.
    pub fn new() -> Self {
        Self::with_prefix("XH_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Option<String> {
        match env::var(self.var_name(name)) {
            Ok(value) if value.is_empty() => None,
            Ok(value) => Some(value),
            Err(_) => None,
        }
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> String {
        self.get_optional_string(name)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a path value with `~` expansion.
    pub fn get_path(&mut self, name: &str, default: PathBuf) -> PathBuf {
        match self.get_optional_string(name) {
            Some(value) => expand_home(&value),
            None => default,
        }
    }

    /// Get a u64 value with default and range validation. Out-of-range and
    /// unparsable values fall back to the default and record an error.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> u64 {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(n) if (min..=max).contains(&n) => n,
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name,
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    default
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_env(key: &str, value: &str) {
        // SAFETY: env-mutating tests are serialized with #[serial]
        unsafe { env::set_var(key, value) };
    }

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: env-mutating tests are serialized with #[serial]
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_get_u64_range_valid() {
        set_env("XH_TEST_U64", "50");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_u64_range("TEST_U64", 10, 0, 100), 50);
        assert!(!parser.has_errors());
        cleanup_env(&["XH_TEST_U64"]);
    }

    #[test]
    #[serial]
    fn test_get_u64_range_out_of_range() {
        set_env("XH_TEST_U64_OOR", "200");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_u64_range("TEST_U64_OOR", 10, 0, 100), 10);
        assert!(matches!(
            parser.errors(),
            [EnvError::OutOfRange { var, .. }] if var == "XH_TEST_U64_OOR"
        ));
        cleanup_env(&["XH_TEST_U64_OOR"]);
    }

    #[test]
    #[serial]
    fn test_errors_are_collected() {
        set_env("XH_BAD_A", "abc");
        set_env("XH_BAD_B", "-1");
        let mut parser = EnvParser::new();
        parser.get_u64_range("BAD_A", 1, 0, 10);
        parser.get_u64_range("BAD_B", 1, 0, 10);
        assert_eq!(parser.take_errors().len(), 2);
        assert!(!parser.has_errors());
        cleanup_env(&["XH_BAD_A", "XH_BAD_B"]);
    }

    #[test]
    #[serial]
    fn test_get_optional_string_empty_is_none() {
        set_env("XH_TEST_EMPTY", "");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_optional_string("TEST_EMPTY"), None);
        assert_eq!(parser.get_string("TEST_EMPTY", "fallback"), "fallback");
        cleanup_env(&["XH_TEST_EMPTY"]);
    }

    #[test]
    fn test_expand_home_passthrough() {
        assert_eq!(expand_home("/tmp/results"), PathBuf::from("/tmp/results"));
        assert_eq!(expand_home("results"), PathBuf::from("results"));
    }
}
