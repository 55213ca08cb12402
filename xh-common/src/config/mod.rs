//! Harness run configuration.
//!
//! Defaults are layered with `XH_*` environment variables by
//! [`HarnessConfig::from_env`]; the CLI layers its own flags on top.

pub mod env;

pub use env::{EnvError, EnvParser};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default name of the user property set to the first failure message.
pub const DEFAULT_ERROR_PROPERTY: &str = "xharness.failed";

/// Settings shared by every task in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory result records are written to.
    pub results_dir: PathBuf,
    /// Slash-separated selection pattern for test groups and cases.
    pub pattern: Option<String>,
    /// User property set to the first failure message.
    pub error_property: String,
    /// How long a background launch waits for an early exit.
    #[serde(with = "millis")]
    pub startup_grace: Duration,
    /// Default wait for a background process to exit on its own before it
    /// is forced.
    #[serde(with = "millis")]
    pub prekill_timeout: Duration,
    /// Default wait for a forced process to go away.
    #[serde(with = "millis")]
    pub postkill_timeout: Duration,
    /// Watchdog polling interval.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("xharness-results"),
            pattern: None,
            error_property: DEFAULT_ERROR_PROPERTY.to_string(),
            startup_grace: Duration::from_secs(1),
            prekill_timeout: Duration::ZERO,
            postkill_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `XH_*` variables. All malformed variables are
    /// reported together.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let defaults = Self::default();
        let mut parser = EnvParser::new();

        let config = Self {
            results_dir: parser.get_path("RESULTS_DIR", defaults.results_dir),
            pattern: parser.get_optional_string("PATTERN"),
            error_property: parser.get_string("ERROR_PROPERTY", &defaults.error_property),
            startup_grace: Duration::from_millis(parser.get_u64_range(
                "STARTUP_GRACE_MS",
                defaults.startup_grace.as_millis() as u64,
                0,
                600_000,
            )),
            prekill_timeout: Duration::from_secs(parser.get_u64_range(
                "PREKILL_TIMEOUT_SECS",
                defaults.prekill_timeout.as_secs(),
                0,
                86_400,
            )),
            postkill_timeout: Duration::from_secs(parser.get_u64_range(
                "POSTKILL_TIMEOUT_SECS",
                defaults.postkill_timeout.as_secs(),
                0,
                86_400,
            )),
            poll_interval: defaults.poll_interval,
        };

        if parser.has_errors() {
            Err(parser.take_errors())
        } else {
            Ok(config)
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.startup_grace, Duration::from_secs(1));
        assert_eq!(config.prekill_timeout, Duration::ZERO);
        assert_eq!(config.error_property, "xharness.failed");
        assert!(config.pattern.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        // SAFETY: env-mutating tests are serialized with #[serial]
        unsafe {
            std::env::set_var("XH_PATTERN", "suite/*/fast");
            std::env::set_var("XH_STARTUP_GRACE_MS", "250");
        }
        let config = HarnessConfig::from_env().expect("valid env");
        assert_eq!(config.pattern.as_deref(), Some("suite/*/fast"));
        assert_eq!(config.startup_grace, Duration::from_millis(250));
        // SAFETY: as above
        unsafe {
            std::env::remove_var("XH_PATTERN");
            std::env::remove_var("XH_STARTUP_GRACE_MS");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_reports_all_errors() {
        // SAFETY: env-mutating tests are serialized with #[serial]
        unsafe {
            std::env::set_var("XH_PREKILL_TIMEOUT_SECS", "soon");
            std::env::set_var("XH_POSTKILL_TIMEOUT_SECS", "later");
        }
        let errors = HarnessConfig::from_env().unwrap_err();
        assert_eq!(errors.len(), 2);
        // SAFETY: as above
        unsafe {
            std::env::remove_var("XH_PREKILL_TIMEOUT_SECS");
            std::env::remove_var("XH_POSTKILL_TIMEOUT_SECS");
        }
    }

    #[test]
    fn test_toml_style_deserialize_with_millis() {
        let json = r#"{"startup_grace": 500, "pattern": "a/b"}"#;
        let config: HarnessConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.startup_grace, Duration::from_millis(500));
        assert_eq!(config.pattern.as_deref(), Some("a/b"));
        assert_eq!(config.postkill_timeout, Duration::from_secs(5));
    }
}
