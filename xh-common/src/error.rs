//! Error taxonomy for harness runs.
//!
//! | Variant            | Class                                   |
//! |--------------------|-----------------------------------------|
//! | `Skipped`          | test intentionally not run              |
//! | `SkippedByPattern` | not selected by the run pattern         |
//! | `Warning`          | soft assertion failure                  |
//! | `Config`           | malformed nesting or attributes (fatal) |
//! | `Failed*`          | process/service/task failure            |
//! | `KillFailed`       | background process would not terminate  |
//! | `Io`               | filesystem failure (results, outputs)   |
//! | `Internal`         | anything else, reported as unknown      |

use std::sync::Arc;

/// Error type for all harness operations.
///
/// The type is `Clone` because failures are recorded on loggers and services
/// and re-raised later (for example a startup failure surfaced again at stop).
#[derive(Debug, Clone, thiserror::Error)]
pub enum HarnessError {
    #[error("{0}")]
    Failed(String),

    #[error("{message}")]
    FailedWithCause {
        message: String,
        #[source]
        cause: Box<HarnessError>,
    },

    #[error("{0}")]
    Warning(String),

    #[error("{0}")]
    Skipped(String),

    #[error("{0}")]
    SkippedByPattern(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kill failed: {0}")]
    KillFailed(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning(message.into())
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::Skipped(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap `cause` under a new message, keeping the chain for reports.
    pub fn wrap(message: impl Into<String>, cause: HarnessError) -> Self {
        Self::FailedWithCause {
            message: message.into(),
            cause: Box::new(cause),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// Any skip, including pattern skips.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped(_) | Self::SkippedByPattern(_))
    }

    pub fn is_pattern_skip(&self) -> bool {
        matches!(self, Self::SkippedByPattern(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }

    /// Failures raised by the build itself: everything except skips,
    /// warnings and internal errors.
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed(_)
                | Self::FailedWithCause { .. }
                | Self::Config(_)
                | Self::KillFailed(_)
                | Self::Io { .. }
        )
    }

    /// The bare message, without the variant decoration `Display` adds.
    pub fn message(&self) -> String {
        match self {
            Self::Failed(m)
            | Self::Warning(m)
            | Self::Skipped(m)
            | Self::SkippedByPattern(m)
            | Self::Internal(m) => m.clone(),
            Self::FailedWithCause { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Message followed by every nested cause, one per line.
    pub fn message_chain(&self) -> String {
        let mut out = self.message();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            out.push_str("\nCaused by: ");
            out.push_str(&cause.to_string());
            current = cause.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(HarnessError::skipped("x").is_skip());
        assert!(HarnessError::SkippedByPattern("x".into()).is_skip());
        assert!(HarnessError::SkippedByPattern("x".into()).is_pattern_skip());
        assert!(!HarnessError::skipped("x").is_pattern_skip());
        assert!(HarnessError::warning("w").is_warning());
        assert!(HarnessError::failed("f").is_build_failure());
        assert!(HarnessError::config("c").is_build_failure());
        assert!(!HarnessError::Internal("i".into()).is_build_failure());
        assert!(!HarnessError::warning("w").is_build_failure());
    }

    #[test]
    fn test_message_chain() {
        let err = HarnessError::wrap("outer", HarnessError::failed("inner"));
        assert_eq!(err.message(), "outer");
        assert_eq!(err.message_chain(), "outer\nCaused by: inner");
    }

    #[test]
    fn test_io_error_is_clone() {
        let err = HarnessError::io(
            "writing results",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let copy = err.clone();
        assert_eq!(copy.to_string(), "writing results: denied");
    }
}
