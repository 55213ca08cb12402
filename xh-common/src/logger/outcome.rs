use crate::error::{HarnessError, HarnessResult};
use crate::formatter::Outcome;

const UNKNOWN_REASON: &str = "(unknown reason)";

fn or_unknown(message: String) -> String {
    if message.trim().is_empty() {
        UNKNOWN_REASON.to_string()
    } else {
        message
    }
}

/// Map a task result to the outcome and description of its record.
/// Pattern skips yield `None`: they are never recorded.
pub fn classify(result: &HarnessResult<()>) -> Option<(Outcome, String)> {
    let err = match result {
        Ok(()) => return Some((Outcome::Passed, String::new())),
        Err(err) => err,
    };
    let classified = match err {
        HarnessError::SkippedByPattern(_) => return None,
        HarnessError::Skipped(message) => (Outcome::Skipped, message.clone()),
        HarnessError::Warning(message) => (Outcome::Warning, or_unknown(message.clone())),
        HarnessError::Internal(_) => (Outcome::Failed, UNKNOWN_REASON.to_string()),
        other if other.is_build_failure() => (Outcome::Failed, or_unknown(other.message())),
        _ => (Outcome::Invalid, UNKNOWN_REASON.to_string()),
    };
    Some(classified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(&Ok(())), Some((Outcome::Passed, String::new())));
        assert_eq!(
            classify(&Err(HarnessError::SkippedByPattern("x".into()))),
            None
        );
        assert_eq!(
            classify(&Err(HarnessError::skipped("no db"))),
            Some((Outcome::Skipped, "no db".to_string()))
        );
        assert_eq!(
            classify(&Err(HarnessError::warning(""))),
            Some((Outcome::Warning, "(unknown reason)".to_string()))
        );
        assert_eq!(
            classify(&Err(HarnessError::wrap("Task t failed", HarnessError::failed("x")))),
            Some((Outcome::Failed, "Task t failed".to_string()))
        );
        assert_eq!(
            classify(&Err(HarnessError::Internal("lock".into()))),
            Some((Outcome::Failed, "(unknown reason)".to_string()))
        );
    }
}
