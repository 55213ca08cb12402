//! End-of-run summary printed by `xh run`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use xh_common::project::{BuildListener, TaskEvent};
use xh_common::{HarnessError, TaskKind};

/// Test case outcomes of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestCounts {
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub skipped: usize,
}

impl TestCounts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.warnings + self.skipped
    }

    fn record(&mut self, error: Option<&HarnessError>) {
        match error {
            None => self.passed += 1,
            Some(e) if e.is_pattern_skip() => {}
            Some(e) if e.is_skip() => self.skipped += 1,
            Some(e) if e.is_warning() => self.warnings += 1,
            Some(_) => self.failed += 1,
        }
    }
}

/// Listener counting finished test cases. Deselected cases are not counted.
#[derive(Debug, Default)]
pub struct TestCounter {
    counts: Mutex<TestCounts>,
}

impl TestCounter {
    pub fn counts(&self) -> TestCounts {
        *self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BuildListener for TestCounter {
    fn task_finished(&self, event: &TaskEvent<'_>) {
        if event.task.kind() == TaskKind::TestCase {
            self.counts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .record(event.error);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub harness: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results_dir: PathBuf,
    pub tests: TestCounts,
}

impl RunSummary {
    pub fn new(
        harness: impl Into<String>,
        started_at: DateTime<Utc>,
        results_dir: PathBuf,
        tests: TestCounts,
        result: &Result<(), HarnessError>,
    ) -> Self {
        let elapsed = Utc::now().signed_duration_since(started_at);
        Self {
            harness: harness.into(),
            started_at,
            duration_ms: elapsed.num_milliseconds().max(0) as u64,
            passed: result.is_ok(),
            error: result.as_ref().err().map(HarnessError::message_chain),
            results_dir,
            tests,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASSED" } else { "FAILED" };
        writeln!(
            f,
            "{} {status} in {:.1}s",
            self.harness,
            self.duration_ms as f64 / 1000.0
        )?;
        writeln!(
            f,
            "  tests: {} total, {} passed, {} failed, {} warnings, {} skipped",
            self.tests.total(),
            self.tests.passed,
            self.tests.failed,
            self.tests.warnings,
            self.tests.skipped
        )?;
        if let Some(error) = &self.error {
            writeln!(f, "  error: {error}")?;
        }
        write!(f, "  results: {}", self.results_dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_ignore_deselected() {
        let mut counts = TestCounts::default();
        counts.record(None);
        counts.record(Some(&HarnessError::failed("boom")));
        counts.record(Some(&HarnessError::warning("meh")));
        counts.record(Some(&HarnessError::skipped("later")));
        counts.record(Some(&HarnessError::SkippedByPattern("a not selected".into())));
        assert_eq!(
            counts,
            TestCounts {
                passed: 1,
                failed: 1,
                warnings: 1,
                skipped: 1
            }
        );
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_failed_summary_text() {
        let result = Err(HarnessError::failed("Testcase login failed"));
        let summary = RunSummary::new(
            "smoke",
            Utc::now(),
            PathBuf::from("results"),
            TestCounts::default(),
            &result,
        );
        let text = summary.to_string();
        assert!(text.starts_with("smoke FAILED"), "{text}");
        assert!(text.contains("error: Testcase login failed"), "{text}");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["passed"], false);
        assert_eq!(json["tests"]["failed"], 0);
    }
}
