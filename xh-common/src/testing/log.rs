//! Structured logging for harness tests.
//!
//! [`init_test_logging`] installs a subscriber that writes compact output
//! through the test writer and, when a target directory is found, JSONL to
//! `target/test-logs/xh_tests.jsonl`.
//!
//! [`EventLog`] is a build listener that records task and message events of
//! a run so tests can assert on their order.
//!
//! # Environment Variables
//!
//! - `XH_TEST_LOG_LEVEL`: log level filter (default: `info`)
//! - `XH_TEST_LOG_FILE`: override the JSONL file path

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;

use crate::buffer::priority;
use crate::error::HarnessError;
use crate::project::{BuildListener, MessageEvent, Project, TaskEvent};

static LOGGING_INIT: Once = Once::new();

/// Install the test subscriber. Safe to call from every test.
pub fn init_test_logging() {
    LOGGING_INIT.call_once(|| {
        let file_layer = create_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let level = std::env::var("XH_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!("xh={level},xh_common={level}"))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_log_file() -> Option<std::fs::File> {
    if let Ok(custom) = std::env::var("XH_TEST_LOG_FILE") {
        if let Some(parent) = Path::new(&custom).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(custom).ok();
    }
    let dir = find_target_dir().join("test-logs");
    std::fs::create_dir_all(&dir).ok()?;
    std::fs::File::create(dir.join("xh_tests.jsonl")).ok()
}

fn find_target_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(dir);
    }
    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskStarted,
    TaskFinished,
    Message,
    BuildFinished,
}

/// One recorded build event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub kind: EventKind,
    /// Display name of the task, for task events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Message text, or the error of a failed task or build.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl EventEntry {
    fn new(kind: EventKind) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
            task: None,
            message: None,
            priority: None,
        }
    }
}

/// Build listener that keeps every event in memory.
#[derive(Default)]
pub struct EventLog {
    entries: Mutex<Vec<EventEntry>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: EventEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    pub fn entries(&self) -> Vec<EventEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Names of tasks in the order `kind` events were seen for them.
    pub fn tasks(&self, kind: EventKind) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.kind == kind)
            .filter_map(|e| e.task)
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.kind == EventKind::Message)
            .filter_map(|e| e.message)
            .collect()
    }

    /// Write the recorded events as JSON lines.
    pub fn write_jsonl(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        for entry in self.entries() {
            let json = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
            writeln!(file, "{json}")?;
        }
        Ok(())
    }
}

impl BuildListener for EventLog {
    fn task_started(&self, event: &TaskEvent<'_>) {
        let mut entry = EventEntry::new(EventKind::TaskStarted);
        entry.task = Some(event.task.display_name().to_string());
        self.push(entry);
    }

    fn task_finished(&self, event: &TaskEvent<'_>) {
        let mut entry = EventEntry::new(EventKind::TaskFinished);
        entry.task = Some(event.task.display_name().to_string());
        entry.message = event.error.map(HarnessError::message);
        self.push(entry);
    }

    fn message_logged(&self, event: &MessageEvent<'_>) {
        let mut entry = EventEntry::new(EventKind::Message);
        entry.message = Some(event.message.to_string());
        entry.priority = Some(priority::label(event.priority).to_string());
        self.push(entry);
    }

    fn build_finished(&self, _project: &Project, error: Option<&HarnessError>) {
        let mut entry = EventEntry::new(EventKind::BuildFinished);
        entry.message = error.map(HarnessError::message);
        self.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::info!("test logging initialized");
    }

    #[test]
    fn test_event_log_records_messages() {
        let project = Project::new("p", ".");
        let log = Arc::new(EventLog::new());
        project.add_build_listener(log.clone());
        project.fire_message_logged(priority::WARN, "careful");
        project.fire_build_finished(None);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].priority.as_deref(), Some("warning"));
        assert_eq!(log.messages(), vec!["careful"]);
        assert_eq!(entries[1].kind, EventKind::BuildFinished);
    }

    #[test]
    fn test_write_jsonl() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = EventLog::new();
        log.push(EventEntry::new(EventKind::Message));
        let path = dir.path().join("events.jsonl");
        log.write_jsonl(&path).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains(r#""kind":"message""#), "{text}");
    }
}
