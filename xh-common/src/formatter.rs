//! XML result records.
//!
//! One file per finished logger, named `<PREFIX><sanitized full name>.xml`
//! with a numeric suffix when the same name is written twice in a run.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::buffer::{LineBuffer, Render, priority};
use crate::error::{HarnessError, HarnessResult};

/// Result classification of a logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskType {
    OtherTask,
    ProcessTask,
    Service,
    TestGroup,
    TestCase,
    Xharness,
    Link,
    Start,
    Verify,
    Stop,
}

impl TaskType {
    /// File name prefix and element name of the record.
    pub fn layout(self) -> (&'static str, &'static str) {
        match self {
            Self::OtherTask | Self::ProcessTask | Self::Start | Self::Verify | Self::Stop => {
                ("TASK_", "task")
            }
            Self::Service => ("SVCS_", "service"),
            Self::TestGroup => ("GROUP_", "group"),
            Self::TestCase => ("TEST_", "test"),
            Self::Xharness => ("XHARNESS_", "xharness"),
            Self::Link => ("LNK_", "link"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OtherTask => "OTHER_TASK",
            Self::ProcessTask => "PROCESS_TASK",
            Self::Service => "SERVICE",
            Self::TestGroup => "TESTGROUP",
            Self::TestCase => "TESTCASE",
            Self::Xharness => "XHARNESS",
            Self::Link => "LINK",
            Self::Start => "START",
            Self::Verify => "VERIFY",
            Self::Stop => "STOP",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Outcome {
    Passed,
    Failed,
    Warning,
    Skipped,
    Invalid,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Warning => "Warning",
            Self::Skipped => "Skipped",
            Self::Invalid => "Invalid",
        };
        f.write_str(s)
    }
}

/// Everything a result file carries.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub order: u64,
    pub elapsed: Duration,
    pub task_type: TaskType,
    pub parent: String,
    pub name: String,
    pub full_name: String,
    pub reference: Option<String>,
    pub owner: Option<String>,
    pub command: Option<String>,
    pub retval: Option<i32>,
    pub outcome: Outcome,
    pub description: String,
    pub output: LineBuffer,
}

#[derive(Serialize)]
struct XmlRecord<'a> {
    #[serde(rename = "@order")]
    order: u64,
    #[serde(rename = "@time")]
    time: String,
    #[serde(rename = "@type")]
    task_type: &'static str,
    #[serde(rename = "@parent")]
    parent: Cow<'a, str>,
    #[serde(rename = "@name")]
    name: Cow<'a, str>,
    #[serde(rename = "@fullname")]
    full_name: Cow<'a, str>,
    #[serde(rename = "@reference")]
    reference: Cow<'a, str>,
    #[serde(rename = "@owner", skip_serializing_if = "Option::is_none")]
    owner: Option<Cow<'a, str>>,
    #[serde(rename = "@retval", skip_serializing_if = "Option::is_none")]
    retval: Option<i32>,
    #[serde(rename = "@result")]
    result: String,
    #[serde(rename = "@description")]
    description: Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Cow<'a, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

fn is_xml_char(ch: char) -> bool {
    matches!(ch, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}')
        || ch >= '\u{10000}'
}

/// Drop characters XML 1.0 cannot represent, such as NUL, BEL or backspace.
pub fn xml_text(text: &str) -> Cow<'_, str> {
    if text.chars().all(is_xml_char) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&ch| is_xml_char(ch)).collect())
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Writes result records into one directory.
#[derive(Debug)]
pub struct ResultFormatter {
    dir: PathBuf,
    written: Mutex<HashSet<String>>,
}

impl ResultFormatter {
    /// Create the formatter, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            HarnessError::io(format!("creating results directory {}", dir.display()), e)
        })?;
        Ok(Self {
            dir,
            written: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn claim_file_name(&self, prefix: &str, full_name: &str) -> String {
        let base = format!("{prefix}{}", sanitize_file_component(full_name));
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        let mut candidate = format!("{base}.xml");
        let mut suffix = 0;
        while written.contains(&candidate) {
            suffix += 1;
            candidate = format!("{base}_{suffix}.xml");
        }
        written.insert(candidate.clone());
        candidate
    }

    /// Render `record` to XML.
    pub fn render(record: &ResultRecord) -> HarnessResult<String> {
        let (_, tag) = record.task_type.layout();
        let visible = |render: Render| {
            non_empty(xml_text(&record.output.render(&render.stripped())).into_owned())
        };
        let xml = XmlRecord {
            order: record.order,
            time: format!("{:.3}", record.elapsed.as_secs_f64()),
            task_type: record.task_type.as_str(),
            parent: xml_text(&record.parent),
            name: xml_text(&record.name),
            full_name: xml_text(&record.full_name),
            reference: xml_text(record.reference.as_deref().unwrap_or("")),
            owner: match record.task_type {
                TaskType::TestCase => Some(xml_text(record.owner.as_deref().unwrap_or(""))),
                _ => None,
            },
            retval: match record.task_type {
                TaskType::ProcessTask => record.retval,
                _ => None,
            },
            result: record.outcome.to_string(),
            description: xml_text(&record.description),
            command: match record.task_type {
                TaskType::ProcessTask => record.command.as_deref().map(xml_text),
                _ => None,
            },
            text: visible(Render::range(priority::ERR, priority::VERBOSE)),
            stdout: visible(Render::priority(priority::STDOUT)),
            stderr: visible(Render::priority(priority::STDERR)),
        };
        let body = quick_xml::se::to_string_with_root(tag, &xml)
            .map_err(|e| HarnessError::Internal(format!("serializing {tag} record: {e}")))?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}\n"))
    }

    /// Write `record` and return the file it landed in.
    pub fn write_results(&self, record: &ResultRecord) -> HarnessResult<PathBuf> {
        let (prefix, _) = record.task_type.layout();
        let xml = Self::render(record)?;
        let path = self.dir.join(self.claim_file_name(prefix, &record.full_name));
        fs::write(&path, xml)
            .map_err(|e| HarnessError::io(format!("writing {}", path.display()), e))?;
        tracing::debug!(
            path = %path.display(),
            result = %record.outcome,
            "Wrote result record"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(task_type: TaskType, full_name: &str) -> ResultRecord {
        ResultRecord {
            order: 3,
            elapsed: Duration::from_millis(1500),
            task_type,
            parent: "suite".to_string(),
            name: full_name.rsplit('/').next().unwrap_or(full_name).to_string(),
            full_name: full_name.to_string(),
            reference: None,
            owner: None,
            command: None,
            retval: None,
            outcome: Outcome::Passed,
            description: String::new(),
            output: LineBuffer::new(priority::INFO),
        }
    }

    #[test]
    fn test_sanitize_file_component() {
        assert_eq!(sanitize_file_component("suite/case one"), "suite_case_one");
        assert_eq!(sanitize_file_component("a.b-c_d"), "a.b-c_d");
        assert_eq!(sanitize_file_component("x:y*z"), "x_y_z");
    }

    #[test]
    fn test_testcase_record() {
        let dir = TempDir::new().unwrap();
        let formatter = ResultFormatter::new(dir.path()).unwrap();
        let mut rec = record(TaskType::TestCase, "suite/login");
        rec.owner = Some("John Doe".to_string());

        let path = formatter.write_results(&rec).unwrap();
        assert_eq!(path.file_name().unwrap(), "TEST_suite_login.xml");

        let xml = fs::read_to_string(&path).unwrap();
        assert!(xml.contains("<test "), "{xml}");
        assert!(xml.contains(r#"owner="John Doe""#), "{xml}");
        assert!(xml.contains(r#"result="Passed""#), "{xml}");
        assert!(xml.contains(r#"time="1.500""#), "{xml}");
        assert!(xml.contains(r#"fullname="suite/login""#), "{xml}");
    }

    #[test]
    fn test_process_record_has_command_and_retval() {
        let mut rec = record(TaskType::ProcessTask, "suite/server");
        rec.command = Some("sh -c 'exit 3'".to_string());
        rec.retval = Some(3);
        rec.outcome = Outcome::Failed;
        rec.output.log_line(priority::STDOUT, "listening");
        rec.output.log_line(priority::ERR, "boom");

        let xml = ResultFormatter::render(&rec).unwrap();
        assert!(xml.contains("<task "), "{xml}");
        assert!(xml.contains(r#"retval="3""#), "{xml}");
        assert!(xml.contains("<command>"), "{xml}");
        assert!(xml.contains("<stdout>listening</stdout>"), "{xml}");
        assert!(xml.contains("<text>boom</text>"), "{xml}");
        assert!(!xml.contains("owner="), "{xml}");
    }

    #[test]
    fn test_control_characters_are_dropped() {
        let mut rec = record(TaskType::ProcessTask, "suite/bell");
        rec.command = Some("printf '\x07'".to_string());
        rec.description = "Process bell\x00 failed".to_string();
        rec.output.log_line(priority::STDOUT, "a\x01b\x08c");
        rec.output.log_line(priority::STDERR, "tab\tkept");

        let xml = ResultFormatter::render(&rec).unwrap();
        assert!(
            !xml.chars().any(|ch| ch < ' ' && !matches!(ch, '\t' | '\n' | '\r')),
            "{xml:?}"
        );
        assert!(xml.contains("<stdout>abc</stdout>"), "{xml}");
        assert!(xml.contains("<stderr>tab\tkept</stderr>"), "{xml}");
        assert!(xml.contains(r#"description="Process bell failed""#), "{xml}");
    }

    #[test]
    fn test_xml_text_borrows_clean_input() {
        assert!(matches!(xml_text("plain text\n"), Cow::Borrowed(_)));
        assert_eq!(xml_text("x\u{FFFE}y\u{1F600}"), "xy\u{1F600}");
    }

    #[test]
    fn test_non_process_record_omits_retval() {
        let mut rec = record(TaskType::OtherTask, "suite/echo");
        rec.retval = Some(0);
        let xml = ResultFormatter::render(&rec).unwrap();
        assert!(!xml.contains("retval="), "{xml}");
    }

    #[test]
    fn test_name_collisions_get_suffixes() {
        let dir = TempDir::new().unwrap();
        let formatter = ResultFormatter::new(dir.path()).unwrap();
        let rec = record(TaskType::Service, "suite/db");

        let names: Vec<_> = (0..3)
            .map(|_| formatter.write_results(&rec).unwrap())
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["SVCS_suite_db.xml", "SVCS_suite_db_1.xml", "SVCS_suite_db_2.xml"]
        );
    }

    #[test]
    fn test_prefix_map() {
        assert_eq!(TaskType::Start.layout(), ("TASK_", "task"));
        assert_eq!(TaskType::TestGroup.layout(), ("GROUP_", "group"));
        assert_eq!(TaskType::Xharness.layout(), ("XHARNESS_", "xharness"));
        assert_eq!(TaskType::Link.layout(), ("LNK_", "link"));
    }

    #[test]
    fn test_unwritable_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let err = ResultFormatter::new(blocker.join("results")).unwrap_err();
        assert!(matches!(err, HarnessError::Io { .. }), "{err:?}");
    }
}
