//! Priority-tagged log line storage.
//!
//! Every logger owns a [`LineBuffer`]. Lines keep their insertion order and
//! carry a numeric priority: the message severities used by tasks, plus the
//! stdout/stderr channels of captured processes. Rendering filters by a
//! priority range.

use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;

/// Line priorities. Lower values are more severe.
pub mod priority {
    pub const ERR: i32 = 0;
    pub const WARN: i32 = 1;
    pub const INFO: i32 = 2;
    pub const VERBOSE: i32 = 3;
    pub const DEBUG: i32 = 4;
    /// Complete line read from a process's standard output.
    pub const STDOUT: i32 = 10;
    /// Complete line read from a process's standard error.
    pub const STDERR: i32 = 11;
    /// Unterminated trailing stdout line, continued by the next read.
    pub const STDOUT_PARTIAL: i32 = 12;
    /// Unterminated trailing stderr line, continued by the next read.
    pub const STDERR_PARTIAL: i32 = 13;

    /// Short label used in reports.
    pub fn label(priority: i32) -> &'static str {
        match priority {
            ERR => "error",
            WARN => "warning",
            INFO => "info",
            VERBOSE => "verbose",
            DEBUG => "debug",
            STDOUT | STDOUT_PARTIAL => "stdout",
            STDERR | STDERR_PARTIAL => "stderr",
            _ => "other",
        }
    }
}

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("valid ANSI regex")
});

/// Remove ANSI control sequences from `text`.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// One logged line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    priority: i32,
    text: String,
}

impl LogLine {
    pub fn new(priority: i32, text: impl Into<String>) -> Self {
        Self {
            priority,
            text: text.into(),
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The text without ANSI control sequences.
    pub fn stripped(&self) -> String {
        strip_ansi(&self.text)
    }
}

/// Rendering options for [`LineBuffer::render`].
#[derive(Debug, Clone)]
pub struct Render {
    min: i32,
    max: i32,
    separator: String,
    prefix: Option<String>,
    strip_ansi: bool,
    tail: Option<usize>,
}

impl Render {
    /// Render lines with `min <= priority <= max`.
    pub fn range(min: i32, max: i32) -> Self {
        Self {
            min,
            max,
            separator: "\n".to_string(),
            prefix: None,
            strip_ansi: false,
            tail: None,
        }
    }

    /// Render lines of exactly one priority.
    pub fn priority(priority: i32) -> Self {
        Self::range(priority, priority)
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Prepend `prefix` to every rendered line.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn stripped(mut self) -> Self {
        self.strip_ansi = true;
        self
    }

    /// Only consider the last `lines` matching lines.
    pub fn tail(mut self, lines: usize) -> Self {
        self.tail = Some(lines);
        self
    }

    fn accepts(&self, line: &LogLine) -> bool {
        line.priority >= self.min && line.priority <= self.max
    }
}

/// Ordered, priority-tagged line store.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    default_priority: i32,
    lines: Vec<LogLine>,
}

/// A buffer shared between a logger and the threads feeding it.
pub type SharedBuffer = Arc<Mutex<LineBuffer>>;

/// Split on CR, LF, CRLF and FF. Returns the segments and whether the last
/// one was terminated by a separator. A trailing separator never yields an
/// extra empty segment.
fn split_physical(text: &str) -> (Vec<&str>, bool) {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                segments.push(&text[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            b'\n' | 0x0c => {
                segments.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    let terminated = start == bytes.len();
    if !terminated {
        segments.push(&text[start..]);
    }
    (segments, terminated)
}

impl LineBuffer {
    pub fn new(default_priority: i32) -> Self {
        Self {
            default_priority,
            lines: Vec::new(),
        }
    }

    /// A new buffer wrapped for sharing with output pumps.
    pub fn shared(default_priority: i32) -> SharedBuffer {
        Arc::new(Mutex::new(Self::new(default_priority)))
    }

    pub fn default_priority(&self) -> i32 {
        self.default_priority
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append `text` at the default priority.
    pub fn log(&mut self, text: &str) {
        self.log_line(self.default_priority, text);
    }

    /// Append `text`, one [`LogLine`] per physical line.
    pub fn log_line(&mut self, priority: i32, text: &str) {
        let (segments, _) = split_physical(text);
        self.lines
            .extend(segments.into_iter().map(|s| LogLine::new(priority, s)));
    }

    /// Stitch a chunk of streamed output onto the buffer.
    ///
    /// The first segment continues the stream's open line (tagged `source`)
    /// if there is one. Terminated segments are stored as `target`;
    /// an unterminated final segment stays open under `source`.
    pub fn merge_line(&mut self, target: i32, source: i32, text: &str) {
        if text.is_empty() {
            return;
        }
        let (segments, terminated) = split_physical(text);
        let count = segments.len();
        for (index, segment) in segments.into_iter().enumerate() {
            let closed = index + 1 < count || terminated;
            let priority = if closed { target } else { source };
            let open = if index == 0 && source != target {
                self.open_line(source)
            } else {
                None
            };
            match open {
                Some(position) => {
                    let joined = format!("{}{}", self.lines[position].text, segment);
                    self.lines[position] = LogLine::new(priority, joined);
                }
                None => self.lines.push(LogLine::new(priority, segment)),
            }
        }
    }

    /// Close a still-open line left by [`merge_line`](Self::merge_line).
    pub fn close_partial(&mut self, target: i32, source: i32) {
        if let Some(position) = self.open_line(source) {
            let text = std::mem::take(&mut self.lines[position].text);
            self.lines[position] = LogLine::new(target, text);
        }
    }

    /// Position of the open line for a stream. Only unterminated segments
    /// carry the `source` priority, so there is at most one.
    fn open_line(&self, source: i32) -> Option<usize> {
        self.lines.iter().rposition(|l| l.priority == source)
    }

    /// Append the lines of `other` whose priority lies in `min..=max`.
    pub fn merge_from(&mut self, other: &LineBuffer, min: i32, max: i32) {
        self.lines.extend(
            other
                .lines
                .iter()
                .filter(|l| l.priority >= min && l.priority <= max)
                .cloned(),
        );
    }

    /// Lowest priority present; `i32::MAX` when empty.
    pub fn min_priority(&self) -> i32 {
        self.lines.iter().map(|l| l.priority).min().unwrap_or(i32::MAX)
    }

    /// Highest priority present; `i32::MIN` when empty.
    pub fn max_priority(&self) -> i32 {
        self.lines.iter().map(|l| l.priority).max().unwrap_or(i32::MIN)
    }

    pub fn render(&self, options: &Render) -> String {
        let matching: Vec<&LogLine> = self.lines.iter().filter(|l| options.accepts(l)).collect();
        let skip = options
            .tail
            .map(|n| matching.len().saturating_sub(n))
            .unwrap_or(0);
        matching[skip..]
            .iter()
            .map(|line| {
                let text = if options.strip_ansi {
                    line.stripped()
                } else {
                    line.text.clone()
                };
                match options.prefix.as_deref() {
                    Some(prefix) => format!("{prefix}{text}"),
                    None => text,
                }
            })
            .collect::<Vec<_>>()
            .join(&options.separator)
    }

    /// Lines in `min..=max` joined by `\n`.
    pub fn text(&self, min: i32, max: i32) -> String {
        self.render(&Render::range(min, max))
    }

    pub fn to_array(&self, min: i32, max: i32) -> Vec<LogLine> {
        self.lines
            .iter()
            .filter(|l| l.priority >= min && l.priority <= max)
            .cloned()
            .collect()
    }

    pub fn to_string_array(&self, min: i32, max: i32) -> Vec<String> {
        self.to_array(min, max)
            .into_iter()
            .map(|l| l.text)
            .collect()
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(priority::INFO)
    }
}
