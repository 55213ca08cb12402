use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::buffer::{LogLine, priority};
use crate::error::{HarnessError, HarnessResult};
use crate::registry::TaskRegistry;
use crate::task::Task;

/// Which lines of a logger an output condition looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
    /// Messages logged by the task (error through debug).
    Log,
}

impl Stream {
    fn accepts(self, line: &LogLine) -> bool {
        let p = line.priority();
        match self {
            Self::Stdout => p == priority::STDOUT || p == priority::STDOUT_PARTIAL,
            Self::Stderr => p == priority::STDERR || p == priority::STDERR_PARTIAL,
            Self::Log => (priority::ERR..=priority::DEBUG).contains(&p),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
            Self::Log => f.write_str("log"),
        }
    }
}

/// A condition checked by [`Assert`].
#[derive(Debug, Clone)]
pub enum Condition {
    PropertyEquals {
        name: String,
        value: String,
    },
    ProcessRunning(String),
    /// Output of a sibling task contains `text`. `task` is a positional or
    /// named lookup in the enclosing container; the latest sibling when
    /// unset. `tail` restricts the search to the last lines.
    OutputContains {
        task: Option<String>,
        text: String,
        stream: Stream,
        tail: Option<usize>,
    },
    FileExists(PathBuf),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn evaluate(&self, registry: &TaskRegistry) -> HarnessResult<bool> {
        let project = registry.project();
        match self {
            Self::PropertyEquals { name, value } => {
                Ok(project.property(name).as_deref() == Some(project.expand(value).as_str()))
            }
            Self::ProcessRunning(name) => Ok(registry
                .processes()
                .get(&project.expand(name))
                .is_ok_and(|p| p.is_running())),
            Self::OutputContains {
                task,
                text,
                stream,
                tail,
            } => {
                let logger = registry.get_logger(task.as_deref()).ok_or_else(|| {
                    HarnessError::config(format!(
                        "no task '{}' to inspect",
                        task.as_deref().unwrap_or("")
                    ))
                })?;
                let buffer = logger.buffer.lock().unwrap_or_else(|e| e.into_inner());
                let lines: Vec<String> = buffer
                    .lines()
                    .iter()
                    .filter(|l| stream.accepts(l))
                    .map(LogLine::stripped)
                    .collect();
                let skip = tail.map_or(0, |n| lines.len().saturating_sub(n));
                let needle = project.expand(text);
                Ok(lines[skip..].iter().any(|l| l.contains(&needle)))
            }
            Self::FileExists(path) => {
                let path = project.expand(&path.to_string_lossy());
                Ok(project.resolve(path).exists())
            }
            Self::All(conditions) => {
                for condition in conditions {
                    if !condition.evaluate(registry)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(conditions) => {
                for condition in conditions {
                    if condition.evaluate(registry)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(condition) => Ok(!condition.evaluate(registry)?),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, op: &str, items: &[Condition]| {
            let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
            write!(f, "{op}({})", parts.join(", "))
        };
        match self {
            Self::PropertyEquals { name, value } => write!(f, "{name} == '{value}'"),
            Self::ProcessRunning(name) => write!(f, "process {name} running"),
            Self::OutputContains {
                task, text, stream, ..
            } => write!(
                f,
                "{stream} of {} contains '{text}'",
                task.as_deref().unwrap_or("previous task")
            ),
            Self::FileExists(path) => write!(f, "file {} exists", path.display()),
            Self::All(items) => join(f, "all", items),
            Self::Any(items) => join(f, "any", items),
            Self::Not(inner) => write!(f, "not({inner})"),
        }
    }
}

/// Polls a condition until it holds or the timeout expires. A zero timeout
/// checks once.
pub struct Assert {
    name: Option<String>,
    condition: Condition,
    timeout: Duration,
    interval: Duration,
    message: Option<String>,
    warn_only: bool,
}

impl Assert {
    pub fn new(condition: Condition) -> Self {
        Self {
            name: None,
            condition,
            timeout: Duration::ZERO,
            interval: Duration::from_millis(100),
            message: None,
            warn_only: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Report a warning instead of a failure.
    pub fn warn_only(mut self, warn_only: bool) -> Self {
        self.warn_only = warn_only;
        self
    }
}

impl Task for Assert {
    fn task_name(&self) -> &str {
        "assert"
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if self.condition.evaluate(registry)? {
                debug!(condition = %self.condition, attempts, "Assertion holds");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(self.interval);
        }

        let message = match &self.message {
            Some(m) => registry.project().expand(m),
            None => format!("Assertion failed: {}", self.condition),
        };
        registry.log(priority::VERBOSE, &format!("{} after {attempts} attempt(s)", self.condition));
        if self.warn_only {
            Err(HarnessError::warning(message))
        } else {
            Err(HarnessError::failed(message))
        }
    }
}
