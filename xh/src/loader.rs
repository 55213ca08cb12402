//! TOML harness definitions.
//!
//! ```toml
//! [harness]
//! name = "smoke"
//! results_dir = "results"
//!
//! [properties]
//! port = "8080"
//!
//! [[task]]
//! type = "service"
//! name = "web"
//! start = [{ type = "exec", program = "./server", args = ["--port=${port}"],
//!            background = { name = "server" } }]
//!
//! [[task]]
//! type = "testcase"
//! name = "ping"
//! tasks = [
//!     { type = "use-service", service = "web" },
//!     { type = "exec", program = "curl", args = ["-sf", "http://localhost:${port}/"] },
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use xh_common::tasks::{
    Assert, Condition, Echo, Fail, FailKind, Kill, Link, Sequential, SetProperty, Skip, Sleep,
    Stream, TestCase, TestGroup, XharnessTask,
};
use xh_common::{
    BackgroundOptions, ExecTask, HarnessConfig, HarnessError, HarnessResult, JavaSpec,
    ProcessSpec, ServiceActions, ServiceDef, ServiceInstance, TaskRef, priority,
};

/// Errors loading a harness file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl From<ConfigError> for HarnessError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => {
                HarnessError::io(format!("reading {}", path.display()), source)
            }
            parse @ ConfigError::Parse { .. } => HarnessError::config(parse.to_string()),
        }
    }
}

fn default_true() -> bool {
    true
}

fn secs(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_secs)
}

fn millis(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_millis)
}

// ── File layout ──────────────────────────────────────────────────────────

/// A parsed harness file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessFile {
    #[serde(default)]
    pub harness: HarnessSettings,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskDef>,
}

/// The `[harness]` table. Every field overrides the run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    pub name: Option<String>,
    pub results_dir: Option<PathBuf>,
    pub pattern: Option<String>,
    pub error_property: Option<String>,
    pub startup_grace_ms: Option<u64>,
    pub prekill_timeout_secs: Option<u64>,
    pub postkill_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl HarnessSettings {
    pub fn apply(&self, config: &mut HarnessConfig) {
        if let Some(dir) = &self.results_dir {
            config.results_dir = dir.clone();
        }
        if let Some(pattern) = &self.pattern {
            config.pattern = Some(pattern.clone());
        }
        if let Some(property) = &self.error_property {
            config.error_property = property.clone();
        }
        if let Some(grace) = millis(self.startup_grace_ms) {
            config.startup_grace = grace;
        }
        if let Some(prekill) = secs(self.prekill_timeout_secs) {
            config.prekill_timeout = prekill;
        }
        if let Some(postkill) = secs(self.postkill_timeout_secs) {
            config.postkill_timeout = postkill;
        }
        if let Some(poll) = millis(self.poll_interval_ms) {
            config.poll_interval = poll;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskDef {
    Testgroup {
        name: String,
        description: Option<String>,
        #[serde(default)]
        tasks: Vec<TaskDef>,
    },
    Testcase {
        name: String,
        owner: Option<String>,
        description: Option<String>,
        #[serde(default)]
        tasks: Vec<TaskDef>,
    },
    Sequential {
        #[serde(default)]
        tasks: Vec<TaskDef>,
    },
    Exec(ExecDef),
    Java(JavaDef),
    Service {
        name: String,
        start: Option<Vec<TaskDef>>,
        verify: Option<Vec<TaskDef>>,
        stop: Option<Vec<TaskDef>>,
    },
    UseService {
        service: String,
        /// Comma-separated `start`, `verify`, `stop`.
        action: Option<String>,
    },
    Echo {
        message: String,
        level: Option<String>,
    },
    Fail {
        message: String,
        #[serde(default)]
        kind: FailKindDef,
    },
    Skip {
        message: Option<String>,
        if_set: Option<String>,
        unless_set: Option<String>,
    },
    Assert(AssertDef),
    Kill {
        process: String,
    },
    Sleep {
        millis: u64,
    },
    Link {
        name: String,
        href: String,
    },
    Property {
        name: String,
        value: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecDef {
    pub name: Option<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub failonerror: bool,
    pub timeout_secs: Option<u64>,
    pub background: Option<BackgroundDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JavaDef {
    pub name: Option<String>,
    pub java: Option<String>,
    pub classname: Option<String>,
    pub jar: Option<String>,
    #[serde(default)]
    pub classpath: Vec<String>,
    #[serde(default)]
    pub jvm_args: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub failonerror: bool,
    pub timeout_secs: Option<u64>,
    pub background: Option<BackgroundDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackgroundDef {
    pub name: Option<String>,
    pub prekill_timeout_secs: Option<u64>,
    pub postkill_timeout_secs: Option<u64>,
    pub startup_grace_ms: Option<u64>,
    #[serde(default)]
    pub afterwards: Vec<TaskDef>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailKindDef {
    #[default]
    Failure,
    Warning,
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssertDef {
    pub name: Option<String>,
    pub condition: ConditionDef,
    pub timeout_ms: Option<u64>,
    pub interval_ms: Option<u64>,
    pub message: Option<String>,
    #[serde(default)]
    pub warn_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConditionDef {
    PropertyEquals {
        name: String,
        value: String,
    },
    ProcessRunning {
        process: String,
    },
    OutputContains {
        task: Option<String>,
        text: String,
        #[serde(default)]
        stream: StreamDef,
        tail: Option<usize>,
    },
    FileExists {
        path: PathBuf,
    },
    All {
        conditions: Vec<ConditionDef>,
    },
    Any {
        conditions: Vec<ConditionDef>,
    },
    Not {
        condition: Box<ConditionDef>,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDef {
    #[default]
    Stdout,
    Stderr,
    Log,
}

// ── Loading ──────────────────────────────────────────────────────────────

impl HarnessFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Harness name, falling back to `fallback` (normally the file stem).
    pub fn name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.harness.name.as_deref().unwrap_or(fallback)
    }

    /// Number of task definitions, nested ones included.
    pub fn task_count(&self) -> usize {
        self.tasks.iter().map(TaskDef::count).sum()
    }

    /// Build the top-level harness task.
    pub fn build(&self, name: &str) -> HarnessResult<Arc<XharnessTask>> {
        let children = build_all(&self.tasks)?;
        Ok(Arc::new(XharnessTask::new(name, children)))
    }
}

fn build_all(defs: &[TaskDef]) -> HarnessResult<Vec<TaskRef>> {
    defs.iter().map(TaskDef::build).collect()
}

fn parse_level(level: &str) -> HarnessResult<i32> {
    match level.to_ascii_lowercase().as_str() {
        "error" => Ok(priority::ERR),
        "warning" | "warn" => Ok(priority::WARN),
        "info" => Ok(priority::INFO),
        "verbose" => Ok(priority::VERBOSE),
        "debug" => Ok(priority::DEBUG),
        other => Err(HarnessError::config(format!(
            "echo: unknown level '{other}' (expected error, warning, info, verbose or debug)"
        ))),
    }
}

fn with_background(task: ExecTask, background: Option<&BackgroundDef>) -> HarnessResult<ExecTask> {
    let Some(bg) = background else {
        return Ok(task);
    };
    Ok(task.in_background(BackgroundOptions {
        name: bg.name.clone(),
        prekill_timeout: secs(bg.prekill_timeout_secs),
        postkill_timeout: secs(bg.postkill_timeout_secs),
        startup_grace: millis(bg.startup_grace_ms),
        afterwards: build_all(&bg.afterwards)?,
    }))
}

fn with_name(task: ExecTask, name: Option<&String>) -> ExecTask {
    match name {
        Some(name) => task.named(name.clone()),
        None => task,
    }
}

impl TaskDef {
    pub fn count(&self) -> usize {
        let nested = |defs: &[TaskDef]| defs.iter().map(TaskDef::count).sum::<usize>();
        let phases = |phase: &Option<Vec<TaskDef>>| phase.as_deref().map_or(0, nested);
        1 + match self {
            Self::Testgroup { tasks, .. }
            | Self::Testcase { tasks, .. }
            | Self::Sequential { tasks } => nested(tasks),
            Self::Service {
                start, verify, stop, ..
            } => phases(start) + phases(verify) + phases(stop),
            Self::Exec(ExecDef {
                background: Some(bg),
                ..
            })
            | Self::Java(JavaDef {
                background: Some(bg),
                ..
            }) => nested(&bg.afterwards),
            _ => 0,
        }
    }

    pub fn build(&self) -> HarnessResult<TaskRef> {
        let task: TaskRef = match self {
            Self::Testgroup {
                name,
                description,
                tasks,
            } => {
                let mut group = TestGroup::new(name, build_all(tasks)?);
                if let Some(description) = description {
                    group = group.description(description);
                }
                Arc::new(group)
            }
            Self::Testcase {
                name,
                owner,
                description,
                tasks,
            } => {
                let mut case = TestCase::new(name, build_all(tasks)?);
                if let Some(owner) = owner {
                    case = case.owner(owner);
                }
                if let Some(description) = description {
                    case = case.description(description);
                }
                Arc::new(case)
            }
            Self::Sequential { tasks } => Arc::new(Sequential::new(build_all(tasks)?)),
            Self::Exec(def) => {
                let spec = ProcessSpec {
                    program: def.program.clone(),
                    args: def.args.clone(),
                    env: def.env.clone(),
                    dir: def.dir.clone(),
                    fail_on_error: def.failonerror,
                    timeout: secs(def.timeout_secs),
                };
                let task = with_name(ExecTask::new(spec), def.name.as_ref());
                Arc::new(with_background(task, def.background.as_ref())?)
            }
            Self::Java(def) => {
                let spec = JavaSpec {
                    java: def.java.clone().unwrap_or_else(|| "java".to_string()),
                    classname: def.classname.clone(),
                    jar: def.jar.clone(),
                    classpath: def.classpath.clone(),
                    jvm_args: def.jvm_args.clone(),
                    args: def.args.clone(),
                    env: def.env.clone(),
                    dir: def.dir.clone(),
                    fail_on_error: def.failonerror,
                    timeout: secs(def.timeout_secs),
                };
                let task = with_name(ExecTask::java(&spec)?, def.name.as_ref());
                Arc::new(with_background(task, def.background.as_ref())?)
            }
            Self::Service {
                name,
                start,
                verify,
                stop,
            } => {
                let mut builder = ServiceDef::builder(name);
                if let Some(tasks) = start {
                    builder = builder.start(build_all(tasks)?);
                }
                if let Some(tasks) = verify {
                    builder = builder.verify(build_all(tasks)?);
                }
                if let Some(tasks) = stop {
                    builder = builder.stop(build_all(tasks)?);
                }
                Arc::new(builder.build())
            }
            Self::UseService { service, action } => {
                let actions = match action {
                    Some(action) => ServiceActions::parse(action)?,
                    None => ServiceActions::default(),
                };
                Arc::new(ServiceInstance::new(service, actions))
            }
            Self::Echo { message, level } => {
                let echo = Echo::new(message);
                match level {
                    Some(level) => Arc::new(echo.level(parse_level(level)?)),
                    None => Arc::new(echo),
                }
            }
            Self::Fail { message, kind } => {
                let kind = match kind {
                    FailKindDef::Failure => FailKind::Failure,
                    FailKindDef::Warning => FailKind::Warning,
                    FailKindDef::Skip => FailKind::Skip,
                };
                Arc::new(Fail::new(kind, message))
            }
            Self::Skip {
                message,
                if_set,
                unless_set,
            } => {
                let mut skip = Skip::new();
                if let Some(message) = message {
                    skip = skip.message(message);
                }
                if let Some(property) = if_set {
                    skip = skip.if_set(property);
                }
                if let Some(property) = unless_set {
                    skip = skip.unless_set(property);
                }
                Arc::new(skip)
            }
            Self::Assert(def) => Arc::new(def.build()),
            Self::Kill { process } => Arc::new(Kill::new(process)),
            Self::Sleep { millis } => Arc::new(Sleep::new(Duration::from_millis(*millis))),
            Self::Link { name, href } => Arc::new(Link::new(name, href)),
            Self::Property { name, value } => Arc::new(SetProperty::new(name, value)),
        };
        Ok(task)
    }
}

impl AssertDef {
    fn build(&self) -> Assert {
        let mut assert = Assert::new(self.condition.build()).warn_only(self.warn_only);
        if let Some(name) = &self.name {
            assert = assert.named(name);
        }
        if let Some(timeout) = millis(self.timeout_ms) {
            assert = assert.timeout(timeout);
        }
        if let Some(interval) = millis(self.interval_ms) {
            assert = assert.interval(interval);
        }
        if let Some(message) = &self.message {
            assert = assert.message(message);
        }
        assert
    }
}

impl ConditionDef {
    fn build(&self) -> Condition {
        match self {
            Self::PropertyEquals { name, value } => Condition::PropertyEquals {
                name: name.clone(),
                value: value.clone(),
            },
            Self::ProcessRunning { process } => Condition::ProcessRunning(process.clone()),
            Self::OutputContains {
                task,
                text,
                stream,
                tail,
            } => Condition::OutputContains {
                task: task.clone(),
                text: text.clone(),
                stream: match stream {
                    StreamDef::Stdout => Stream::Stdout,
                    StreamDef::Stderr => Stream::Stderr,
                    StreamDef::Log => Stream::Log,
                },
                tail: *tail,
            },
            Self::FileExists { path } => Condition::FileExists(path.clone()),
            Self::All { conditions } => {
                Condition::All(conditions.iter().map(Self::build).collect())
            }
            Self::Any { conditions } => {
                Condition::Any(conditions.iter().map(Self::build).collect())
            }
            Self::Not { condition } => Condition::Not(Box::new(condition.build())),
        }
    }
}
