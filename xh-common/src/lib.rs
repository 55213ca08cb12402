//! XHarness core.
//!
//! Runs a tree of tasks (test groups, test cases, services, foreground and
//! background processes) and writes one XML result record per finished
//! task. Entry point: [`tasks::XharnessTask::run`].

pub mod buffer;
pub mod config;
pub mod error;
pub mod formatter;
pub mod logger;
pub mod pattern;
pub mod process;
pub mod project;
pub mod registry;
pub mod service;
pub mod task;
pub mod tasks;
pub mod testing;

pub use buffer::{LineBuffer, LogLine, Render, SharedBuffer, priority};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use formatter::{Outcome, ResultFormatter, ResultRecord, TaskType};
pub use logger::{LoggerId, LoggerInfo, LoggerKind, LoggerTree};
pub use pattern::Pattern;
pub use process::{BackgroundOptions, BgProcess, ExecTask, JavaSpec, ProcessRegistry, ProcessSpec};
pub use project::{BuildListener, Project};
pub use registry::TaskRegistry;
pub use service::{ServiceActions, ServiceDef, ServiceInstance, ServiceState};
pub use task::{Task, TaskAdapter, TaskKind, TaskRef};
