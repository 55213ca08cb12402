//! Service lifecycle.
//!
//! A [`ServiceDef`] is a named set of start, verify and stop groups with a
//! five-state lifecycle:
//!
//! ```text
//! Unstarted ──start──▶ Running | Warning | Failed
//! {Running, Warning, Failed} ──stop──▶ Stopped ──was_stopped──▶ Unstarted
//! ```
//!
//! A startup failure or warning is remembered and raised again by `stop`,
//! taking precedence over anything the stop group reports.

mod group;
mod instance;

pub use group::{DummyVerify, ServiceGroup};
pub use instance::{ServiceActions, ServiceInstance};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::buffer::priority;
use crate::error::{HarnessError, HarnessResult};
use crate::registry::TaskRegistry;
use crate::task::{ServicePhase, Task, TaskKind, TaskRef};

// ── Service State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unstarted,
    Running,
    Warning,
    Failed,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Running => write!(f, "running"),
            Self::Warning => write!(f, "warning"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct Lifecycle {
    state: ServiceState,
    start_error: Option<HarnessError>,
}

struct ServiceInner {
    name: String,
    start: Option<TaskRef>,
    verify: Option<TaskRef>,
    stop: Option<TaskRef>,
    lifecycle: Mutex<Lifecycle>,
}

// ── Service Definition ───────────────────────────────────────────────────

/// Shared handle to a service definition.
#[derive(Clone)]
pub struct ServiceDef {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for ServiceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDef")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceDef {
    pub fn builder(name: impl Into<String>) -> ServiceDefBuilder {
        ServiceDefBuilder {
            name: name.into(),
            start: None,
            verify: None,
            stop: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle().state
    }

    pub fn has_verify(&self) -> bool {
        self.inner.verify.is_some()
    }

    /// Whether both handles denote the same definition.
    pub fn same_as(&self, other: &ServiceDef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the start group. Does nothing unless the service is unstarted.
    pub fn start(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let state = self.state();
        if state != ServiceState::Unstarted {
            debug!(service = %self.name(), %state, "Start ignored");
            return Ok(());
        }

        let result = match &self.inner.start {
            Some(group) => registry.execute(group),
            None => Ok(()),
        };

        let mut lifecycle = self.lifecycle();
        match result {
            Ok(()) => {
                lifecycle.state = ServiceState::Running;
                info!(service = %self.name(), "Service started");
                Ok(())
            }
            Err(e) if e.is_warning() => {
                let err =
                    HarnessError::warning(format!("Service {} started with warnings", self.name()));
                lifecycle.state = ServiceState::Warning;
                lifecycle.start_error = Some(err.clone());
                warn!(service = %self.name(), cause = %e, "Service started with warnings");
                Err(err)
            }
            Err(e) => {
                let err = HarnessError::wrap(format!("Service {} failed to start", self.name()), e);
                lifecycle.state = ServiceState::Failed;
                lifecycle.start_error = Some(err.clone());
                warn!(
                    service = %self.name(),
                    error = %err.message_chain(),
                    "Service failed to start"
                );
                Err(err)
            }
        }
    }

    /// Run the verify group, or the placeholder check when there is none.
    pub fn verify(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        match self.state() {
            ServiceState::Running | ServiceState::Warning => {}
            _ => {
                return Err(HarnessError::failed(format!(
                    "Service {} is not running",
                    self.name()
                )));
            }
        }
        match &self.inner.verify {
            Some(group) => registry.execute(group),
            None => {
                let placeholder: TaskRef = Arc::new(DummyVerify::new(self.name()));
                registry.execute(&placeholder)
            }
        }
    }

    /// Run the stop group if the service is running, then mark it stopped.
    ///
    /// A remembered startup failure or warning is raised again; a stop
    /// failure in that case is only logged.
    pub fn stop(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let (prior, start_error) = {
            let lifecycle = self.lifecycle();
            (lifecycle.state, lifecycle.start_error.clone())
        };

        let result = match (&self.inner.stop, prior) {
            (Some(group), ServiceState::Running) => registry.execute(group),
            _ => Ok(()),
        };

        {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = ServiceState::Stopped;
            lifecycle.start_error = None;
        }
        debug!(service = %self.name(), from = %prior, "Service stopped");

        match prior {
            ServiceState::Failed | ServiceState::Warning => {
                if let Err(e) = &result {
                    registry.log(
                        priority::WARN,
                        &format!("Stopping service {}: {}", self.name(), e.message_chain()),
                    );
                }
                Err(start_error.unwrap_or_else(|| {
                    HarnessError::failed(format!("Service {} failed to start", self.name()))
                }))
            }
            _ => result.map_err(|e| {
                if e.is_warning() {
                    HarnessError::warning(format!("Service {} stopped with warnings", self.name()))
                } else {
                    HarnessError::wrap(format!("Service {} failed to stop", self.name()), e)
                }
            }),
        }
    }

    /// True exactly once after a stop; resets the service to unstarted.
    pub fn was_stopped(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == ServiceState::Stopped {
            lifecycle.state = ServiceState::Unstarted;
            true
        } else {
            false
        }
    }
}

/// A service definition registers itself with the enclosing container.
impl Task for ServiceDef {
    fn task_name(&self) -> &str {
        "service"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.inner.name)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::ServiceDef
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        registry.define_service(self.clone())
    }
}

pub struct ServiceDefBuilder {
    name: String,
    start: Option<Vec<TaskRef>>,
    verify: Option<Vec<TaskRef>>,
    stop: Option<Vec<TaskRef>>,
}

impl ServiceDefBuilder {
    pub fn start(mut self, tasks: Vec<TaskRef>) -> Self {
        self.start = Some(tasks);
        self
    }

    pub fn verify(mut self, tasks: Vec<TaskRef>) -> Self {
        self.verify = Some(tasks);
        self
    }

    pub fn stop(mut self, tasks: Vec<TaskRef>) -> Self {
        self.stop = Some(tasks);
        self
    }

    pub fn build(self) -> ServiceDef {
        let group = |phase: ServicePhase, tasks: Option<Vec<TaskRef>>| {
            tasks.map(|tasks| Arc::new(ServiceGroup::new(phase, &self.name, tasks)) as TaskRef)
        };
        let start = group(ServicePhase::Start, self.start);
        let verify = group(ServicePhase::Verify, self.verify);
        let stop = group(ServicePhase::Stop, self.stop);
        ServiceDef {
            inner: Arc::new(ServiceInner {
                name: self.name,
                start,
                verify,
                stop,
                lifecycle: Mutex::new(Lifecycle {
                    state: ServiceState::Unstarted,
                    start_error: None,
                }),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::project::Project;
    use crate::tasks::{Echo, Fail, FailKind, XharnessTask};
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> Arc<TaskRegistry> {
        let project = Arc::new(Project::new("unit", dir.path()));
        let config = HarnessConfig {
            results_dir: dir.path().join("results"),
            ..HarnessConfig::default()
        };
        let top: TaskRef = Arc::new(XharnessTask::new("suite", Vec::new()));
        TaskRegistry::init(project, top, config).unwrap()
    }

    fn fail(kind: FailKind, message: &str) -> TaskRef {
        Arc::new(Fail::new(kind, message))
    }

    #[test]
    fn test_was_stopped_fires_once_per_stop() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let def = ServiceDef::builder("db")
            .start(vec![Arc::new(Echo::new("up")) as TaskRef])
            .build();

        assert!(!def.was_stopped());
        def.start(&registry).unwrap();
        assert_eq!(def.state(), ServiceState::Running);
        assert!(!def.was_stopped());

        def.stop(&registry).unwrap();
        assert_eq!(def.state(), ServiceState::Stopped);
        assert!(def.was_stopped());
        assert_eq!(def.state(), ServiceState::Unstarted);
        assert!(!def.was_stopped());
        registry.shutdown(None).unwrap();
    }

    #[test]
    fn test_start_warning_is_raised_instead_of_running_stop() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let def = ServiceDef::builder("db")
            .start(vec![fail(FailKind::Warning, "slow disk")])
            .stop(vec![fail(FailKind::Failure, "stuck")])
            .build();

        let started = def.start(&registry).unwrap_err();
        assert!(started.is_warning());
        assert_eq!(def.state(), ServiceState::Warning);

        let stopped = def.stop(&registry).unwrap_err();
        assert!(stopped.is_warning(), "{stopped:?}");
        assert_eq!(stopped.message(), "Service db started with warnings");
        assert_eq!(def.state(), ServiceState::Stopped);

        // The remembered error is cleared by the stop.
        assert!(def.was_stopped());
        assert!(def.stop(&registry).is_ok());
        registry.shutdown(None).ok();
    }

    #[test]
    fn test_start_failure_is_raised_by_stop() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let def = ServiceDef::builder("db")
            .start(vec![fail(FailKind::Failure, "cannot bind")])
            .build();

        assert!(def.start(&registry).is_err());
        assert_eq!(def.state(), ServiceState::Failed);
        let stopped = def.stop(&registry).unwrap_err();
        assert!(!stopped.is_warning());
        assert_eq!(stopped.message(), "Service db failed to start");
        assert!(stopped.message_chain().contains("cannot bind"));
        registry.shutdown(None).ok();
    }

    #[test]
    fn test_stop_failure_of_running_service() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let def = ServiceDef::builder("db")
            .stop(vec![fail(FailKind::Failure, "stuck")])
            .build();

        def.start(&registry).unwrap();
        let stopped = def.stop(&registry).unwrap_err();
        assert_eq!(stopped.message(), "Service db failed to stop");
        assert_eq!(def.state(), ServiceState::Stopped);
        registry.shutdown(None).ok();
    }

    #[test]
    fn test_start_is_ignored_unless_unstarted() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let def = ServiceDef::builder("db")
            .start(vec![fail(FailKind::Failure, "cannot bind")])
            .build();

        assert!(def.start(&registry).is_err());
        assert!(def.start(&registry).is_ok());
        assert_eq!(def.state(), ServiceState::Failed);
        registry.shutdown(None).ok();
    }
}
