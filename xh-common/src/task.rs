//! Task model.
//!
//! Every unit of work in a harness run implements [`Task`]. The logger tree
//! never inspects concrete types: it reads [`Task::kind`] once when a task
//! starts and the capability accessors (`as_unwrappable`, `as_process`) for
//! the few behaviours that need more.

use std::fmt;
use std::sync::Arc;

use crate::error::HarnessResult;
use crate::process::BgProcess;
use crate::registry::TaskRegistry;

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;

/// Phase of a service lifecycle group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServicePhase {
    Start,
    Verify,
    Stop,
}

impl ServicePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Verify => "verify",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for ServicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static classification of a task, used to pick its logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// The top-level harness task.
    Harness,
    TestGroup,
    TestCase,
    /// A service definition.
    ServiceDef,
    /// A use of a service definition (start/verify/stop).
    ServiceInstance,
    /// A start, verify or stop group of a service.
    Phase(ServicePhase),
    /// Runs an operating-system process.
    Process,
    Link,
    /// Structural container that gets no logger of its own.
    PassThrough,
    Other,
}

impl TaskKind {
    /// Word used in aggregated failure messages.
    pub fn display_kind(self) -> &'static str {
        match self {
            Self::ServiceDef | Self::ServiceInstance => "Service",
            Self::TestCase => "Testcase",
            Self::TestGroup => "Testgroup",
            _ => "Task",
        }
    }

    /// Test containers tolerate skips raised by nested test containers.
    pub fn is_test_container(self) -> bool {
        matches!(self, Self::TestGroup | Self::TestCase)
    }
}

/// A unit of work executed through the [`TaskRegistry`].
pub trait Task: Send + Sync {
    /// Element name of the task type, e.g. `exec` or `testcase`.
    fn task_name(&self) -> &str;

    /// User-assigned name, if any.
    fn name(&self) -> Option<&str> {
        None
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Other
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()>;

    /// Owner of a test case.
    fn owner(&self) -> Option<&str> {
        None
    }

    /// Free text copied into the result record of a passing task.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Reference string recorded with the result (link target, service name).
    fn reference(&self) -> Option<String> {
        None
    }

    fn as_unwrappable(&self) -> Option<&dyn Unwrappable> {
        None
    }

    fn as_process(&self) -> Option<&dyn ProcessTask> {
        None
    }

    /// Name used for the task's logger.
    fn display_name(&self) -> &str {
        self.name().unwrap_or_else(|| self.task_name())
    }
}

/// One level of task indirection.
pub trait Unwrappable {
    fn unwrap_task(&self) -> TaskRef;
}

/// Capability of tasks that run an operating-system process.
pub trait ProcessTask {
    fn command_line(&self) -> String;

    fn return_value(&self) -> Option<i32>;

    /// Handle of the launched background process, if the task runs one.
    fn background(&self) -> Option<Arc<BgProcess>> {
        None
    }
}

/// Resolve a task through at most one wrapper.
pub fn unwrap_once(task: &TaskRef) -> TaskRef {
    match task.as_unwrappable() {
        Some(wrapper) => wrapper.unwrap_task(),
        None => Arc::clone(task),
    }
}

/// Identity comparison of task handles.
pub fn same_task(a: &TaskRef, b: &TaskRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Whether `event` denotes `own`, directly or through one wrapper on
/// either side.
pub fn is_own_task(own: &TaskRef, event: &TaskRef) -> bool {
    same_task(own, event)
        || same_task(own, &unwrap_once(event))
        || same_task(&unwrap_once(own), event)
}

/// Wrapper that forwards execution to an inner task. The logger tree sees
/// through exactly one such layer.
pub struct TaskAdapter {
    label: String,
    inner: TaskRef,
}

impl TaskAdapter {
    pub fn new(label: impl Into<String>, inner: TaskRef) -> Self {
        Self {
            label: label.into(),
            inner,
        }
    }
}

impl Task for TaskAdapter {
    fn task_name(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> TaskKind {
        self.inner.kind()
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        self.inner.execute(registry)
    }

    fn as_unwrappable(&self) -> Option<&dyn Unwrappable> {
        Some(self)
    }
}

impl Unwrappable for TaskAdapter {
    fn unwrap_task(&self) -> TaskRef {
        Arc::clone(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    impl Task for Noop {
        fn task_name(&self) -> &str {
            self.0
        }

        fn execute(&self, _registry: &TaskRegistry) -> HarnessResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unwrap_once_sees_through_adapter() {
        let inner: TaskRef = Arc::new(Noop("echo"));
        let adapter: TaskRef = Arc::new(TaskAdapter::new("wrapper", inner.clone()));
        assert!(same_task(&unwrap_once(&adapter), &inner));
        assert!(is_own_task(&inner, &adapter));
        assert!(is_own_task(&adapter, &inner));
    }

    #[test]
    fn test_unwrap_is_single_level() {
        let inner: TaskRef = Arc::new(Noop("echo"));
        let once: TaskRef = Arc::new(TaskAdapter::new("a", inner.clone()));
        let twice: TaskRef = Arc::new(TaskAdapter::new("b", once.clone()));
        assert!(same_task(&unwrap_once(&twice), &once));
        assert!(!is_own_task(&inner, &twice));
    }

    #[test]
    fn test_foreign_task_is_not_own() {
        let a: TaskRef = Arc::new(Noop("a"));
        let b: TaskRef = Arc::new(Noop("b"));
        assert!(!is_own_task(&a, &b));
    }

    #[test]
    fn test_display_kind() {
        assert_eq!(TaskKind::ServiceInstance.display_kind(), "Service");
        assert_eq!(TaskKind::TestCase.display_kind(), "Testcase");
        assert_eq!(TaskKind::TestGroup.display_kind(), "Testgroup");
        assert_eq!(TaskKind::Process.display_kind(), "Task");
    }
}
