use std::sync::Arc;

use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::project::Project;
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskKind, TaskRef, unwrap_once};

/// Execute `children` in order and fold their results into one.
///
/// The first failure wins and is wrapped as `"<Kind> <name> failed"`; a
/// warning becomes `"<Kind> <name> reported warnings"` when nothing failed.
/// Skips raised by nested test containers are tolerated, other skips end
/// the container. Configuration errors abort at once. With `fail_on_error`
/// the first failure or warning stops execution.
fn run_children(
    registry: &TaskRegistry,
    children: &[TaskRef],
    fail_on_error: bool,
) -> HarnessResult<()> {
    let mut failure: Option<HarnessError> = None;
    let mut warning: Option<HarnessError> = None;

    for child in children {
        let Err(err) = registry.execute(child) else {
            continue;
        };
        let effective = unwrap_once(child);
        let kind = effective.kind();
        let label = format!("{} {}", kind.display_kind(), effective.display_name());

        if err.is_pattern_skip() {
            continue;
        }
        if err.is_skip() {
            if kind.is_test_container() {
                debug!(child = %label, reason = %err.message(), "Nested test skipped");
                continue;
            }
            return Err(failure.unwrap_or(err));
        }
        if matches!(err, HarnessError::Config(_)) {
            return Err(err);
        }

        if err.is_warning() {
            warning.get_or_insert_with(|| {
                HarnessError::warning(format!("{label} reported warnings"))
            });
        } else {
            failure.get_or_insert_with(|| HarnessError::wrap(format!("{label} failed"), err));
        }
        if fail_on_error {
            break;
        }
    }

    match (failure, warning) {
        (Some(err), _) | (None, Some(err)) => Err(err),
        (None, None) => Ok(()),
    }
}

/// Top-level task of a harness run.
pub struct XharnessTask {
    name: String,
    children: Vec<TaskRef>,
}

impl XharnessTask {
    pub fn new(name: impl Into<String>, children: Vec<TaskRef>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    /// Run the harness: set up the registry, execute every child and shut
    /// the registry down with the outcome.
    pub fn run(
        self: &Arc<Self>,
        project: Arc<Project>,
        config: HarnessConfig,
    ) -> HarnessResult<()> {
        let top: TaskRef = self.clone();
        let registry = TaskRegistry::init(project, Arc::clone(&top), config)?;
        let result = top.execute(&registry);
        registry.shutdown(result.err())
    }
}

impl std::fmt::Debug for XharnessTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XharnessTask")
            .field("name", &self.name)
            .field("children", &self.children.len())
            .finish()
    }
}

impl Task for XharnessTask {
    fn task_name(&self) -> &str {
        "xharness"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Harness
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        run_children(registry, &self.children, false)
    }
}

/// A group of tests. Keeps going after a failing child.
pub struct TestGroup {
    name: String,
    description: Option<String>,
    children: Vec<TaskRef>,
}

impl TestGroup {
    pub fn new(name: impl Into<String>, children: Vec<TaskRef>) -> Self {
        Self {
            name: name.into(),
            description: None,
            children,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Task for TestGroup {
    fn task_name(&self) -> &str {
        "testgroup"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::TestGroup
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        registry.check_selected()?;
        run_children(registry, &self.children, false)
    }
}

/// A single test. Stops at the first failing or warning child.
pub struct TestCase {
    name: String,
    owner: Option<String>,
    description: Option<String>,
    children: Vec<TaskRef>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, children: Vec<TaskRef>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            description: None,
            children,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Task for TestCase {
    fn task_name(&self) -> &str {
        "testcase"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::TestCase
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        registry.check_selected()?;
        run_children(registry, &self.children, true)
    }
}

/// Runs its children in order without a logger of its own; the first error
/// ends it.
pub struct Sequential {
    children: Vec<TaskRef>,
}

impl Sequential {
    pub fn new(children: Vec<TaskRef>) -> Self {
        Self { children }
    }
}

impl Task for Sequential {
    fn task_name(&self) -> &str {
        "sequential"
    }

    fn kind(&self) -> TaskKind {
        TaskKind::PassThrough
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        for child in &self.children {
            registry.execute(child)?;
        }
        Ok(())
    }
}
