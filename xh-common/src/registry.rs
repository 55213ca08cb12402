//! Run context of a harness execution.
//!
//! A [`TaskRegistry`] is created once per run by [`TaskRegistry::init`] and
//! handed to every task by reference. It keeps the stack of open task
//! frames, the logger tree those frames point into, the background process
//! table and the result formatter.
//!
//! Loggers are finished when their task finishes, except for the kinds
//! that outlive their task:
//!
//! * a background process logger waits in its container's queue and kills
//!   the process when the container finishes,
//! * a service start logger waits in the enclosing service logger,
//! * a service logger that started its service waits in its container and
//!   stops the service when the container finishes.
//!
//! Queued loggers are finished in FIFO order and the first failure among
//! them is reported by the container.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::buffer::{LineBuffer, SharedBuffer, priority};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::formatter::{Outcome, ResultFormatter, ResultRecord, TaskType};
use crate::logger::{LoggerId, LoggerInfo, LoggerKind, LoggerTree, classify, logger_for};
use crate::pattern::Pattern;
use crate::process::ProcessRegistry;
use crate::project::{BuildListener, ListenerId, Project, TaskEvent};
use crate::service::ServiceDef;
use crate::task::{TaskKind, TaskRef, is_own_task, unwrap_once};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    ShutDown,
}

/// An open task and the logger it writes to. Pass-through tasks and tasks
/// started in a deselected container have no logger.
#[derive(Clone)]
struct Frame {
    task: TaskRef,
    logger: Option<LoggerId>,
}

struct RegistryState {
    phase: Phase,
    tree: LoggerTree,
    frames: Vec<Frame>,
    error_listener: Option<ListenerId>,
}

impl RegistryState {
    fn innermost_where(
        &self,
        frames: &[Frame],
        pred: impl Fn(LoggerKind) -> bool,
    ) -> Option<LoggerId> {
        frames
            .iter()
            .rev()
            .filter_map(|f| f.logger)
            .find(|id| pred(self.tree.node(*id).kind()))
    }

    fn innermost_container(&self) -> Option<LoggerId> {
        self.innermost_where(&self.frames, LoggerKind::is_container)
    }

    fn innermost_logger(&self) -> Option<LoggerId> {
        self.frames.iter().rev().find_map(|f| f.logger)
    }
}

/// Shared state of one harness run.
pub struct TaskRegistry {
    project: Arc<Project>,
    config: HarnessConfig,
    formatter: ResultFormatter,
    processes: ProcessRegistry,
    pattern: Option<Pattern>,
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    /// Start a run with `top` as its outermost task.
    ///
    /// Creates the results directory and the root logger. The caller is
    /// expected to execute `top` directly and then call [`shutdown`].
    ///
    /// [`shutdown`]: TaskRegistry::shutdown
    pub fn init(
        project: Arc<Project>,
        top: TaskRef,
        config: HarnessConfig,
    ) -> HarnessResult<Arc<Self>> {
        let formatter = ResultFormatter::new(project.resolve(&config.results_dir))?;
        let pattern = config
            .pattern
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(Pattern::parse);

        let mut tree = LoggerTree::new();
        let root = tree.create_root(Arc::clone(&top));

        info!(
            project = %project.name(),
            harness = %top.display_name(),
            results = %formatter.dir().display(),
            pattern = ?pattern.as_ref().map(ToString::to_string),
            "Harness run started"
        );

        let registry = Arc::new(Self {
            project: Arc::clone(&project),
            config,
            formatter,
            processes: ProcessRegistry::new(),
            pattern,
            state: Mutex::new(RegistryState {
                phase: Phase::Active,
                tree,
                frames: vec![Frame {
                    task: Arc::clone(&top),
                    logger: Some(root),
                }],
                error_listener: None,
            }),
        });
        project.fire_task_started(&top);
        Ok(registry)
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    pub fn formatter(&self) -> &ResultFormatter {
        &self.formatter
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active(&self) -> HarnessResult<MutexGuard<'_, RegistryState>> {
        let state = self.lock();
        if state.phase == Phase::ShutDown {
            return Err(HarnessError::Internal(
                "task registry used after shutdown".to_string(),
            ));
        }
        Ok(state)
    }

    // ── Task lifecycle ───────────────────────────────────────────────────

    /// Run `task` inside its own frame and return its final result.
    pub fn execute(&self, task: &TaskRef) -> HarnessResult<()> {
        self.task_started(task)?;
        let result = task.execute(self);
        self.task_finished(task, result)
    }

    /// Open a frame for `task`, creating its logger under the innermost
    /// container.
    pub fn task_started(&self, task: &TaskRef) -> HarnessResult<()> {
        let effective = unwrap_once(task);
        {
            let mut state = self.active()?;
            let container = state.innermost_container().ok_or_else(|| {
                HarnessError::Internal(format!(
                    "task {} started outside any container",
                    task.display_name()
                ))
            })?;

            let logger = if state.tree.node(container).is_active() {
                let kind = effective.kind();
                let reachable = kind == TaskKind::ServiceInstance
                    && effective
                        .reference()
                        .is_some_and(|name| state.tree.lookup_service(container, &name).is_some());
                logger_for(kind, reachable, effective.as_process().is_some()).map(
                    |(logger_kind, task_type)| {
                        let id = state.tree.create_child(
                            container,
                            Arc::clone(&effective),
                            logger_kind,
                            task_type,
                        );
                        if kind.is_test_container() {
                            let full_name = state.tree.node(id).full_name().to_string();
                            if !self.matches_pattern(&full_name) {
                                debug!(test = %full_name, "Deselected by pattern");
                                state.tree.deactivate(id, false);
                            }
                        }
                        id
                    },
                )
            } else {
                None
            };

            state.frames.push(Frame {
                task: Arc::clone(task),
                logger,
            });
        }
        self.project.fire_task_started(task);
        Ok(())
    }

    /// Close the frame of `task` and finish its logger.
    ///
    /// A finish event for anything but the innermost open task is ignored
    /// and `result` is returned unchanged. Pattern skips are swallowed.
    pub fn task_finished(&self, task: &TaskRef, result: HarnessResult<()>) -> HarnessResult<()> {
        let frame = {
            let mut state = self.active()?;
            match state.frames.last() {
                Some(top) if is_own_task(&top.task, task) => state.frames.pop(),
                _ => None,
            }
        };
        let Some(frame) = frame else {
            warn!(
                task = %task.display_name(),
                "Ignoring finish of a task that is not the innermost open task"
            );
            return result;
        };

        self.project.fire_task_finished(task, result.as_ref().err());
        let result = match frame.logger {
            Some(id) => self.finish_logger(id, result),
            None => result,
        };
        match result {
            Err(e) if e.is_pattern_skip() => Ok(()),
            other => other,
        }
    }

    fn finish_logger(&self, id: LoggerId, result: HarnessResult<()>) -> HarnessResult<()> {
        let (kind, deferred_to) = {
            let mut state = self.lock();
            let node = state.tree.node(id);
            let kind = node.kind();
            let background = node.task().as_process().and_then(|p| p.background());
            let target = match kind {
                LoggerKind::Process if background.is_some() => state.innermost_container(),
                LoggerKind::SvcsStart => state
                    .innermost_where(&state.frames, |k| k == LoggerKind::Service)
                    .or_else(|| state.innermost_container()),
                LoggerKind::Service if node.claimed.is_some() => state.innermost_container(),
                _ => None,
            };
            if let Some(target) = target {
                let node = state.tree.node_mut(id);
                node.pending = Some(result.clone());
                node.process = background;
                state.tree.node_mut(target).deferred.push_back(id);
                debug!(
                    logger = %state.tree.node(id).full_name(),
                    container = %state.tree.node(target).full_name(),
                    "Deferred logger finalization"
                );
            }
            (kind, target)
        };
        if deferred_to.is_some() {
            return result;
        }

        let mut result = result;
        if kind.is_container()
            && let Some(err) = self.drain_deferred(id)
            && !matches!(&result, Err(e) if !e.is_warning())
        {
            result = Err(err);
        }
        self.complete(id, &result)?;
        result
    }

    /// Finish every logger queued on `container`, oldest first. Returns the
    /// first failure.
    fn drain_deferred(&self, container: LoggerId) -> Option<HarnessError> {
        let mut first = None;
        loop {
            let next = self.lock().tree.node_mut(container).deferred.pop_front();
            let Some(id) = next else {
                break;
            };
            if let Err(err) = self.run_deferred(id)
                && !err.is_pattern_skip()
            {
                first.get_or_insert(err);
            }
        }
        first
    }

    fn run_deferred(&self, id: LoggerId) -> HarnessResult<()> {
        let (kind, pending, claimed, process) = {
            let mut state = self.lock();
            let node = state.tree.node_mut(id);
            let pending = node.pending.take().unwrap_or(Ok(()));
            let claimed = node.claimed.clone();
            let process = node.process.clone();
            let (kind, task) = (node.kind, Arc::clone(&node.task));
            state.frames.push(Frame {
                task,
                logger: Some(id),
            });
            (kind, pending, claimed, process)
        };

        let outcome = match kind {
            LoggerKind::Process => {
                let killed = match &process {
                    Some(process) => process.kill(self),
                    None => Ok(()),
                };
                match (pending, killed) {
                    (Err(e), Err(kill)) => {
                        self.log(priority::ERR, &kill.message_chain());
                        Err(e)
                    }
                    (Err(e), Ok(())) => Err(e),
                    (Ok(()), killed) => killed,
                }
            }
            LoggerKind::Service => {
                let stopped = match &claimed {
                    Some(def) => def.stop(self),
                    None => Ok(()),
                };
                let drained = self.drain_deferred(id);
                self.lock().tree.node_mut(id).claimed = None;
                match (pending, stopped) {
                    (Err(e), Err(stop)) => {
                        self.log(priority::WARN, &stop.message_chain());
                        Err(e)
                    }
                    (Err(e), Ok(())) => Err(e),
                    (Ok(()), Err(stop)) => Err(stop),
                    (Ok(()), Ok(())) => drained.map_or(Ok(()), Err),
                }
            }
            _ => pending,
        };

        {
            let mut state = self.lock();
            if state.frames.last().and_then(|f| f.logger) == Some(id) {
                state.frames.pop();
            } else {
                warn!(
                    logger = %state.tree.node(id).full_name(),
                    "Deferred finalizer left unbalanced frames"
                );
            }
        }
        self.complete(id, &outcome)?;
        outcome
    }

    /// Mark `id` finished and write its record.
    fn complete(&self, id: LoggerId, result: &HarnessResult<()>) -> HarnessResult<()> {
        let Some((outcome, description)) = classify(result) else {
            let mut state = self.lock();
            let node = state.tree.node_mut(id);
            node.finished = true;
            debug!(logger = %node.full_name(), "Not selected, no record written");
            return Ok(());
        };

        let record = {
            let mut state = self.lock();
            state.tree.node_mut(id).finished = true;
            let node = state.tree.node(id);
            let mut output = node.buffer().lock().unwrap_or_else(|e| e.into_inner());
            match result {
                Err(HarnessError::Internal(message)) => output.log_line(priority::ERR, message),
                Err(err) if err.is_build_failure() => {
                    output.log_line(priority::ERR, &err.message_chain());
                }
                Err(err) if err.is_warning() => output.log_line(priority::WARN, &err.message()),
                _ => {}
            }

            let task = node.task();
            let process = task.as_process();
            let description = match outcome {
                Outcome::Passed => task.description().unwrap_or_default().to_string(),
                _ => description,
            };
            ResultRecord {
                order: node.order(),
                elapsed: node.started.elapsed(),
                task_type: node.task_type(),
                parent: node.parent_name().to_string(),
                name: node.name().to_string(),
                full_name: node.full_name().to_string(),
                reference: node.reference().map(str::to_string),
                owner: match node.task_type() {
                    TaskType::TestCase => task.owner().map(str::to_string),
                    _ => None,
                },
                command: match node.process() {
                    Some(bg) => Some(bg.command_line().to_string()),
                    None => process.map(|p| p.command_line()),
                },
                retval: match node.process() {
                    Some(bg) => bg.exit_code(),
                    None => process.and_then(|p| p.return_value()),
                },
                outcome,
                description,
                output: output.clone(),
            }
        };

        if outcome == Outcome::Failed
            && let Err(err) = result
        {
            self.set_error_property(err);
        }
        self.formatter.write_results(&record)?;
        Ok(())
    }

    // ── Selection ────────────────────────────────────────────────────────

    /// Whether `path` is selected by the run pattern. Everything is
    /// selected when there is no pattern.
    pub fn matches_pattern(&self, path: &str) -> bool {
        self.pattern.as_ref().is_none_or(|p| p.matches(path))
    }

    /// Fail with a pattern skip when the calling test is deselected.
    pub fn check_selected(&self) -> HarnessResult<()> {
        let state = self.active()?;
        let id = state
            .frames
            .last()
            .and_then(|f| f.logger)
            .or_else(|| state.innermost_container())
            .ok_or_else(|| HarnessError::Internal("no open task".to_string()))?;
        let node = state.tree.node(id);
        if node.is_active() {
            return Ok(());
        }
        Err(HarnessError::SkippedByPattern(format!(
            "{} not selected by pattern {}",
            node.full_name(),
            self.pattern.as_ref().map(ToString::to_string).unwrap_or_default()
        )))
    }

    /// Record the first failure of the run in the configured user property
    /// and arrange for a summary at the end of the build. Later calls do
    /// nothing.
    pub fn set_error_property(&self, err: &HarnessError) {
        let mut state = self.lock();
        if state.error_listener.is_some() {
            return;
        }
        let message = err.message();
        self.project
            .set_user_property(self.config.error_property.clone(), message.clone());
        warn!(
            property = %self.config.error_property,
            failure = %message,
            "First failure of the run"
        );
        let summary = Arc::new(FailureSummary::new(message));
        state.error_listener = Some(self.project.add_build_listener(summary));
    }

    // ── Lookup and logging ───────────────────────────────────────────────

    /// Positional or named lookup among the children of the current
    /// container. The calling task's own logger is never returned.
    pub fn get_logger(&self, spec: Option<&str>) -> Option<LoggerInfo> {
        let state = self.lock();
        let container = state.innermost_container()?;
        let exclude = state.frames.last().and_then(|f| f.logger);
        state
            .tree
            .get_task(container, spec, exclude)
            .map(|id| LoggerInfo::of(state.tree.node(id)))
    }

    pub fn current_container(&self) -> Option<LoggerInfo> {
        let state = self.lock();
        state
            .innermost_container()
            .map(|id| LoggerInfo::of(state.tree.node(id)))
    }

    /// Innermost open test case.
    pub fn current_test(&self) -> Option<LoggerInfo> {
        let state = self.lock();
        state
            .frames
            .iter()
            .rev()
            .filter_map(|f| f.logger)
            .map(|id| state.tree.node(id))
            .find(|n| n.task_type() == TaskType::TestCase)
            .map(LoggerInfo::of)
    }

    /// Log `message` to the innermost logger and the project listeners.
    pub fn log(&self, level: i32, message: &str) {
        let buffer = {
            let state = self.lock();
            state
                .innermost_logger()
                .map(|id| Arc::clone(state.tree.node(id).buffer()))
        };
        if let Some(buffer) = buffer {
            buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .log_line(level, message);
        }
        self.project.fire_message_logged(level, message);
        match level {
            priority::ERR => error!(target: "xh::task", "{message}"),
            priority::WARN => warn!(target: "xh::task", "{message}"),
            priority::INFO => info!(target: "xh::task", "{message}"),
            _ => debug!(target: "xh::task", "{message}"),
        }
    }

    /// Buffer process output should be captured into: the innermost
    /// logger's, or a detached one when no logger is open.
    pub fn output_sink(&self) -> SharedBuffer {
        let state = self.lock();
        state
            .innermost_logger()
            .map(|id| Arc::clone(state.tree.node(id).buffer()))
            .unwrap_or_else(|| LineBuffer::shared(priority::INFO))
    }

    /// Read access to the logger tree.
    pub fn inspect<R>(&self, f: impl FnOnce(&LoggerTree) -> R) -> R {
        f(&self.lock().tree)
    }

    // ── Services ─────────────────────────────────────────────────────────

    /// Register `def` with the container enclosing the defining task.
    pub fn define_service(&self, def: ServiceDef) -> HarnessResult<()> {
        let mut state = self.active()?;
        let outer = &state.frames[..state.frames.len().saturating_sub(1)];
        let container = state
            .innermost_where(outer, LoggerKind::is_container)
            .ok_or_else(|| {
                HarnessError::config(format!(
                    "service '{}' must be defined inside a harness, testgroup or testcase",
                    def.name()
                ))
            })?;
        state.tree.define_service(container, def);
        Ok(())
    }

    /// Resolve a service definition through the enclosing containers.
    pub fn lookup_service(&self, name: &str) -> Option<ServiceDef> {
        let state = self.lock();
        let container = state.innermost_container()?;
        state.tree.lookup_service(container, name)
    }

    /// Make the innermost service logger responsible for stopping `def`.
    pub fn claim_service(&self, def: &ServiceDef) -> HarnessResult<()> {
        let mut state = self.active()?;
        let id = state
            .innermost_where(&state.frames, |k| k == LoggerKind::Service)
            .ok_or_else(|| {
                HarnessError::Internal(format!(
                    "service {} started without a service logger",
                    def.name()
                ))
            })?;
        debug!(service = %def.name(), logger = %state.tree.node(id).full_name(), "Service claimed");
        state.tree.node_mut(id).claimed = Some(def.clone());
        Ok(())
    }

    /// Give up the claim on `def` after it was stopped explicitly, so a
    /// later instance can own the next run of the service.
    pub fn release_service(&self, def: &ServiceDef) {
        let mut state = self.lock();
        if let Some(id) = state.tree.release(def) {
            debug!(
                service = %def.name(),
                logger = %state.tree.node(id).full_name(),
                "Service released"
            );
        }
    }

    /// Health of the background processes a running service launched.
    pub fn service_health(&self, service: &str) -> HarnessResult<()> {
        let processes: Vec<_> = {
            let state = self.lock();
            let Some(claimant) = state.tree.claimant(service) else {
                debug!(service, "No running instance to verify");
                return Ok(());
            };
            state
                .tree
                .deferred(claimant)
                .filter(|n| n.kind() == LoggerKind::Process)
                .filter_map(|n| Some((n.name().to_string(), Arc::clone(n.process()?))))
                .collect()
        };
        for (name, process) in processes {
            if let Some(err) = process.failure() {
                return Err(HarnessError::wrap(format!("Process {name} failed"), err));
            }
            if !process.is_running() {
                return Err(HarnessError::failed(format!("Process {name} is not running")));
            }
        }
        Ok(())
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// End the run.
    ///
    /// Open frames are finished innermost first, each receiving the result
    /// of the one inside it, starting with `error`. Background processes
    /// still registered afterwards are killed. The registry refuses further
    /// work once this returns.
    pub fn shutdown(&self, error: Option<HarnessError>) -> HarnessResult<()> {
        let mut result = error.map_or(Ok(()), Err);
        loop {
            let top = self.active()?.frames.last().map(|f| Arc::clone(&f.task));
            let Some(task) = top else {
                break;
            };
            result = self.task_finished(&task, result);
        }

        if let Err(e) = self.processes.kill_all(self) {
            if result.is_ok() {
                result = Err(e);
            } else {
                error!(error = %e.message_chain(), "Killing leftover processes failed");
            }
        }

        self.project.fire_build_finished(result.as_ref().err());
        let listener = {
            let mut state = self.lock();
            state.phase = Phase::ShutDown;
            state.error_listener.take()
        };
        if let Some(id) = listener {
            self.project.remove_build_listener(id);
        }
        info!(
            project = %self.project.name(),
            passed = result.is_ok(),
            "Harness run finished"
        );
        result
    }
}

/// Reports the failures of a run when the build finishes.
struct FailureSummary {
    first: String,
    failed_tasks: AtomicUsize,
}

impl FailureSummary {
    fn new(first: String) -> Self {
        Self {
            first,
            failed_tasks: AtomicUsize::new(1),
        }
    }
}

impl BuildListener for FailureSummary {
    fn task_finished(&self, event: &TaskEvent<'_>) {
        if event.error.is_some_and(HarnessError::is_build_failure) {
            self.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn build_finished(&self, project: &Project, _error: Option<&HarnessError>) {
        error!(
            project = %project.name(),
            first_failure = %self.first,
            failed_tasks = self.failed_tasks.load(Ordering::Relaxed),
            "Harness run had failures"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ERROR_PROPERTY;
    use crate::task::Task;
    use tempfile::TempDir;

    struct Scripted {
        name: &'static str,
        kind: TaskKind,
        result: fn(&TaskRegistry) -> HarnessResult<()>,
    }

    impl Task for Scripted {
        fn task_name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> TaskKind {
            self.kind
        }

        fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
            (self.result)(registry)
        }
    }

    fn scripted(
        name: &'static str,
        kind: TaskKind,
        result: fn(&TaskRegistry) -> HarnessResult<()>,
    ) -> TaskRef {
        Arc::new(Scripted { name, kind, result })
    }

    fn start(dir: &TempDir, pattern: Option<&str>) -> (Arc<Project>, Arc<TaskRegistry>) {
        let project = Arc::new(Project::new("unit", dir.path()));
        let config = HarnessConfig {
            results_dir: dir.path().join("results"),
            pattern: pattern.map(str::to_string),
            ..HarnessConfig::default()
        };
        let top = scripted("suite", TaskKind::Harness, |_| Ok(()));
        let registry = TaskRegistry::init(Arc::clone(&project), top, config).unwrap();
        (project, registry)
    }

    fn result_files(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("results"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_execute_writes_one_record() {
        let dir = TempDir::new().unwrap();
        let (_project, registry) = start(&dir, None);
        registry
            .execute(&scripted("echo", TaskKind::Other, |r| {
                r.log(priority::INFO, "hello");
                Ok(())
            }))
            .unwrap();
        registry.shutdown(None).unwrap();
        assert_eq!(result_files(&dir), vec!["TASK_echo.xml", "XHARNESS_suite.xml"]);
    }

    #[test]
    fn test_first_failure_sets_error_property_once() {
        let dir = TempDir::new().unwrap();
        let (project, registry) = start(&dir, None);
        let first = scripted("a", TaskKind::Other, |_| Err(HarnessError::failed("first")));
        let second = scripted("b", TaskKind::Other, |_| Err(HarnessError::failed("second")));
        assert!(registry.execute(&first).is_err());
        assert!(registry.execute(&second).is_err());
        assert_eq!(
            project.property(DEFAULT_ERROR_PROPERTY).as_deref(),
            Some("first")
        );
        let _ = registry.shutdown(None);
    }

    #[test]
    fn test_deselected_group_is_swallowed_without_record() {
        let dir = TempDir::new().unwrap();
        let (_project, registry) = start(&dir, Some("wanted"));
        let group = scripted("other", TaskKind::TestGroup, |r| r.check_selected());
        assert!(registry.execute(&group).is_ok());
        registry.shutdown(None).unwrap();
        assert_eq!(result_files(&dir), vec!["XHARNESS_suite.xml"]);
    }

    #[test]
    fn test_get_logger_excludes_caller() {
        let dir = TempDir::new().unwrap();
        let (_project, registry) = start(&dir, None);
        registry.execute(&scripted("first", TaskKind::Other, |_| Ok(()))).unwrap();
        let lookup = scripted("lookup", TaskKind::Other, |r| {
            let found = r.get_logger(None).map(|l| l.name);
            if found.as_deref() == Some("first") {
                Ok(())
            } else {
                Err(HarnessError::failed(format!("found {found:?}")))
            }
        });
        registry.execute(&lookup).unwrap();
        registry.shutdown(None).unwrap();
    }

    #[test]
    fn test_foreign_finish_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (_project, registry) = start(&dir, None);
        let stray = scripted("stray", TaskKind::Other, |_| Ok(()));
        let result = registry.task_finished(&stray, Err(HarnessError::failed("x")));
        assert!(result.is_err());
        assert_eq!(registry.inspect(|t| t.len()), 1);
        let _ = registry.shutdown(None);
    }

    #[test]
    fn test_use_after_shutdown_is_internal_error() {
        let dir = TempDir::new().unwrap();
        let (_project, registry) = start(&dir, None);
        registry.shutdown(None).unwrap();
        let err = registry
            .execute(&scripted("late", TaskKind::Other, |_| Ok(())))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Internal(_)), "{err:?}");
    }

    #[test]
    fn test_shutdown_error_reaches_root_record() {
        let dir = TempDir::new().unwrap();
        let (_project, registry) = start(&dir, None);
        let err = registry
            .shutdown(Some(HarnessError::failed("boom")))
            .unwrap_err();
        assert_eq!(err.message(), "boom");
        let xml = std::fs::read_to_string(dir.path().join("results/XHARNESS_suite.xml")).unwrap();
        assert!(xml.contains(r#"result="Failed""#), "{xml}");
    }
}
