//! Logger tree.
//!
//! Loggers live in an arena ([`LoggerTree`]) and are addressed by
//! [`LoggerId`]. A node is created when its task starts and writes exactly
//! one result record when it is finished, either directly or from its
//! container's queue of pending finalizers.
//!
//! | Kind        | Container | Finished                                  |
//! |-------------|-----------|-------------------------------------------|
//! | `Task`      | no        | immediately                               |
//! | `Test`      | yes       | after draining its pending finalizers     |
//! | `Service`   | yes       | deferred to the parent when it owns a run |
//! | `SvcsStart` | no        | deferred into the enclosing service       |
//! | `Process`   | no        | deferred (and killed) when in background  |

mod outcome;

pub use outcome::classify;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::{LineBuffer, SharedBuffer, priority};
use crate::error::HarnessResult;
use crate::formatter::TaskType;
use crate::process::BgProcess;
use crate::service::ServiceDef;
use crate::task::{ServicePhase, TaskKind, TaskRef};

/// Arena index of a logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoggerId(usize);

impl LoggerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Behaviour of a logger node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoggerKind {
    Task,
    Test,
    Service,
    SvcsStart,
    Process,
}

impl LoggerKind {
    pub fn is_container(self) -> bool {
        matches!(self, Self::Test | Self::Service)
    }
}

/// Pick logger kind and result type for a started task. Pass-through
/// containers get no logger.
pub fn logger_for(
    kind: TaskKind,
    service_reachable: bool,
    is_process: bool,
) -> Option<(LoggerKind, TaskType)> {
    let selected = match kind {
        TaskKind::PassThrough => return None,
        TaskKind::Harness => (LoggerKind::Test, TaskType::Xharness),
        TaskKind::TestGroup => (LoggerKind::Test, TaskType::TestGroup),
        TaskKind::TestCase => (LoggerKind::Test, TaskType::TestCase),
        TaskKind::ServiceDef => (LoggerKind::Test, TaskType::Service),
        TaskKind::ServiceInstance if service_reachable => (LoggerKind::Service, TaskType::Service),
        TaskKind::ServiceInstance => (LoggerKind::Task, TaskType::Service),
        TaskKind::Phase(ServicePhase::Start) => (LoggerKind::SvcsStart, TaskType::Start),
        TaskKind::Phase(ServicePhase::Verify) => (LoggerKind::Task, TaskType::Verify),
        TaskKind::Phase(ServicePhase::Stop) => (LoggerKind::Task, TaskType::Stop),
        TaskKind::Process if is_process => (LoggerKind::Process, TaskType::ProcessTask),
        TaskKind::Process => (LoggerKind::Task, TaskType::ProcessTask),
        TaskKind::Link => (LoggerKind::Task, TaskType::Link),
        TaskKind::Other => (LoggerKind::Task, TaskType::OtherTask),
    };
    Some(selected)
}

/// One node of the logger tree.
pub struct LoggerNode {
    pub(crate) id: LoggerId,
    pub(crate) order: u64,
    pub(crate) kind: LoggerKind,
    pub(crate) task: TaskRef,
    pub(crate) task_type: TaskType,
    pub(crate) name: String,
    pub(crate) parent_name: String,
    pub(crate) full_name: String,
    pub(crate) reference: Option<String>,
    pub(crate) buffer: SharedBuffer,
    pub(crate) active: bool,
    pub(crate) parent: Option<LoggerId>,
    pub(crate) children: Vec<LoggerId>,
    pub(crate) deferred: VecDeque<LoggerId>,
    pub(crate) services: HashMap<String, ServiceDef>,
    pub(crate) claimed: Option<ServiceDef>,
    /// Background process handle, captured when a process logger is
    /// deferred. The task may launch again before the logger is finished.
    pub(crate) process: Option<Arc<BgProcess>>,
    pub(crate) pending: Option<HarnessResult<()>>,
    pub(crate) finished: bool,
    pub(crate) started: Instant,
}

impl LoggerNode {
    pub fn id(&self) -> LoggerId {
        self.id
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    pub fn kind(&self) -> LoggerKind {
        self.kind
    }

    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_name(&self) -> &str {
        &self.parent_name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn parent(&self) -> Option<LoggerId> {
        self.parent
    }

    pub fn children(&self) -> &[LoggerId] {
        &self.children
    }

    pub fn process(&self) -> Option<&Arc<BgProcess>> {
        self.process.as_ref()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

/// Arena of loggers for one harness run.
#[derive(Default)]
pub struct LoggerTree {
    nodes: Vec<LoggerNode>,
    next_order: u64,
}

impl LoggerTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: LoggerId) -> &LoggerNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: LoggerId) -> &mut LoggerNode {
        &mut self.nodes[id.0]
    }

    /// Create the root logger for the top-level harness task. Its name is
    /// not part of its descendants' full names.
    pub fn create_root(&mut self, task: TaskRef) -> LoggerId {
        let name = task.display_name().to_string();
        self.push(NewNode {
            kind: LoggerKind::Test,
            task_type: TaskType::Xharness,
            task,
            parent: None,
            parent_name: String::new(),
            full_name: name.clone(),
            name,
            active: true,
        })
    }

    /// Create a logger under `container`. Repeated names at the same level
    /// get `_1`, `_2`, ... suffixes and the new node inherits the
    /// container's inactive flag.
    pub fn create_child(
        &mut self,
        container: LoggerId,
        task: TaskRef,
        kind: LoggerKind,
        task_type: TaskType,
    ) -> LoggerId {
        let name = self.unique_child_name(container, task.display_name());
        let parent = self.node(container);
        let full_name = if parent.parent.is_none() {
            name.clone()
        } else {
            format!("{}/{}", parent.full_name, name)
        };
        let parent_name = parent.name.clone();
        let active = parent.active;
        let id = self.push(NewNode {
            kind,
            task_type,
            task,
            parent: Some(container),
            parent_name,
            full_name,
            name,
            active,
        });
        self.node_mut(container).children.push(id);
        id
    }

    fn unique_child_name(&self, container: LoggerId, base: &str) -> String {
        let taken = |candidate: &str| -> bool {
            self.node(container)
                .children
                .iter()
                .any(|c| self.node(*c).name == candidate)
        };
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !taken(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    fn push(&mut self, new: NewNode) -> LoggerId {
        let id = LoggerId(self.nodes.len());
        let order = self.next_order;
        self.next_order += 1;
        let reference = new.task.reference();
        tracing::debug!(
            order,
            kind = ?new.kind,
            task_type = %new.task_type,
            full_name = %new.full_name,
            "Created logger"
        );
        self.nodes.push(LoggerNode {
            id,
            order,
            kind: new.kind,
            task: new.task,
            task_type: new.task_type,
            name: new.name,
            parent_name: new.parent_name,
            full_name: new.full_name,
            reference,
            buffer: LineBuffer::shared(priority::INFO),
            active: new.active,
            parent: new.parent,
            children: Vec::new(),
            deferred: VecDeque::new(),
            services: HashMap::new(),
            claimed: None,
            process: None,
            pending: None,
            finished: false,
            started: Instant::now(),
        });
        id
    }

    /// Child lookup in `container`.
    ///
    /// * `None` or `""`: the latest child
    /// * `"0"`: nothing
    /// * `"n"`: the n-th child, 1-based
    /// * `"-n"`: the n-th child counting from the end
    /// * anything else: the child with that name
    ///
    /// `exclude` hides one child, normally the logger of the asking task.
    pub fn get_task(
        &self,
        container: LoggerId,
        spec: Option<&str>,
        exclude: Option<LoggerId>,
    ) -> Option<LoggerId> {
        let children: Vec<LoggerId> = self
            .node(container)
            .children
            .iter()
            .copied()
            .filter(|c| Some(*c) != exclude)
            .collect();

        let spec = spec.map(str::trim).unwrap_or("");
        if spec.is_empty() {
            return children.last().copied();
        }
        match spec.parse::<i64>() {
            Ok(0) => None,
            Ok(n) if n > 0 => children.get(usize::try_from(n - 1).ok()?).copied(),
            Ok(n) => {
                let back = usize::try_from(n.unsigned_abs()).ok()?;
                children
                    .len()
                    .checked_sub(back)
                    .and_then(|i| children.get(i))
                    .copied()
            }
            Err(_) => children
                .iter()
                .copied()
                .find(|c| self.node(*c).name == spec),
        }
    }

    /// Mark `id` and its subtree inactive, and its ancestors too when
    /// `cascade_to_parent` is set.
    pub fn deactivate(&mut self, id: LoggerId, cascade_to_parent: bool) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node_mut(current);
            node.active = false;
            stack.extend(node.children.iter().copied());
        }
        if cascade_to_parent {
            let mut parent = self.node(id).parent;
            while let Some(p) = parent {
                self.node_mut(p).active = false;
                parent = self.node(p).parent;
            }
        }
    }

    /// Reactivate `id` only.
    pub fn activate(&mut self, id: LoggerId) {
        self.node_mut(id).active = true;
    }

    pub fn define_service(&mut self, container: LoggerId, def: ServiceDef) {
        tracing::debug!(
            service = %def.name(),
            container = %self.node(container).full_name,
            "Defined service"
        );
        self.node_mut(container)
            .services
            .insert(def.name().to_string(), def);
    }

    /// Find a service definition in `from` or any of its ancestors.
    pub fn lookup_service(&self, from: LoggerId, name: &str) -> Option<ServiceDef> {
        let mut current = Some(from);
        while let Some(id) = current {
            let node = self.node(id);
            if let Some(def) = node.services.get(name) {
                return Some(def.clone());
            }
            current = node.parent;
        }
        None
    }

    /// The unfinished service logger that owns the running `service`.
    pub fn claimant(&self, service: &str) -> Option<LoggerId> {
        self.nodes
            .iter()
            .rev()
            .find(|n| {
                !n.finished
                    && n.claimed
                        .as_ref()
                        .is_some_and(|def| def.name() == service)
            })
            .map(|n| n.id)
    }

    /// Drop the claim an unfinished service logger holds on `def`, so its
    /// deferred finalizer no longer stops the service.
    pub(crate) fn release(&mut self, def: &ServiceDef) -> Option<LoggerId> {
        let node = self.nodes.iter_mut().rev().find(|n| {
            !n.finished && n.claimed.as_ref().is_some_and(|claimed| claimed.same_as(def))
        })?;
        node.claimed = None;
        Some(node.id)
    }

    /// Loggers queued for deferred finalization on `container`.
    pub fn deferred(&self, container: LoggerId) -> impl Iterator<Item = &LoggerNode> {
        self.node(container)
            .deferred
            .iter()
            .map(|id| self.node(*id))
    }
}

struct NewNode {
    kind: LoggerKind,
    task_type: TaskType,
    task: TaskRef,
    parent: Option<LoggerId>,
    parent_name: String,
    full_name: String,
    name: String,
    active: bool,
}

/// A read-only view of a logger handed out by lookups.
#[derive(Clone)]
pub struct LoggerInfo {
    pub id: LoggerId,
    pub name: String,
    pub full_name: String,
    pub task_type: TaskType,
    pub buffer: SharedBuffer,
    pub task: TaskRef,
}

impl LoggerInfo {
    pub(crate) fn of(node: &LoggerNode) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            full_name: node.full_name.clone(),
            task_type: node.task_type,
            buffer: Arc::clone(&node.buffer),
            task: Arc::clone(&node.task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TaskRegistry;
    use crate::task::Task;

    struct Named(String, TaskKind);

    impl Task for Named {
        fn task_name(&self) -> &str {
            &self.0
        }

        fn kind(&self) -> TaskKind {
            self.1
        }

        fn execute(&self, _registry: &TaskRegistry) -> HarnessResult<()> {
            Ok(())
        }
    }

    fn task(name: &str, kind: TaskKind) -> TaskRef {
        Arc::new(Named(name.to_string(), kind))
    }

    fn tree_with_children(names: &[&str]) -> (LoggerTree, LoggerId, Vec<LoggerId>) {
        let mut tree = LoggerTree::new();
        let root = tree.create_root(task("suite", TaskKind::Harness));
        let children = names
            .iter()
            .map(|n| {
                tree.create_child(
                    root,
                    task(n, TaskKind::Other),
                    LoggerKind::Task,
                    TaskType::OtherTask,
                )
            })
            .collect();
        (tree, root, children)
    }

    #[test]
    fn test_positional_lookup() {
        let (tree, root, c) = tree_with_children(&["c1", "c2", "c3"]);
        assert_eq!(tree.get_task(root, Some("1"), None), Some(c[0]));
        assert_eq!(tree.get_task(root, Some("2"), None), Some(c[1]));
        assert_eq!(tree.get_task(root, Some("-1"), None), Some(c[2]));
        assert_eq!(tree.get_task(root, Some("-3"), None), Some(c[0]));
        assert_eq!(tree.get_task(root, Some(""), None), Some(c[2]));
        assert_eq!(tree.get_task(root, None, None), Some(c[2]));
        assert_eq!(tree.get_task(root, Some("0"), None), None);
        assert_eq!(tree.get_task(root, Some("4"), None), None);
        assert_eq!(tree.get_task(root, Some("-4"), None), None);
        assert_eq!(tree.get_task(root, Some("c2"), None), Some(c[1]));
        assert_eq!(tree.get_task(root, Some("nope"), None), None);
    }

    #[test]
    fn test_lookup_excludes_asking_logger() {
        let (tree, root, c) = tree_with_children(&["c1", "c2", "asker"]);
        assert_eq!(tree.get_task(root, None, Some(c[2])), Some(c[1]));
        assert_eq!(tree.get_task(root, Some("-1"), Some(c[2])), Some(c[1]));
    }

    #[test]
    fn test_duplicate_names_get_suffixes() {
        let (tree, root, c) = tree_with_children(&["echo", "echo", "echo"]);
        let names: Vec<_> = c.iter().map(|id| tree.node(*id).name().to_string()).collect();
        assert_eq!(names, vec!["echo", "echo_1", "echo_2"]);
        assert_eq!(tree.get_task(root, Some("echo_1"), None), Some(c[1]));
    }

    #[test]
    fn test_full_names_exclude_root() {
        let mut tree = LoggerTree::new();
        let root = tree.create_root(task("suite", TaskKind::Harness));
        let group = tree.create_child(
            root,
            task("db", TaskKind::TestGroup),
            LoggerKind::Test,
            TaskType::TestGroup,
        );
        let case = tree.create_child(
            group,
            task("connect", TaskKind::TestCase),
            LoggerKind::Test,
            TaskType::TestCase,
        );
        assert_eq!(tree.node(root).full_name(), "suite");
        assert_eq!(tree.node(group).full_name(), "db");
        assert_eq!(tree.node(group).parent_name(), "suite");
        assert_eq!(tree.node(case).full_name(), "db/connect");
        assert!(tree.node(case).order() > tree.node(group).order());
    }

    #[test]
    fn test_deactivate_cascades() {
        let mut tree = LoggerTree::new();
        let root = tree.create_root(task("suite", TaskKind::Harness));
        let group = tree.create_child(
            root,
            task("g", TaskKind::TestGroup),
            LoggerKind::Test,
            TaskType::TestGroup,
        );
        let leaf = tree.create_child(
            group,
            task("t", TaskKind::Other),
            LoggerKind::Task,
            TaskType::OtherTask,
        );

        tree.deactivate(group, false);
        assert!(tree.node(root).is_active());
        assert!(!tree.node(group).is_active());
        assert!(!tree.node(leaf).is_active());

        let late = tree.create_child(
            group,
            task("u", TaskKind::Other),
            LoggerKind::Task,
            TaskType::OtherTask,
        );
        assert!(!tree.node(late).is_active());

        tree.activate(group);
        assert!(tree.node(group).is_active());
        assert!(!tree.node(leaf).is_active());

        tree.deactivate(leaf, true);
        assert!(!tree.node(group).is_active());
        assert!(!tree.node(root).is_active());
    }

    #[test]
    fn test_logger_selection() {
        assert_eq!(logger_for(TaskKind::PassThrough, false, false), None);
        assert_eq!(
            logger_for(TaskKind::ServiceInstance, true, false),
            Some((LoggerKind::Service, TaskType::Service))
        );
        assert_eq!(
            logger_for(TaskKind::ServiceInstance, false, false),
            Some((LoggerKind::Task, TaskType::Service))
        );
        assert_eq!(
            logger_for(TaskKind::Phase(ServicePhase::Start), false, false),
            Some((LoggerKind::SvcsStart, TaskType::Start))
        );
        assert_eq!(
            logger_for(TaskKind::Process, false, true),
            Some((LoggerKind::Process, TaskType::ProcessTask))
        );
    }
}
