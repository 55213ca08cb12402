//! Build-engine substrate: project properties and lifecycle listeners.
//!
//! The harness core only needs a small slice of a build engine: a property
//! store (with write-once user properties), a base directory, and a way to
//! broadcast task and message events to interested listeners.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock};

use regex::{Captures, Regex};

use crate::error::HarnessError;
use crate::task::TaskRef;

static PROPERTY_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid property regex"));

/// A task lifecycle event.
pub struct TaskEvent<'a> {
    pub task: &'a TaskRef,
    pub error: Option<&'a HarnessError>,
}

/// A message logged by a task or by the harness.
pub struct MessageEvent<'a> {
    pub priority: i32,
    pub message: &'a str,
}

/// Observer of build events. All methods default to no-ops.
pub trait BuildListener: Send + Sync {
    fn task_started(&self, _event: &TaskEvent<'_>) {}
    fn task_finished(&self, _event: &TaskEvent<'_>) {}
    fn message_logged(&self, _event: &MessageEvent<'_>) {}
    fn build_finished(&self, _project: &Project, _error: Option<&HarnessError>) {}
}

/// Handle returned by [`Project::add_build_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The build project a harness run executes in.
pub struct Project {
    name: String,
    base_dir: PathBuf,
    properties: RwLock<HashMap<String, String>>,
    user_properties: RwLock<HashMap<String, String>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn BuildListener>)>>,
    next_listener: AtomicU64,
}

impl Project {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
            properties: RwLock::new(HashMap::new()),
            user_properties: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve `path` against the base directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Look up a property. User properties shadow ordinary ones.
    pub fn property(&self, name: &str) -> Option<String> {
        if let Some(value) = self.user_property(name) {
            return Some(value);
        }
        self.properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Set an ordinary property. Has no effect on names fixed as user
    /// properties.
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let fixed = self
            .user_properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&name);
        if fixed {
            tracing::debug!(property = %name, "Ignoring override of user property");
            return;
        }
        self.properties
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, value.into());
    }

    /// Set a user property once. Returns false when it was already set.
    pub fn set_user_property(&self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        let mut user = self.user_properties.write().unwrap_or_else(|e| e.into_inner());
        if user.contains_key(&name) {
            return false;
        }
        user.insert(name, value.into());
        true
    }

    pub fn user_property(&self, name: &str) -> Option<String> {
        self.user_properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Replace `${name}` references with property values. Unknown
    /// references are left untouched.
    pub fn expand(&self, text: &str) -> String {
        PROPERTY_REF
            .replace_all(text, |caps: &Captures<'_>| {
                self.property(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    pub fn add_build_listener(&self, listener: Arc<dyn BuildListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed) + 1);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    pub fn remove_build_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(lid, _)| *lid != id);
    }

    // Listeners may register further listeners while handling an event, so
    // every broadcast works on a snapshot.
    fn snapshot(&self) -> Vec<Arc<dyn BuildListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    pub fn fire_task_started(&self, task: &TaskRef) {
        let event = TaskEvent { task, error: None };
        for listener in self.snapshot() {
            listener.task_started(&event);
        }
    }

    pub fn fire_task_finished(&self, task: &TaskRef, error: Option<&HarnessError>) {
        let event = TaskEvent { task, error };
        for listener in self.snapshot() {
            listener.task_finished(&event);
        }
    }

    pub fn fire_message_logged(&self, priority: i32, message: &str) {
        let event = MessageEvent { priority, message };
        for listener in self.snapshot() {
            listener.message_logged(&event);
        }
    }

    pub fn fire_build_finished(&self, error: Option<&HarnessError>) {
        for listener in self.snapshot() {
            listener.build_finished(self, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_user_property_is_write_once() {
        let project = Project::new("p", ".");
        assert!(project.set_user_property("failed", "first"));
        assert!(!project.set_user_property("failed", "second"));
        assert_eq!(project.property("failed").as_deref(), Some("first"));
    }

    #[test]
    fn test_user_property_shadows_property() {
        let project = Project::new("p", ".");
        project.set_property("host", "a");
        project.set_user_property("host", "b");
        project.set_property("host", "c");
        assert_eq!(project.property("host").as_deref(), Some("b"));
    }

    #[test]
    fn test_expand() {
        let project = Project::new("p", ".");
        project.set_property("port", "8080");
        assert_eq!(project.expand("http://localhost:${port}/"), "http://localhost:8080/");
        assert_eq!(project.expand("${missing}"), "${missing}");
    }

    #[test]
    fn test_listener_registration() {
        struct Counter(AtomicUsize);
        impl BuildListener for Counter {
            fn message_logged(&self, _event: &MessageEvent<'_>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let project = Project::new("p", ".");
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let id = project.add_build_listener(counter.clone());
        project.fire_message_logged(2, "one");
        project.remove_build_listener(id);
        project.fire_message_logged(2, "two");
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
