use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::background::BgProcess;
use crate::error::{HarnessError, HarnessResult};
use crate::registry::TaskRegistry;

/// Background processes of a run, by name.
#[derive(Default)]
pub struct ProcessRegistry {
    processes: Mutex<HashMap<String, Arc<BgProcess>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn processes(&self) -> MutexGuard<'_, HashMap<String, Arc<BgProcess>>> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `process` under its name. A name that is already taken is
    /// a configuration error.
    pub fn register(&self, process: Arc<BgProcess>) -> HarnessResult<()> {
        let mut processes = self.processes();
        let name = process.name().to_string();
        if processes.contains_key(&name) {
            return Err(HarnessError::config(format!(
                "a background process named '{name}' is already running"
            )));
        }
        debug!(process = %name, "Registered background process");
        processes.insert(name, process);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes().contains_key(name)
    }

    pub fn get(&self, name: &str) -> HarnessResult<Arc<BgProcess>> {
        let processes = self.processes();
        processes.get(name).cloned().ok_or_else(|| {
            let mut known: Vec<&str> = processes.keys().map(String::as_str).collect();
            known.sort_unstable();
            let known = if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            };
            HarnessError::failed(format!(
                "no background process named '{name}' is running (running: {known})"
            ))
        })
    }

    /// Remove `process` if it is the one registered under its name.
    pub fn unregister(&self, process: &BgProcess) -> bool {
        let mut processes = self.processes();
        let owned = processes
            .get(process.name())
            .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), process));
        if owned {
            processes.remove(process.name());
            debug!(process = %process.name(), "Unregistered background process");
        }
        owned
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processes().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.processes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes().is_empty()
    }

    /// Kill every registered process. Returns the first failure.
    pub fn kill_all(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let remaining: Vec<Arc<BgProcess>> = self.processes().values().cloned().collect();
        let mut first = None;
        for process in remaining {
            warn!(process = %process.name(), "Killing leftover background process");
            if let Err(e) = process.kill(registry) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
