use std::thread;
use std::time::Duration;

use crate::buffer::priority;
use crate::error::{HarnessError, HarnessResult};
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskKind};

/// Logs a message at a given priority. `${property}` references are
/// expanded.
pub struct Echo {
    message: String,
    level: i32,
}

impl Echo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: priority::INFO,
        }
    }

    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

impl Task for Echo {
    fn task_name(&self) -> &str {
        "echo"
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        registry.log(self.level, &registry.project().expand(&self.message));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Failure,
    Warning,
    Skip,
}

/// Ends with the configured failure, warning or skip.
pub struct Fail {
    message: String,
    kind: FailKind,
}

impl Fail {
    pub fn new(kind: FailKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Task for Fail {
    fn task_name(&self) -> &str {
        "fail"
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let message = registry.project().expand(&self.message);
        Err(match self.kind {
            FailKind::Failure => HarnessError::failed(message),
            FailKind::Warning => HarnessError::warning(message),
            FailKind::Skip => HarnessError::skipped(message),
        })
    }
}

/// Skips the enclosing test depending on a property.
pub struct Skip {
    message: Option<String>,
    if_set: Option<String>,
    unless_set: Option<String>,
}

impl Skip {
    pub fn new() -> Self {
        Self {
            message: None,
            if_set: None,
            unless_set: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn if_set(mut self, property: impl Into<String>) -> Self {
        self.if_set = Some(property.into());
        self
    }

    pub fn unless_set(mut self, property: impl Into<String>) -> Self {
        self.unless_set = Some(property.into());
        self
    }
}

impl Default for Skip {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for Skip {
    fn task_name(&self) -> &str {
        "skip"
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let project = registry.project();
        let reason = match (&self.if_set, &self.unless_set) {
            (Some(p), _) if project.property(p).is_some() => format!("property {p} is set"),
            (_, Some(p)) if project.property(p).is_none() => format!("property {p} is not set"),
            (None, None) => "skipped".to_string(),
            _ => return Ok(()),
        };
        let message = match &self.message {
            Some(m) => project.expand(m),
            None => reason,
        };
        Err(HarnessError::skipped(message))
    }
}

/// Sets a project property.
pub struct SetProperty {
    name: String,
    value: String,
}

impl SetProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Task for SetProperty {
    fn task_name(&self) -> &str {
        "property"
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let project = registry.project();
        project.set_property(self.name.clone(), project.expand(&self.value));
        Ok(())
    }
}

pub struct Sleep {
    duration: Duration,
}

impl Sleep {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Task for Sleep {
    fn task_name(&self) -> &str {
        "sleep"
    }

    fn execute(&self, _registry: &TaskRegistry) -> HarnessResult<()> {
        thread::sleep(self.duration);
        Ok(())
    }
}

/// A named reference to an external resource, recorded as a link.
pub struct Link {
    name: String,
    href: String,
}

impl Link {
    pub fn new(name: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            href: href.into(),
        }
    }
}

impl Task for Link {
    fn task_name(&self) -> &str {
        "link"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Link
    }

    fn reference(&self) -> Option<String> {
        Some(self.href.clone())
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        registry.log(priority::INFO, &self.href);
        Ok(())
    }
}

/// Kills a running background process by name.
pub struct Kill {
    process: String,
}

impl Kill {
    pub fn new(process: impl Into<String>) -> Self {
        Self {
            process: process.into(),
        }
    }
}

impl Task for Kill {
    fn task_name(&self) -> &str {
        "kill"
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let name = registry.project().expand(&self.process);
        registry.processes().get(&name)?.kill(registry)
    }
}
