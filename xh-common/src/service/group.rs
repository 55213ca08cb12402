use crate::error::HarnessResult;
use crate::registry::TaskRegistry;
use crate::task::{ServicePhase, Task, TaskKind, TaskRef};

/// The start, verify or stop group of a service. Runs its tasks in order
/// and stops at the first error.
pub struct ServiceGroup {
    phase: ServicePhase,
    service: String,
    tasks: Vec<TaskRef>,
}

impl ServiceGroup {
    pub fn new(phase: ServicePhase, service: &str, tasks: Vec<TaskRef>) -> Self {
        Self {
            phase,
            service: service.to_string(),
            tasks,
        }
    }

    pub fn phase(&self) -> ServicePhase {
        self.phase
    }
}

impl Task for ServiceGroup {
    fn task_name(&self) -> &str {
        self.phase.as_str()
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Phase(self.phase)
    }

    fn reference(&self) -> Option<String> {
        Some(self.service.clone())
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        for task in &self.tasks {
            registry.execute(task)?;
        }
        Ok(())
    }
}

/// Verify phase used for services without a verify group: fails when a
/// background process launched while starting the service has failed or
/// exited.
pub struct DummyVerify {
    service: String,
}

impl DummyVerify {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }
}

impl Task for DummyVerify {
    fn task_name(&self) -> &str {
        "verify"
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Phase(ServicePhase::Verify)
    }

    fn reference(&self) -> Option<String> {
        Some(self.service.clone())
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        registry.service_health(&self.service)
    }
}
