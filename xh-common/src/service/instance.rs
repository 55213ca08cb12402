use std::fmt;
use std::ops::BitOr;

use crate::error::{HarnessError, HarnessResult};
use crate::registry::TaskRegistry;
use crate::service::ServiceState;
use crate::task::{Task, TaskKind};

/// Set of lifecycle actions a [`ServiceInstance`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceActions(u8);

impl ServiceActions {
    pub const NONE: Self = Self(0);
    pub const START: Self = Self(1);
    pub const VERIFY: Self = Self(2);
    pub const STOP: Self = Self(4);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse a comma-separated action list such as `"start,verify"`.
    pub fn parse(value: &str) -> HarnessResult<Self> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .try_fold(Self::NONE, |acc, action| {
                let flag = match action.to_ascii_lowercase().as_str() {
                    "start" => Self::START,
                    "verify" => Self::VERIFY,
                    "stop" => Self::STOP,
                    other => {
                        return Err(HarnessError::config(format!(
                            "unknown service action '{other}' (expected start, verify or stop)"
                        )));
                    }
                };
                Ok(acc | flag)
            })
    }
}

impl Default for ServiceActions {
    fn default() -> Self {
        Self::START | Self::VERIFY
    }
}

impl BitOr for ServiceActions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for ServiceActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::START, "start"),
            (Self::VERIFY, "verify"),
            (Self::STOP, "stop"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join(","))
    }
}

/// A use of a service definition, resolved by name through the enclosing
/// containers.
pub struct ServiceInstance {
    service: String,
    actions: ServiceActions,
}

impl ServiceInstance {
    pub fn new(service: impl Into<String>, actions: ServiceActions) -> Self {
        Self {
            service: service.into(),
            actions,
        }
    }

    pub fn actions(&self) -> ServiceActions {
        self.actions
    }
}

impl Task for ServiceInstance {
    fn task_name(&self) -> &str {
        "service"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.service)
    }

    fn kind(&self) -> TaskKind {
        TaskKind::ServiceInstance
    }

    fn reference(&self) -> Option<String> {
        Some(self.service.clone())
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let def = registry.lookup_service(&self.service).ok_or_else(|| {
            HarnessError::config(format!("service '{}' is not defined", self.service))
        })?;

        if self.actions.contains(ServiceActions::START) {
            def.was_stopped();
            if def.state() == ServiceState::Unstarted {
                registry.claim_service(&def)?;
            }
            def.start(registry)?;
        }
        if self.actions.contains(ServiceActions::VERIFY) {
            def.verify(registry)?;
        }
        if self.actions.contains(ServiceActions::STOP) {
            let stopped = def.stop(registry);
            registry.release_service(&def);
            stopped?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_actions() {
        let actions = ServiceActions::default();
        assert!(actions.contains(ServiceActions::START));
        assert!(actions.contains(ServiceActions::VERIFY));
        assert!(!actions.contains(ServiceActions::STOP));
        assert_eq!(actions.to_string(), "start,verify");
    }

    #[test]
    fn test_parse_actions() {
        let actions = ServiceActions::parse("Stop, start").unwrap();
        assert_eq!(actions, ServiceActions::START | ServiceActions::STOP);
        assert_eq!(ServiceActions::parse("").unwrap(), ServiceActions::NONE);
        assert!(matches!(
            ServiceActions::parse("restart"),
            Err(HarnessError::Config(_))
        ));
    }
}
