use std::sync::{Arc, Mutex};

use tracing::debug;

use super::background::{BackgroundOptions, BgProcess, LaunchRequest, exit_result};
use super::pump::spawn_pump;
use super::spec::{JavaSpec, ProcessSpec};
use super::watchdog::ProcessWatchdog;
use crate::buffer::priority;
use crate::error::{HarnessError, HarnessResult};
use crate::registry::TaskRegistry;
use crate::task::{ProcessTask, Task, TaskKind};

/// Runs a process, in the foreground or as a named background process.
pub struct ExecTask {
    label: &'static str,
    name: Option<String>,
    spec: ProcessSpec,
    background: Option<BackgroundOptions>,
    command_line: Mutex<Option<String>>,
    retval: Mutex<Option<i32>>,
    launched: Mutex<Option<Arc<BgProcess>>>,
}

impl ExecTask {
    pub fn new(spec: ProcessSpec) -> Self {
        Self::with_label("exec", spec)
    }

    /// A forked JVM.
    pub fn java(spec: &JavaSpec) -> HarnessResult<Self> {
        Ok(Self::with_label("java", spec.to_process_spec()?))
    }

    fn with_label(label: &'static str, spec: ProcessSpec) -> Self {
        Self {
            label,
            name: None,
            spec,
            background: None,
            command_line: Mutex::new(None),
            retval: Mutex::new(None),
            launched: Mutex::new(None),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn in_background(mut self, options: BackgroundOptions) -> Self {
        self.background = Some(options);
        self
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn run_foreground(&self, registry: &TaskRegistry, spec: &ProcessSpec) -> HarnessResult<()> {
        let name = self.display_name();
        let mut child = spec
            .command(registry.project().base_dir())
            .spawn()
            .map_err(|e| {
                HarnessError::failed(format!("Process {name} could not be launched: {e}"))
            })?;

        let sink = registry.output_sink();
        let pumps = [
            child.stdout.take().map(|out| {
                spawn_pump(out, sink.clone(), priority::STDOUT, priority::STDOUT_PARTIAL)
            }),
            child.stderr.take().map(|err| {
                spawn_pump(err, sink.clone(), priority::STDERR, priority::STDERR_PARTIAL)
            }),
        ];
        let watchdog = ProcessWatchdog::new(spec.timeout);
        let status = watchdog.supervise(&mut child, registry.config().poll_interval);
        for pump in pumps.into_iter().flatten() {
            let _ = pump.join();
        }

        let (code, result) = exit_result(name, status, &watchdog, spec.fail_on_error);
        *self.retval.lock().unwrap_or_else(|e| e.into_inner()) = code;
        debug!(process = %name, ?code, "Foreground process finished");
        result
    }

    fn launch_background(
        &self,
        registry: &TaskRegistry,
        spec: &ProcessSpec,
        options: &BackgroundOptions,
    ) -> HarnessResult<()> {
        *self.launched.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let config = registry.config();
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| self.display_name().to_string());
        if registry.processes().contains(&name) {
            return Err(HarnessError::config(format!(
                "a background process named '{name}' is already running"
            )));
        }

        let process = Arc::new(BgProcess::launch(LaunchRequest {
            name,
            spec,
            base_dir: registry.project().base_dir(),
            sink: registry.output_sink(),
            prekill: options.prekill_timeout.unwrap_or(config.prekill_timeout),
            postkill: options.postkill_timeout.unwrap_or(config.postkill_timeout),
            startup_grace: options.startup_grace.unwrap_or(config.startup_grace),
            poll_interval: config.poll_interval,
            afterwards: options.afterwards.clone(),
        })?);

        *self.launched.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&process));
        registry.processes().register(process)
    }
}

impl Task for ExecTask {
    fn task_name(&self) -> &str {
        self.label
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Process
    }

    fn execute(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        let spec = self.spec.expanded(registry.project());
        let command_line = spec.command_line();
        registry.log(priority::VERBOSE, &format!("Executing {command_line}"));
        *self.command_line.lock().unwrap_or_else(|e| e.into_inner()) = Some(command_line);

        match &self.background {
            None => self.run_foreground(registry, &spec),
            Some(options) => self.launch_background(registry, &spec, options),
        }
    }

    fn as_process(&self) -> Option<&dyn ProcessTask> {
        Some(self)
    }
}

impl ProcessTask for ExecTask {
    fn command_line(&self) -> String {
        self.command_line
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| self.spec.command_line())
    }

    fn return_value(&self) -> Option<i32> {
        match self.background() {
            Some(process) => process.exit_code(),
            None => *self.retval.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    fn background(&self) -> Option<Arc<BgProcess>> {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
