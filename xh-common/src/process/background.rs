//! Background processes and the kill protocol.
//!
//! Each background process runs on its own worker thread, which spawns the
//! child, pumps its output and supervises it through a
//! [`ProcessWatchdog`]. The launching thread learns the launch outcome over
//! a channel and waits up to the startup grace for an early exit; failures
//! that arrive later are kept by the worker and raised by [`BgProcess::kill`].

use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::pump::spawn_pump;
use super::spec::ProcessSpec;
use super::watchdog::ProcessWatchdog;
use crate::buffer::{SharedBuffer, priority};
use crate::error::{HarnessError, HarnessResult};
use crate::registry::TaskRegistry;
use crate::task::TaskRef;

/// Per-task settings for running a process in the background. Unset
/// timeouts fall back to the run configuration.
#[derive(Clone, Default)]
pub struct BackgroundOptions {
    /// Registry key; the task's name when unset.
    pub name: Option<String>,
    /// Wait this long for a natural exit before forcing the process.
    pub prekill_timeout: Option<Duration>,
    /// Wait this long for a forced process to go away.
    pub postkill_timeout: Option<Duration>,
    pub startup_grace: Option<Duration>,
    /// Tasks run after a successful kill.
    pub afterwards: Vec<TaskRef>,
}

/// Everything [`BgProcess::launch`] needs.
pub struct LaunchRequest<'a> {
    pub name: String,
    pub spec: &'a ProcessSpec,
    pub base_dir: &'a Path,
    pub sink: SharedBuffer,
    pub prekill: Duration,
    pub postkill: Duration,
    pub startup_grace: Duration,
    pub poll_interval: Duration,
    pub afterwards: Vec<TaskRef>,
}

enum LaunchSignal {
    Launched { pid: u32 },
    LaunchFailed(HarnessError),
    Exited(HarnessResult<()>),
}

#[derive(Default)]
struct WorkerState {
    running: bool,
    pid: Option<u32>,
    exit_code: Option<i32>,
    failure: Option<HarnessError>,
}

/// Handle to a process running on a worker thread.
pub struct BgProcess {
    name: String,
    command_line: String,
    prekill: Duration,
    postkill: Duration,
    poll_interval: Duration,
    watchdog: Arc<ProcessWatchdog>,
    state: Arc<Mutex<WorkerState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    afterwards: Vec<TaskRef>,
    kill_started: AtomicBool,
}

impl BgProcess {
    /// Start the process and wait up to the startup grace for it to fail.
    ///
    /// A launch that is not confirmed within the grace period is treated
    /// as running; a failure reported after that is raised by `kill`.
    pub fn launch(request: LaunchRequest<'_>) -> HarnessResult<Self> {
        let LaunchRequest {
            name,
            spec,
            base_dir,
            sink,
            prekill,
            postkill,
            startup_grace,
            poll_interval,
            afterwards,
        } = request;

        let (tx, rx) = mpsc::channel();
        let watchdog = Arc::new(ProcessWatchdog::new(spec.timeout));
        let state = Arc::new(Mutex::new(WorkerState {
            running: true,
            ..WorkerState::default()
        }));

        let worker = Worker {
            name: name.clone(),
            command: spec.command(base_dir),
            fail_on_error: spec.fail_on_error,
            watchdog: Arc::clone(&watchdog),
            state: Arc::clone(&state),
            sink,
            poll_interval,
        };
        let handle = thread::Builder::new()
            .name(format!("xh-bg-{name}"))
            .spawn(move || worker.run(tx))
            .map_err(|e| HarnessError::io(format!("spawning worker for process {name}"), e))?;

        let process = Self {
            command_line: spec.command_line(),
            name,
            prekill,
            postkill,
            poll_interval,
            watchdog,
            state,
            worker: Mutex::new(Some(handle)),
            afterwards,
            kill_started: AtomicBool::new(false),
        };

        let deadline = Instant::now() + startup_grace;
        let remaining = || deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining()) {
            Ok(LaunchSignal::Launched { pid }) => {
                info!(process = %process.name, pid, "Background process launched");
            }
            Ok(LaunchSignal::LaunchFailed(err)) => {
                process.join_worker();
                return Err(err);
            }
            Ok(LaunchSignal::Exited(result)) => {
                process.join_worker();
                return result.map(|()| process);
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(process = %process.name, "Launch not confirmed within startup grace");
                return Ok(process);
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(HarnessError::Internal(format!(
                    "worker for process {} ended without reporting",
                    process.name
                )));
            }
        }

        match rx.recv_timeout(remaining()) {
            Ok(LaunchSignal::Exited(Err(err))) => {
                process.join_worker();
                Err(err)
            }
            Ok(LaunchSignal::Exited(Ok(()))) => {
                debug!(process = %process.name, "Background process exited during startup grace");
                Ok(process)
            }
            _ => Ok(process),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn watchdog(&self) -> &ProcessWatchdog {
        &self.watchdog
    }

    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the worker is still supervising the child.
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn pid(&self) -> Option<u32> {
        self.state().pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state().exit_code
    }

    /// The failure the worker recorded, if any, without consuming it.
    pub fn failure(&self) -> Option<HarnessError> {
        self.state().failure.clone()
    }

    fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(process = %self.name, "Worker thread panicked");
        }
    }

    fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn terminate(&self) -> HarnessResult<()> {
        if !self.prekill.is_zero() {
            if self.wait_for_exit(self.prekill) {
                debug!(process = %self.name, "Process exited before pre-kill timeout");
                return Ok(());
            }
            self.watchdog.request_kill(false);
        } else {
            self.watchdog.request_kill(true);
        }

        if self.wait_for_exit(self.postkill) {
            info!(
                process = %self.name,
                deliberate = self.watchdog.was_deliberate(),
                "Process killed"
            );
            Ok(())
        } else {
            Err(HarnessError::KillFailed(format!(
                "process {} still running {:.1}s after kill",
                self.name,
                self.postkill.as_secs_f64()
            )))
        }
    }

    /// Stop the process.
    ///
    /// With a pre-kill timeout the process gets that long to exit on its
    /// own before it is forced; without one it is forced at once. The name
    /// is unregistered whatever the outcome. A failure the worker recorded
    /// is raised after cleanup. Afterwards tasks run once the process is
    /// gone. Only the first call does anything.
    pub fn kill(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        if self.kill_started.swap(true, Ordering::SeqCst) {
            debug!(process = %self.name, "Kill already handled");
            return Ok(());
        }

        let terminated = self.terminate();
        registry.processes().unregister(self);
        terminated?;
        self.join_worker();

        let failure = self.state().failure.take();
        let afterwards = self.run_afterwards(registry);
        match failure {
            Some(err) => {
                if let Err(after) = afterwards {
                    registry.log(priority::ERR, &after.message_chain());
                }
                Err(err)
            }
            None => afterwards,
        }
    }

    fn run_afterwards(&self, registry: &TaskRegistry) -> HarnessResult<()> {
        for task in &self.afterwards {
            registry.execute(task).map_err(|e| {
                HarnessError::wrap(format!("Afterwards tasks of process {} failed", self.name), e)
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BgProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BgProcess")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

struct Worker {
    name: String,
    command: std::process::Command,
    fail_on_error: bool,
    watchdog: Arc<ProcessWatchdog>,
    state: Arc<Mutex<WorkerState>>,
    sink: SharedBuffer,
    poll_interval: Duration,
}

impl Worker {
    fn run(mut self, tx: mpsc::Sender<LaunchSignal>) {
        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = HarnessError::failed(format!(
                    "Process {} could not be launched: {e}",
                    self.name
                ));
                self.finish(None, None);
                let _ = tx.send(LaunchSignal::LaunchFailed(err));
                return;
            }
        };
        let pid = child.id();
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pid = Some(pid);
        let _ = tx.send(LaunchSignal::Launched { pid });

        let pumps = [
            child.stdout.take().map(|out| {
                spawn_pump(out, self.sink.clone(), priority::STDOUT, priority::STDOUT_PARTIAL)
            }),
            child.stderr.take().map(|err| {
                spawn_pump(err, self.sink.clone(), priority::STDERR, priority::STDERR_PARTIAL)
            }),
        ];
        let status = self.watchdog.supervise(&mut child, self.poll_interval);
        let (code, result) = exit_result(&self.name, status, &self.watchdog, self.fail_on_error);
        self.finish(code, result.as_ref().err().cloned());
        debug!(process = %self.name, ?code, "Background process exited");

        for pump in pumps.into_iter().flatten() {
            let _ = pump.join();
        }
        // The launcher may have stopped listening.
        let _ = tx.send(LaunchSignal::Exited(result));
    }

    fn finish(&self, code: Option<i32>, failure: Option<HarnessError>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.running = false;
        state.exit_code = code;
        state.failure = failure;
    }
}

/// Judge a finished process. Shared by foreground and background runs.
pub(crate) fn exit_result(
    name: &str,
    status: io::Result<ExitStatus>,
    watchdog: &ProcessWatchdog,
    fail_on_error: bool,
) -> (Option<i32>, HarnessResult<()>) {
    let status = match status {
        Ok(status) => status,
        Err(e) => {
            return (
                None,
                Err(HarnessError::failed(format!("Process {name} could not be awaited: {e}"))),
            );
        }
    };
    let code = status.code();

    if watchdog.timed_out() {
        return (code, Err(HarnessError::failed(format!("Process {name} timed out"))));
    }
    if watchdog.killed() {
        if watchdog.was_deliberate() {
            return (code, Ok(()));
        }
        return (
            code,
            Err(HarnessError::failed(format!(
                "Process {name} did not exit before the pre-kill timeout and was killed"
            ))),
        );
    }
    match code {
        Some(0) => (code, Ok(())),
        _ if !fail_on_error => (code, Ok(())),
        Some(n) => (code, Err(HarnessError::failed(format!("Process {name} returned {n}")))),
        None => (
            code,
            Err(HarnessError::failed(format!("Process {name} was terminated by a signal"))),
        ),
    }
}
