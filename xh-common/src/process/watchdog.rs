use std::io;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Kill switch and run timeout for one child process.
///
/// The thread that owns the child calls [`supervise`](Self::supervise),
/// which polls for exit and acts on kill requests made from other threads.
#[derive(Debug, Default)]
pub struct ProcessWatchdog {
    timeout: Option<Duration>,
    kill_requested: AtomicBool,
    deliberate: AtomicBool,
    killed: AtomicBool,
    timed_out: AtomicBool,
}

impl ProcessWatchdog {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Ask the supervising thread to kill the child. A deliberate kill is
    /// not reported as a process failure.
    pub fn request_kill(&self, deliberate: bool) {
        self.deliberate.store(deliberate, Ordering::SeqCst);
        self.kill_requested.store(true, Ordering::SeqCst);
    }

    pub fn kill_requested(&self) -> bool {
        self.kill_requested.load(Ordering::SeqCst)
    }

    /// Whether the watchdog terminated the child.
    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn was_deliberate(&self) -> bool {
        self.deliberate.load(Ordering::SeqCst)
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    fn should_kill(&self, started: Instant) -> bool {
        if self.kill_requested() {
            return true;
        }
        match self.timeout {
            Some(limit) if started.elapsed() >= limit => {
                self.timed_out.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Wait for `child` to exit, killing it on request or timeout.
    pub fn supervise(&self, child: &mut Child, poll: Duration) -> io::Result<ExitStatus> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if self.should_kill(started) {
                kill_process_group(child.id());
                // The child may exit between try_wait and kill.
                let _ = child.kill();
                self.killed.store(true, Ordering::SeqCst);
                return child.wait();
            }
            thread::sleep(poll);
        }
    }
}

/// Children are started as process-group leaders, so the whole group
/// (including shell grandchildren holding our pipes) goes down together.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    if pid == 0 {
        return;
    }
    match std::process::Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{pid}"))
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
    {
        Ok(_) => {}
        Err(e) => tracing::debug!(pid, error = %e, "Failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_supervise_natural_exit() {
        let watchdog = ProcessWatchdog::new(None);
        let mut child = Command::new("sh").args(["-c", "exit 0"]).spawn().unwrap();
        let status = watchdog.supervise(&mut child, Duration::from_millis(5)).unwrap();
        assert!(status.success());
        assert!(!watchdog.killed());
    }

    #[test]
    fn test_supervise_timeout_kills() {
        let watchdog = ProcessWatchdog::new(Some(Duration::from_millis(50)));
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let start = Instant::now();
        let status = watchdog.supervise(&mut child, Duration::from_millis(5)).unwrap();
        assert!(!status.success());
        assert!(watchdog.killed());
        assert!(watchdog.timed_out());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_requested_kill() {
        let watchdog = ProcessWatchdog::new(None);
        watchdog.request_kill(true);
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        watchdog.supervise(&mut child, Duration::from_millis(5)).unwrap();
        assert!(watchdog.killed());
        assert!(watchdog.was_deliberate());
        assert!(!watchdog.timed_out());
    }
}
