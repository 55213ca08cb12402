//! Operating-system processes: foreground and background execution,
//! watchdog supervision and the registry of running background processes.

mod background;
mod exec;
mod pump;
mod registry;
mod spec;
mod watchdog;

pub use background::{BackgroundOptions, BgProcess, LaunchRequest};
pub use exec::ExecTask;
pub use registry::ProcessRegistry;
pub use spec::{JavaSpec, ProcessSpec};
pub use watchdog::ProcessWatchdog;
