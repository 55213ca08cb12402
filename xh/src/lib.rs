//! XHarness command-line runner: harness definition loading and run
//! summaries.

pub mod loader;
pub mod summary;

pub use loader::{ConfigError, HarnessFile, HarnessSettings, TaskDef};
pub use summary::RunSummary;
