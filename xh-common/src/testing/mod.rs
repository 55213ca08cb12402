//! Test support: tracing setup and a recording build listener.

mod log;

pub use log::{EventEntry, EventKind, EventLog, init_test_logging};
