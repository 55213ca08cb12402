//! Built-in tasks.
//!
//! Containers ([`XharnessTask`], [`TestGroup`], [`TestCase`],
//! [`Sequential`]) and the leaf tasks a harness definition is made of.
//! Process execution lives in [`crate::process`], services in
//! [`crate::service`].

mod assert;
mod basic;
mod container;

pub use assert::{Assert, Condition, Stream};
pub use basic::{Echo, Fail, FailKind, Kill, Link, SetProperty, Skip, Sleep};
pub use container::{Sequential, TestCase, TestGroup, XharnessTask};
