//! Process-wide logging setup shared by every service binary.

pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, LogFormat, init};
