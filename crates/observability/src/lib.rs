//! Shared tracing setup for saga store binaries and hosts.

pub mod logging;

pub use logging::{LOG_FORMAT_ENV, LogFormat, init, init_with};
