//! Shared helpers for integration tests.

mod flaky_transport;

pub use flaky_transport::{FaultConfig, FlakyTransport};
