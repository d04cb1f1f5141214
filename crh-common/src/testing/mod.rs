//! Test support shared by CRH crates.

pub mod log;

pub use log::{TestLogEntry, TestLogger, TestPhase, init_global_test_logging};
