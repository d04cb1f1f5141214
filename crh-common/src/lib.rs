//! Shared utilities for the Codec Reliability Harness.
//!
//! - [`logging`]: tracing subscriber bootstrap for binaries
//! - [`config`]: environment variable parsing with source tracking
//! - [`testing`]: JSONL test logging

pub mod config;
pub mod logging;
pub mod testing;

pub use config::{ConfigSource, EnvError, EnvParser, Sourced};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
