//! Codec Reliability Harness.
//!
//! Drives a stateful asynchronous video encoder through scripted lifecycle
//! scenarios and checks that each operation succeeds or fails exactly as
//! the scenario expects, while draining encoded output concurrently.
//!
//! - [`step`] / [`scenario`] / [`catalog`]: what a case does
//! - [`sequencer`] / [`drain`]: how a case runs
//! - [`suite`] / [`loops`] / [`report`]: running batches and reporting
//! - [`platform`]: the encoder and stream traits; [`mock`] implements them

pub mod catalog;
pub mod completion;
pub mod config;
pub mod drain;
pub mod error;
pub mod loops;
pub mod mock;
pub mod platform;
pub mod report;
pub mod scenario;
pub mod sequencer;
pub mod session;
pub mod sink;
pub mod step;
pub mod suite;

pub use completion::{CompletionPath, CompletionSignal, CompletionToken};
pub use config::HarnessConfig;
pub use error::{CodecError, CodecResult, CompletionError, HarnessError, HarnessResult, StepError, StreamError};
pub use loops::{LoopKind, LoopReport, run_loop};
pub use platform::{CodecEvent, CodecOp, MediaFormat, MediaPlatform, OutputBuffer, StreamSource, SurfaceId, VideoEncoder};
pub use report::{CaseReport, Failure, FailureKind, SuiteReport};
pub use scenario::{Scenario, ScenarioTable, ScenarioWarning, Severity};
pub use sequencer::Sequencer;
pub use session::{CaseContext, SessionState, StreamSettings};
pub use step::Step;
pub use suite::Suite;
