//! Loop stress cases.
//!
//! Each loop repeats a slice of the encoder lifecycle many times. Every
//! operation has to succeed, and the number of live encoder handles held
//! by the loop must never exceed one.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::CodecResult;
use crate::platform::{CodecOp, MediaFormat, MediaPlatform, VideoEncoder};
use crate::report::{Failure, FailureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    /// configure and reset on one handle
    ConfigureReset,
    /// start and stop on one prepared handle
    StartStop,
    /// create and release a fresh handle
    CreateRelease,
    /// the whole lifecycle from create to release
    TotalLoop,
}

impl LoopKind {
    pub const ALL: [LoopKind; 4] = [
        LoopKind::ConfigureReset,
        LoopKind::StartStop,
        LoopKind::CreateRelease,
        LoopKind::TotalLoop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigureReset => "configure_reset",
            Self::StartStop => "start_stop",
            Self::CreateRelease => "create_release",
            Self::TotalLoop => "total_loop",
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of one loop case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopReport {
    pub kind: LoopKind,
    pub passed: bool,
    pub iterations: u32,
    pub completed: u32,
    /// Highest number of handles held at once.
    pub max_live: u32,
    /// Handles still held when the loop ended.
    pub leaked: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
struct Tracker {
    live: u32,
    max_live: u32,
    completed: u32,
}

impl Tracker {
    fn created(&mut self) {
        self.live += 1;
        self.max_live = self.max_live.max(self.live);
    }

    fn released(&mut self) {
        self.live = self.live.saturating_sub(1);
    }
}

/// Await one operation, turning an error into a loop failure.
async fn check<T>(
    op: CodecOp,
    iteration: u32,
    fut: impl Future<Output = CodecResult<T>>,
) -> Result<T, Failure> {
    fut.await.map_err(|err| Failure {
        kind: FailureKind::UnexpectedFailure,
        step: Some(op.to_string()),
        index: Some(iteration as usize),
        message: err.to_string(),
    })
}

struct LoopRun<'a, P: MediaPlatform> {
    platform: &'a P,
    codec_name: &'a str,
    format: MediaFormat,
    handle: Option<P::Encoder>,
    tracker: Tracker,
}

impl<P: MediaPlatform> LoopRun<'_, P> {
    async fn create(&mut self, iteration: u32) -> Result<P::Encoder, Failure> {
        let encoder = check(
            CodecOp::Create,
            iteration,
            self.platform.create_encoder_by_name(self.codec_name),
        )
        .await?;
        self.tracker.created();
        self.handle = Some(encoder.clone());
        Ok(encoder)
    }

    async fn release(&mut self, encoder: &P::Encoder, iteration: u32) -> Result<(), Failure> {
        check(CodecOp::Release, iteration, encoder.release()).await?;
        self.handle = None;
        self.tracker.released();
        Ok(())
    }

    async fn run(&mut self, kind: LoopKind, iterations: u32) -> Result<(), Failure> {
        let format = self.format.clone();
        match kind {
            LoopKind::ConfigureReset => {
                let encoder = self.create(0).await?;
                for i in 0..iterations {
                    check(CodecOp::Configure, i, encoder.configure(&format)).await?;
                    check(CodecOp::Reset, i, encoder.reset()).await?;
                    self.tracker.completed += 1;
                }
                self.release(&encoder, iterations).await
            }
            LoopKind::StartStop => {
                let encoder = self.create(0).await?;
                check(CodecOp::Configure, 0, encoder.configure(&format)).await?;
                check(CodecOp::GetInputSurface, 0, encoder.get_input_surface()).await?;
                check(CodecOp::Prepare, 0, encoder.prepare()).await?;
                for i in 0..iterations {
                    check(CodecOp::Start, i, encoder.start()).await?;
                    check(CodecOp::Stop, i, encoder.stop()).await?;
                    self.tracker.completed += 1;
                }
                self.release(&encoder, iterations).await
            }
            LoopKind::CreateRelease => {
                for i in 0..iterations {
                    let encoder = self.create(i).await?;
                    self.release(&encoder, i).await?;
                    self.tracker.completed += 1;
                }
                Ok(())
            }
            LoopKind::TotalLoop => {
                for i in 0..iterations {
                    let encoder = self.create(i).await?;
                    check(CodecOp::Configure, i, encoder.configure(&format)).await?;
                    check(CodecOp::GetInputSurface, i, encoder.get_input_surface()).await?;
                    check(CodecOp::Prepare, i, encoder.prepare()).await?;
                    check(CodecOp::Start, i, encoder.start()).await?;
                    check(CodecOp::Flush, i, encoder.flush()).await?;
                    check(CodecOp::Stop, i, encoder.stop()).await?;
                    check(CodecOp::Reset, i, encoder.reset()).await?;
                    self.release(&encoder, i).await?;
                    self.tracker.completed += 1;
                }
                Ok(())
            }
        }
    }
}

/// Run one loop case against `platform`.
pub async fn run_loop<P: MediaPlatform>(
    platform: &P,
    config: &HarnessConfig,
    kind: LoopKind,
    iterations: u32,
) -> LoopReport {
    let started = Instant::now();
    info!(kind = %kind, iterations, codec = %config.codec_name, "loop started");

    let mut run = LoopRun {
        platform,
        codec_name: &config.codec_name,
        format: config.media_format(),
        handle: None,
        tracker: Tracker::default(),
    };
    let failure = run.run(kind, iterations).await.err();

    if let Some(encoder) = run.handle.take() {
        debug!(kind = %kind, "releasing handle left by failed loop");
        match encoder.release().await {
            Ok(()) => run.tracker.released(),
            Err(err) => warn!(kind = %kind, error = %err, "cleanup release failed"),
        }
    }

    let tracker = run.tracker;
    let report = LoopReport {
        kind,
        passed: failure.is_none() && tracker.max_live <= 1 && tracker.live == 0,
        iterations,
        completed: tracker.completed,
        max_live: tracker.max_live,
        leaked: tracker.live,
        failure,
        duration_ms: started.elapsed().as_millis() as u64,
    };

    match &report.failure {
        None => info!(
            kind = %kind,
            completed = report.completed,
            max_live = report.max_live,
            "loop finished"
        ),
        Some(failure) => warn!(kind = %kind, completed = report.completed, failure = %failure, "loop failed"),
    }
    report
}
