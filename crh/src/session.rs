//! Per-case state.
//!
//! [`SessionState`] is built fresh for every case and dropped at teardown.
//! It owns the live encoder handle (at most one), the event receiver, the
//! output FIFO and the drain counters. [`CaseContext`] carries the
//! read-only inputs of a case together with its sink and completion token.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::completion::CompletionToken;
use crate::error::StepError;
use crate::platform::{CodecEvent, CodecOp, MediaFormat, OutputBuffer, SurfaceId, VideoEncoder};
use crate::report::{Failure, FailureKind};
use crate::scenario::Scenario;
use crate::sink::Sink;

/// Parameters pushed into the stream producer by SET_STREAM_PARAMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub frame_count: u32,
}

/// Read-only inputs and shared outputs of one case.
#[derive(Debug, Clone)]
pub struct CaseContext<S> {
    pub scenario: String,
    pub format: MediaFormat,
    pub stream_settings: StreamSettings,
    pub stream: S,
    pub hold: Duration,
    pub sink: Sink,
    pub completion: CompletionToken,
}

/// Drain bookkeeping.
#[derive(Debug, Default)]
pub struct Counters {
    /// Output events appended to the queue.
    pub emitted: u64,
    /// Buffers popped by the drain.
    pub consumed: u64,
    /// Payloads persisted to the sink.
    pub written: u64,
    /// Buffers acknowledged by the encoder, updated from detached tasks.
    pub released: Arc<AtomicU64>,
}

impl Counters {
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}

pub struct SessionState<E> {
    codec: Option<E>,
    events: Option<mpsc::UnboundedReceiver<CodecEvent>>,
    pub surface: Option<SurfaceId>,
    pub output_queue: VecDeque<OutputBuffer>,
    pub counters: Counters,
    pub flush_pending: bool,
    pub eos_observed: bool,
    pub needs_format_query: bool,
    pub work_done_on_eos: bool,
    pub output_format: Option<MediaFormat>,
    pub failures: Vec<Failure>,
    pub checks: u32,
}

impl<E: VideoEncoder> SessionState<E> {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            codec: None,
            events: None,
            surface: None,
            output_queue: VecDeque::new(),
            counters: Counters::default(),
            flush_pending: scenario.flush_at_eos,
            eos_observed: false,
            needs_format_query: scenario.query_output_format,
            work_done_on_eos: scenario.work_done_on_eos,
            output_format: None,
            failures: Vec::new(),
            checks: 0,
        }
    }

    /// Take ownership of a freshly created encoder and subscribe to it.
    pub fn attach(&mut self, codec: E) {
        self.events = Some(codec.subscribe());
        self.codec = Some(codec);
    }

    pub fn has_codec(&self) -> bool {
        self.codec.is_some()
    }

    /// A handle to the live encoder for `op`.
    pub fn codec(&self, op: CodecOp) -> Result<E, StepError> {
        self.codec.clone().ok_or(StepError::NoLiveCodec(op))
    }

    /// Give up the live handle. The encoder itself is not touched.
    pub fn take_codec(&mut self) -> Option<E> {
        self.codec.take()
    }

    pub(crate) fn events_open(&self) -> bool {
        self.events.is_some()
    }

    pub(crate) fn close_events(&mut self) {
        if self.events.take().is_some() {
            debug!("encoder event channel closed");
        }
    }

    pub(crate) async fn next_event(&mut self) -> Option<CodecEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub(crate) fn try_next_event(&mut self) -> Option<CodecEvent> {
        self.events.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// Append one buffer from the event path.
    pub fn enqueue_output(&mut self, buffer: OutputBuffer) {
        self.counters.emitted += 1;
        self.output_queue.push_back(buffer);
    }

    /// EOS reset point: zero the drain counters, clear `eos_observed` and
    /// arm completion on the next EOS. The output queue is left to the
    /// drain, so callers empty it first.
    pub fn restart_after_eos(&mut self) {
        info!(
            consumed = self.counters.consumed,
            eos_observed = self.eos_observed,
            "restarting after EOS"
        );
        self.counters.emitted = 0;
        self.counters.consumed = 0;
        self.counters.written = 0;
        self.eos_observed = false;
        self.work_done_on_eos = true;
    }

    pub fn record_check(&mut self) {
        self.checks += 1;
    }

    pub fn record_failure(
        &mut self,
        kind: FailureKind,
        step: Option<(&str, usize)>,
        message: impl Into<String>,
    ) {
        let failure = Failure {
            kind,
            step: step.map(|(name, _)| name.to_string()),
            index: step.map(|(_, index)| index),
            message: message.into(),
        };
        warn!(failure = %failure, "case failure recorded");
        self.failures.push(failure);
    }

    /// Failures that stop the sequence.
    pub fn has_hard_failure(&self) -> bool {
        self.failures.iter().any(|failure| {
            matches!(
                failure.kind,
                FailureKind::UnexpectedFailure | FailureKind::UnexpectedSuccess
            )
        })
    }
}
