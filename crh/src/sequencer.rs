//! Step sequencer.
//!
//! Walks a scenario's step list front to back. Only one step is ever in
//! flight; while a step awaits the encoder or a timer, output events are
//! handed to the drain. Completion is resolved exactly once, by `END`, by
//! running out of steps, by a hard failure, or by the drain on EOS.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::completion::CompletionPath;
use crate::drain::{self, Pumped};
use crate::error::{CodecResult, StepError};
use crate::platform::{CodecOp, SurfaceId, StreamSource, VideoEncoder};
use crate::report::FailureKind;
use crate::scenario::Scenario;
use crate::session::{CaseContext, SessionState};
use crate::step::{Dispatch, Step};

/// What the sequencer does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// The drain already resolved completion.
    Completed,
    /// A hard failure was recorded.
    Halt,
}

/// Value produced by a resource operation step.
enum OpValue {
    Unit,
    Surface(SurfaceId),
}

pub struct Sequencer<E, S> {
    steps: VecDeque<Step>,
    next_index: usize,
    executed: usize,
    session: SessionState<E>,
    ctx: CaseContext<S>,
}

impl<E: VideoEncoder, S: StreamSource> Sequencer<E, S> {
    pub fn new(scenario: &Scenario, session: SessionState<E>, ctx: CaseContext<S>) -> Self {
        Self {
            steps: scenario.steps.iter().cloned().collect(),
            next_index: 0,
            executed: 0,
            session,
            ctx,
        }
    }

    pub fn session(&self) -> &SessionState<E> {
        &self.session
    }

    /// Steps dispatched so far, error markers included.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Steps never dispatched.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    pub fn into_parts(self) -> (SessionState<E>, CaseContext<S>) {
        (self.session, self.ctx)
    }

    fn pop(&mut self) -> Option<(Step, usize)> {
        let step = self.steps.pop_front()?;
        let index = self.next_index;
        self.next_index += 1;
        self.executed += 1;
        Some((step, index))
    }

    fn complete(&mut self, path: CompletionPath) {
        drain::complete(&mut self.session, &self.ctx, path);
    }

    /// Drive the step list until the case is complete.
    pub async fn run(&mut self) -> CompletionPath {
        info!(
            scenario = %self.ctx.scenario,
            steps = self.steps.len(),
            "sequence started"
        );

        loop {
            if drain::drain_ready(&mut self.session, &self.ctx)
                .await
                .is_completed()
            {
                return CompletionPath::Drain;
            }

            let Some((step, index)) = self.pop() else {
                debug!(scenario = %self.ctx.scenario, "step list exhausted");
                self.complete(CompletionPath::Sequencer);
                return CompletionPath::Sequencer;
            };
            debug!(scenario = %self.ctx.scenario, step = %step, index, "dispatching step");

            let flow = match step.dispatch() {
                Dispatch::Terminate => {
                    self.complete(CompletionPath::Sequencer);
                    return CompletionPath::Sequencer;
                }
                Dispatch::Marker => {
                    warn!(index, "EXPECT_ERROR_MARKER without a preceding operation, skipping");
                    Flow::Continue
                }
                Dispatch::FireAndContinue if step == Step::RestartAfterEos => self.restart().await,
                Dispatch::FireAndContinue => self.fire(&step, index),
                Dispatch::AwaitThenContinue => self.operate(&step, index).await,
                Dispatch::DelayedContinue => self.hold().await,
                Dispatch::AwaitDrain => self.wait_for_outputs(&step, index).await,
            };

            match flow {
                Flow::Continue => {}
                Flow::Completed => return CompletionPath::Drain,
                Flow::Halt => {
                    warn!(
                        scenario = %self.ctx.scenario,
                        step = %step,
                        index,
                        skipped = self.steps.len(),
                        "halting sequence after hard failure"
                    );
                    self.complete(CompletionPath::Halted);
                    return CompletionPath::Halted;
                }
            }
        }
    }

    fn fire(&mut self, step: &Step, index: usize) -> Flow {
        match step {
            Step::SetStreamParams => {
                let settings = self.ctx.stream_settings;
                self.ctx.stream.set_resolution(settings.width, settings.height);
                self.ctx.stream.set_frame_rate(settings.frame_rate);
                self.ctx.stream.set_frame_count(settings.frame_count);
                Flow::Continue
            }
            Step::StartStream => {
                let result = match &self.session.surface {
                    Some(surface) => self.ctx.stream.start_stream(surface).map_err(StepError::from),
                    None => Err(StepError::NoSurface),
                };
                match result {
                    Ok(()) => Flow::Continue,
                    Err(err) => {
                        self.session.record_failure(
                            FailureKind::UnexpectedFailure,
                            Some((step.name(), index)),
                            err.to_string(),
                        );
                        Flow::Halt
                    }
                }
            }
            Step::StopStream => {
                match &self.session.surface {
                    Some(surface) => self.ctx.stream.close_stream(surface),
                    None => debug!(index, "no surface to close"),
                }
                Flow::Continue
            }
            Step::AssertEosSeen => {
                self.session.record_check();
                if !self.session.eos_observed {
                    self.session.record_failure(
                        FailureKind::Assertion,
                        Some((step.name(), index)),
                        "expected output EOS to have been observed",
                    );
                }
                Flow::Continue
            }
            Step::Unrecognized(name) => {
                warn!(index, step = %name, "unrecognized step, skipping");
                Flow::Continue
            }
            other => {
                warn!(index, step = %other, "step dispatched as fire-and-continue unexpectedly");
                Flow::Continue
            }
        }
    }

    /// Drain whatever is still queued, then reset the drain state.
    async fn restart(&mut self) -> Flow {
        if drain::drain(&mut self.session, &self.ctx).await.is_completed() {
            return Flow::Completed;
        }
        self.session.restart_after_eos();
        Flow::Continue
    }

    async fn hold(&mut self) -> Flow {
        let hold = self.ctx.hold;
        debug!(hold_ms = hold.as_millis() as u64, "holding");
        match drain::pump(&mut self.session, &self.ctx, tokio::time::sleep(hold)).await {
            Pumped::Done(()) => Flow::Continue,
            Pumped::Completed => Flow::Completed,
        }
    }

    async fn wait_for_outputs(&mut self, step: &Step, index: usize) -> Flow {
        info!(scenario = %self.ctx.scenario, "waiting for all outputs");
        while let Some(event) = self.session.next_event().await {
            if drain::on_event(&mut self.session, &self.ctx, event)
                .await
                .is_completed()
            {
                return Flow::Completed;
            }
        }
        self.session.close_events();
        self.session.record_failure(
            FailureKind::UnexpectedFailure,
            Some((step.name(), index)),
            "encoder event stream ended before EOS completed the case",
        );
        Flow::Halt
    }

    async fn call(&mut self, op: CodecOp) -> Pumped<Result<OpValue, StepError>> {
        let codec = match self.session.codec(op) {
            Ok(codec) => codec,
            Err(err) => return Pumped::Done(Err(err)),
        };
        let session = &mut self.session;
        let ctx = &self.ctx;
        let pumped = match op {
            CodecOp::Configure => unit(drain::pump(session, ctx, codec.configure(&ctx.format)).await),
            CodecOp::GetInputSurface => {
                match drain::pump(session, ctx, codec.get_input_surface()).await {
                    Pumped::Done(result) => Pumped::Done(result.map(OpValue::Surface)),
                    Pumped::Completed => Pumped::Completed,
                }
            }
            CodecOp::Prepare => unit(drain::pump(session, ctx, codec.prepare()).await),
            CodecOp::Start => unit(drain::pump(session, ctx, codec.start()).await),
            CodecOp::Flush => unit(drain::pump(session, ctx, codec.flush()).await),
            CodecOp::Stop => unit(drain::pump(session, ctx, codec.stop()).await),
            CodecOp::Reset => unit(drain::pump(session, ctx, codec.reset()).await),
            CodecOp::Release => unit(drain::pump(session, ctx, codec.release()).await),
            CodecOp::Create | CodecOp::FreeOutputBuffer | CodecOp::GetOutputFormat => {
                Pumped::Done(Ok(OpValue::Unit))
            }
        };
        match pumped {
            Pumped::Done(result) => Pumped::Done(result.map_err(StepError::from)),
            Pumped::Completed => Pumped::Completed,
        }
    }

    /// Run a resource operation, honoring a following EXPECT_ERROR_MARKER.
    async fn operate(&mut self, step: &Step, index: usize) -> Flow {
        let Some(op) = step.codec_op() else {
            return Flow::Continue;
        };
        let expect_error = self.steps.front() == Some(&Step::ExpectErrorMarker);
        if expect_error {
            self.pop();
        }

        let result = match self.call(op).await {
            Pumped::Done(result) => result,
            Pumped::Completed => return Flow::Completed,
        };
        self.session.record_check();

        if op == CodecOp::Release {
            let keep = !expect_error && result.is_ok() && self.steps.front() == Some(&Step::Release);
            if !keep && self.session.take_codec().is_some() {
                debug!(index, "dropped encoder handle after release");
            }
        }

        match (expect_error, result) {
            (false, Ok(value)) => {
                debug!(step = %step, index, "operation succeeded");
                self.after_success(op, value).await
            }
            (true, Err(err)) => {
                info!(step = %step, index, error = %err, "operation failed as expected");
                Flow::Continue
            }
            (true, Ok(_)) => {
                self.session.record_failure(
                    FailureKind::UnexpectedSuccess,
                    Some((step.name(), index)),
                    "operation succeeded but an error was expected",
                );
                Flow::Halt
            }
            (false, Err(err)) => {
                self.session.record_failure(
                    FailureKind::UnexpectedFailure,
                    Some((step.name(), index)),
                    err.to_string(),
                );
                Flow::Halt
            }
        }
    }

    async fn after_success(&mut self, op: CodecOp, value: OpValue) -> Flow {
        if let OpValue::Surface(surface) = value {
            info!(surface = %surface, "acquired input surface");
            self.session.surface = Some(surface);
        }
        if op == CodecOp::Flush && self.session.flush_pending {
            self.session.flush_pending = false;
            if let Some(surface) = &self.session.surface {
                self.ctx.stream.close_stream(surface);
            }
            return self.restart().await;
        }
        Flow::Continue
    }
}

fn unit(pumped: Pumped<CodecResult<()>>) -> Pumped<CodecResult<OpValue>> {
    match pumped {
        Pumped::Done(result) => Pumped::Done(result.map(|()| OpValue::Unit)),
        Pumped::Completed => Pumped::Completed,
    }
}
