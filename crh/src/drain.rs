//! Output drain loop.
//!
//! Every output-available event appends one buffer to the session queue and
//! runs [`drain`], which pops buffers in FIFO order. Payloads go to the
//! sink and back to the encoder without waiting for the acknowledgment.
//! An EOS buffer sets `eos_observed`; with `work_done_on_eos` armed it also
//! tears the encoder down and completes the case.

use std::future::Future;
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::completion::CompletionPath;
use crate::platform::{CodecEvent, CodecOp, StreamSource, VideoEncoder};
use crate::report::FailureKind;
use crate::session::{CaseContext, SessionState};

/// Result of handling events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Continue,
    /// The drain resolved the case.
    Completed,
}

impl DrainOutcome {
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

/// Result of awaiting a future while draining events.
#[derive(Debug)]
pub enum Pumped<T> {
    Done(T),
    /// The case completed before the future resolved.
    Completed,
}

/// Resolve completion, recording a harness defect if it was already taken.
pub(crate) fn complete<E: VideoEncoder, S>(
    session: &mut SessionState<E>,
    ctx: &CaseContext<S>,
    path: CompletionPath,
) {
    if let Err(err) = ctx.completion.resolve(path) {
        session.record_failure(FailureKind::HarnessDefect, None, err.to_string());
    }
}

/// Handle one encoder event.
pub async fn on_event<E: VideoEncoder, S: StreamSource>(
    session: &mut SessionState<E>,
    ctx: &CaseContext<S>,
    event: CodecEvent,
) -> DrainOutcome {
    match event {
        CodecEvent::NewOutputData(buffer) => {
            if session.needs_format_query {
                session.needs_format_query = false;
                query_output_format(session).await;
            }
            debug!(
                scenario = %ctx.scenario,
                index = buffer.index,
                flags = buffer.flags,
                "output buffer available"
            );
            session.enqueue_output(buffer);
            drain(session, ctx).await
        }
        CodecEvent::Error(err) => {
            warn!(scenario = %ctx.scenario, error = %err, "encoder reported error");
            DrainOutcome::Continue
        }
        CodecEvent::StreamChanged(format) => {
            info!(scenario = %ctx.scenario, format = %format, "output format changed");
            DrainOutcome::Continue
        }
    }
}

async fn query_output_format<E: VideoEncoder>(session: &mut SessionState<E>) {
    session.record_check();
    let result = match session.codec(CodecOp::GetOutputFormat) {
        Ok(codec) => codec.get_output_format().await.map_err(Into::into),
        Err(err) => Err(err),
    };
    match result {
        Ok(format) => {
            info!(format = %format, "queried output format");
            session.output_format = Some(format);
        }
        Err(err) => session.record_failure(
            FailureKind::Assertion,
            None,
            format!("get_output_format failed: {err}"),
        ),
    }
}

/// Pop and process every queued buffer.
pub async fn drain<E: VideoEncoder, S: StreamSource>(
    session: &mut SessionState<E>,
    ctx: &CaseContext<S>,
) -> DrainOutcome {
    while let Some(buffer) = session.output_queue.pop_front() {
        session.counters.consumed += 1;

        if buffer.is_eos() {
            session.eos_observed = true;
            info!(
                scenario = %ctx.scenario,
                consumed = session.counters.consumed,
                "saw output EOS"
            );
            if session.work_done_on_eos {
                teardown_at_eos(session, ctx).await;
                complete(session, ctx, CompletionPath::Drain);
                return DrainOutcome::Completed;
            }
            continue;
        }

        if ctx.sink.append(&buffer.data) {
            session.counters.written += 1;
        }

        match session.codec(CodecOp::FreeOutputBuffer) {
            Ok(codec) => {
                let released = session.counters.released.clone();
                let index = buffer.index;
                tokio::spawn(async move {
                    match codec.free_output_buffer(index).await {
                        Ok(()) => {
                            released.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => debug!(index, error = %err, "free_output_buffer failed"),
                    }
                });
            }
            Err(_) => debug!(index = buffer.index, "no live encoder to return buffer to"),
        }
    }
    DrainOutcome::Continue
}

/// Stop the stream, reset and release the encoder, and drop the handle.
async fn teardown_at_eos<E: VideoEncoder, S: StreamSource>(
    session: &mut SessionState<E>,
    ctx: &CaseContext<S>,
) {
    if let Some(surface) = &session.surface {
        ctx.stream.close_stream(surface);
    }
    let Some(codec) = session.take_codec() else {
        warn!(scenario = %ctx.scenario, "EOS teardown without a live encoder");
        return;
    };

    session.record_check();
    if let Err(err) = codec.reset().await {
        session.record_failure(
            FailureKind::UnexpectedFailure,
            None,
            format!("reset during EOS teardown failed: {err}"),
        );
    }
    session.record_check();
    match codec.release().await {
        Ok(()) => info!(scenario = %ctx.scenario, "encoder released after EOS"),
        Err(err) => session.record_failure(
            FailureKind::UnexpectedFailure,
            None,
            format!("release during EOS teardown failed: {err}"),
        ),
    }
}

/// Handle events that are already queued, without waiting.
pub async fn drain_ready<E: VideoEncoder, S: StreamSource>(
    session: &mut SessionState<E>,
    ctx: &CaseContext<S>,
) -> DrainOutcome {
    while let Some(event) = session.try_next_event() {
        if on_event(session, ctx, event).await.is_completed() {
            return DrainOutcome::Completed;
        }
    }
    DrainOutcome::Continue
}

/// Await `fut` while handling encoder events as they arrive.
pub async fn pump<E, S, F>(
    session: &mut SessionState<E>,
    ctx: &CaseContext<S>,
    fut: F,
) -> Pumped<F::Output>
where
    E: VideoEncoder,
    S: StreamSource,
    F: Future,
{
    tokio::pin!(fut);
    while session.events_open() {
        tokio::select! {
            biased;
            output = &mut fut => return Pumped::Done(output),
            event = session.next_event() => match event {
                Some(event) => {
                    if on_event(session, ctx, event).await.is_completed() {
                        return Pumped::Completed;
                    }
                }
                None => session.close_events(),
            },
        }
    }
    Pumped::Done(fut.await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionToken;
    use crate::mock::{MOCK_MIME, MockEncoder, MockPlatform, SyntheticStream};
    use crate::platform::{FLAG_EOS, MediaFormat, MediaPlatform, OutputBuffer};
    use crate::scenario::Scenario;
    use crate::session::StreamSettings;
    use crate::sink::Sink;
    use crate::step::Step;
    use proptest::prelude::*;
    use std::time::Duration;

    fn context(
        platform: &MockPlatform,
        dir: &std::path::Path,
    ) -> (CaseContext<SyntheticStream>, crate::completion::CompletionSignal) {
        let (completion, signal) = CompletionToken::new();
        let ctx = CaseContext {
            scenario: "drain_test".to_string(),
            format: MediaFormat {
                width: 320,
                height: 240,
                pixel_format: 3,
                frame_rate: 30,
            },
            stream_settings: StreamSettings {
                width: 320,
                height: 240,
                frame_rate: 30,
                frame_count: 2,
            },
            stream: platform.stream_source(),
            hold: Duration::from_millis(3000),
            sink: Sink::for_scenario(dir, "", "drain_test"),
            completion,
        };
        (ctx, signal)
    }

    fn data(index: u32, byte: u8) -> OutputBuffer {
        OutputBuffer {
            index,
            data: vec![byte],
            flags: 0,
            pts_us: 0,
        }
    }

    fn eos(index: u32) -> OutputBuffer {
        OutputBuffer {
            index,
            data: Vec::new(),
            flags: FLAG_EOS,
            pts_us: 0,
        }
    }

    #[tokio::test]
    async fn drain_persists_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let (ctx, _signal) = context(&platform, dir.path());
        let mut session = SessionState::<MockEncoder>::new(&Scenario::new("s", [Step::End]));

        for (index, byte) in [(0, b'a'), (1, b'b'), (2, b'c')] {
            session.enqueue_output(data(index, byte));
        }
        assert_eq!(drain(&mut session, &ctx).await, DrainOutcome::Continue);

        assert_eq!(session.counters.consumed, 3);
        assert_eq!(session.counters.written, 3);
        assert_eq!(std::fs::read(ctx.sink.path()).unwrap(), b"abc");
        assert!(!session.eos_observed);
    }

    #[tokio::test]
    async fn eos_without_work_done_only_sets_flag() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let (ctx, _signal) = context(&platform, dir.path());
        let mut session = SessionState::<MockEncoder>::new(&Scenario::new("s", [Step::End]));

        session.enqueue_output(eos(0));
        session.enqueue_output(data(1, b'z'));
        assert_eq!(drain(&mut session, &ctx).await, DrainOutcome::Continue);
        assert!(session.eos_observed);
        assert_eq!(session.counters.consumed, 2);
        assert!(!ctx.completion.is_resolved());
    }

    #[tokio::test]
    async fn eos_with_work_done_tears_down_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let (ctx, mut signal) = context(&platform, dir.path());
        let scenario = Scenario::new("s", [Step::WaitForOutputs]).work_done_on_eos();
        let mut session = SessionState::new(&scenario);
        session.attach(platform.create_encoder_by_mime(MOCK_MIME).await.unwrap());

        session.enqueue_output(eos(0));
        session.enqueue_output(data(1, b'x'));
        assert_eq!(drain(&mut session, &ctx).await, DrainOutcome::Completed);

        assert!(!session.has_codec());
        assert_eq!(platform.live_encoders(), 0);
        assert!(session.failures.is_empty());
        assert_eq!(session.output_queue.len(), 1);
        assert_eq!(signal.try_take(), Some(CompletionPath::Drain));
    }

    #[tokio::test]
    async fn second_completion_is_recorded_as_defect() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let (ctx, _signal) = context(&platform, dir.path());
        let mut session = SessionState::<MockEncoder>::new(&Scenario::new("s", [Step::End]));

        complete(&mut session, &ctx, CompletionPath::Drain);
        complete(&mut session, &ctx, CompletionPath::Sequencer);

        assert_eq!(session.failures.len(), 1);
        assert_eq!(session.failures[0].kind, FailureKind::HarnessDefect);
        assert_eq!(ctx.completion.rejected(), vec![CompletionPath::Sequencer]);
    }

    #[tokio::test]
    async fn format_query_runs_once_on_first_output() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let (ctx, _signal) = context(&platform, dir.path());
        let scenario = Scenario::new("s", [Step::End]).query_output_format();
        let mut session = SessionState::new(&scenario);
        let encoder = platform.create_encoder_by_mime(MOCK_MIME).await.unwrap();
        encoder.configure(&ctx.format).await.unwrap();
        session.attach(encoder);

        on_event(&mut session, &ctx, CodecEvent::NewOutputData(data(0, b'a'))).await;
        on_event(&mut session, &ctx, CodecEvent::NewOutputData(data(1, b'b'))).await;

        assert!(!session.needs_format_query);
        assert_eq!(session.output_format, Some(ctx.format.clone()));
        assert_eq!(session.checks, 1);
        assert_eq!(session.counters.emitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_drains_events_while_awaiting() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let (ctx, _signal) = context(&platform, dir.path());
        let mut session = SessionState::new(&Scenario::new("s", [Step::End]));
        let encoder = platform.create_encoder_by_mime(MOCK_MIME).await.unwrap();
        session.attach(encoder.clone());
        encoder.configure(&ctx.format).await.unwrap();
        let surface = encoder.get_input_surface().await.unwrap();
        encoder.prepare().await.unwrap();
        encoder.start().await.unwrap();

        let stream = ctx.stream.clone();
        stream.set_resolution(320, 240);
        stream.set_frame_rate(30);
        stream.set_frame_count(2);
        stream.start_stream(&surface).unwrap();

        let pumped = pump(
            &mut session,
            &ctx,
            tokio::time::sleep(Duration::from_millis(500)),
        )
        .await;
        assert!(matches!(pumped, Pumped::Done(())));
        assert_eq!(session.counters.consumed, 3);
        assert!(session.eos_observed);
    }

    proptest! {
        #[test]
        fn drained_payloads_keep_append_order(payloads in proptest::collection::vec(any::<u8>(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let platform = MockPlatform::new();
                let (ctx, _signal) = context(&platform, dir.path());
                let mut session = SessionState::<MockEncoder>::new(&Scenario::new("s", [Step::End]));
                for (index, byte) in payloads.iter().enumerate() {
                    session.enqueue_output(data(index as u32, *byte));
                }
                drain(&mut session, &ctx).await;
                assert_eq!(std::fs::read(ctx.sink.path()).unwrap(), payloads);
            });
        }
    }
}
