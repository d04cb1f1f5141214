//! Mock encoder enforcing the lifecycle transition table.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Frame, MockBehavior, PlatformShared};
use crate::error::{CodecError, CodecResult};
use crate::platform::{
    CodecEvent, CodecOp, FLAG_EOS, MediaFormat, OutputBuffer, SurfaceId, VideoEncoder,
};

/// Lifecycle state of a [`MockEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Idle,
    Configured,
    Prepared,
    Running,
    Flushed,
    Stopped,
    EndOfStream,
    Released,
}

impl EncoderState {
    /// States in which queued input is turned into output.
    pub fn is_executing(self) -> bool {
        matches!(self, Self::Running | Self::Flushed | Self::EndOfStream)
    }
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
struct Inner {
    state: EncoderState,
    format: Option<MediaFormat>,
    surface: Option<SurfaceId>,
    pending: VecDeque<Frame>,
    lent: HashSet<u32>,
    next_index: u32,
    format_announced: bool,
    events: Option<mpsc::UnboundedSender<CodecEvent>>,
}

impl Inner {
    fn require(&self, op: CodecOp, allowed: &[EncoderState]) -> CodecResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CodecError::InvalidState {
                op,
                state: self.state.to_string(),
            })
        }
    }

    fn require_not_released(&self, op: CodecOp) -> CodecResult<()> {
        if self.state == EncoderState::Released {
            Err(CodecError::InvalidState {
                op,
                state: self.state.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: CodecEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn encode(&mut self, frame: Frame) {
        if !self.format_announced
            && let Some(format) = self.format.clone()
        {
            self.format_announced = true;
            self.emit(CodecEvent::StreamChanged(format));
        }

        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        self.lent.insert(index);

        let buffer = match frame {
            Frame::Data { payload, pts_us } => OutputBuffer {
                index,
                data: payload,
                flags: 0,
                pts_us,
            },
            Frame::EndOfStream { pts_us } => {
                if matches!(self.state, EncoderState::Running | EncoderState::Flushed) {
                    self.state = EncoderState::EndOfStream;
                }
                OutputBuffer {
                    index,
                    data: Vec::new(),
                    flags: FLAG_EOS,
                    pts_us,
                }
            }
        };
        trace!(index, flags = buffer.flags, "mock output ready");
        self.emit(CodecEvent::NewOutputData(buffer));
    }

    fn encode_pending(&mut self) {
        while self.state.is_executing()
            && let Some(frame) = self.pending.pop_front()
        {
            self.encode(frame);
        }
    }
}

/// Shared core addressed by input surfaces.
#[derive(Debug)]
pub(crate) struct EncoderCore {
    id: u64,
    inner: Mutex<Inner>,
}

impl EncoderCore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept a frame from the input surface.
    pub(crate) fn accept(&self, frame: Frame) {
        let mut inner = self.lock();
        match inner.state {
            state if state.is_executing() => inner.encode(frame),
            EncoderState::Released => {}
            _ => inner.pending.push_back(frame),
        }
    }
}

/// Handle to a mock encoder instance.
#[derive(Debug, Clone)]
pub struct MockEncoder {
    core: Arc<EncoderCore>,
    shared: Arc<PlatformShared>,
    behavior: Arc<MockBehavior>,
}

impl MockEncoder {
    pub(crate) fn new(id: u64, shared: Arc<PlatformShared>, behavior: Arc<MockBehavior>) -> Self {
        Self {
            core: Arc::new(EncoderCore {
                id,
                inner: Mutex::new(Inner {
                    state: EncoderState::Idle,
                    format: None,
                    surface: None,
                    pending: VecDeque::new(),
                    lent: HashSet::new(),
                    next_index: 0,
                    format_announced: false,
                    events: None,
                }),
            }),
            shared,
            behavior,
        }
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn state(&self) -> EncoderState {
        self.core.lock().state
    }

    /// Frames waiting on the input surface for the encoder to execute.
    pub fn pending_frames(&self) -> usize {
        self.core.lock().pending.len()
    }

    async fn transition<T, F>(&self, op: CodecOp, apply: F) -> CodecResult<T>
    where
        F: FnOnce(&mut Inner) -> CodecResult<T> + Send,
    {
        self.behavior.gate(op).await?;
        let mut inner = self.core.lock();
        let result = apply(&mut inner);
        debug!(
            encoder = self.core.id,
            op = %op,
            state = %inner.state,
            ok = result.is_ok(),
            "mock transition"
        );
        result
    }

    fn detach_surface(&self, inner: &mut Inner) {
        if let Some(surface) = inner.surface.take() {
            self.shared.detach(&surface);
        }
    }
}

impl VideoEncoder for MockEncoder {
    async fn configure(&self, format: &MediaFormat) -> CodecResult<()> {
        let format = format.clone();
        self.transition(CodecOp::Configure, move |inner| {
            inner.require(CodecOp::Configure, &[EncoderState::Idle])?;
            format.validate()?;
            inner.format = Some(format);
            inner.format_announced = false;
            inner.state = EncoderState::Configured;
            Ok(())
        })
        .await
    }

    async fn get_input_surface(&self) -> CodecResult<SurfaceId> {
        let id = self.core.id;
        let surface = self
            .transition(CodecOp::GetInputSurface, |inner| {
                inner.require(
                    CodecOp::GetInputSurface,
                    &[EncoderState::Configured, EncoderState::Prepared],
                )?;
                Ok(inner
                    .surface
                    .get_or_insert_with(|| SurfaceId(format!("mock-surface-{id}")))
                    .clone())
            })
            .await?;
        self.shared
            .attach(surface.clone(), Arc::downgrade(&self.core));
        Ok(surface)
    }

    async fn prepare(&self) -> CodecResult<()> {
        self.transition(CodecOp::Prepare, |inner| {
            inner.require(CodecOp::Prepare, &[EncoderState::Configured])?;
            inner.state = EncoderState::Prepared;
            Ok(())
        })
        .await
    }

    async fn start(&self) -> CodecResult<()> {
        self.transition(CodecOp::Start, |inner| {
            inner.require(
                CodecOp::Start,
                &[EncoderState::Prepared, EncoderState::Stopped],
            )?;
            inner.state = EncoderState::Running;
            inner.encode_pending();
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> CodecResult<()> {
        self.transition(CodecOp::Flush, |inner| {
            inner.require(
                CodecOp::Flush,
                &[
                    EncoderState::Running,
                    EncoderState::Flushed,
                    EncoderState::EndOfStream,
                ],
            )?;
            inner.state = EncoderState::Flushed;
            Ok(())
        })
        .await
    }

    async fn stop(&self) -> CodecResult<()> {
        self.transition(CodecOp::Stop, |inner| {
            inner.require(
                CodecOp::Stop,
                &[
                    EncoderState::Running,
                    EncoderState::Flushed,
                    EncoderState::EndOfStream,
                ],
            )?;
            inner.state = EncoderState::Stopped;
            Ok(())
        })
        .await
    }

    async fn reset(&self) -> CodecResult<()> {
        self.transition(CodecOp::Reset, |inner| {
            inner.require_not_released(CodecOp::Reset)?;
            self.detach_surface(inner);
            inner.format = None;
            inner.format_announced = false;
            inner.pending.clear();
            inner.lent.clear();
            inner.state = EncoderState::Idle;
            Ok(())
        })
        .await
    }

    async fn release(&self) -> CodecResult<()> {
        self.transition(CodecOp::Release, |inner| {
            inner.require_not_released(CodecOp::Release)?;
            self.detach_surface(inner);
            inner.pending.clear();
            inner.lent.clear();
            inner.events = None;
            inner.state = EncoderState::Released;
            self.shared.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
    }

    async fn free_output_buffer(&self, index: u32) -> CodecResult<()> {
        self.transition(CodecOp::FreeOutputBuffer, |inner| {
            if inner.state == EncoderState::Released {
                return Err(CodecError::Released);
            }
            if inner.lent.remove(&index) {
                Ok(())
            } else {
                Err(CodecError::UnknownBuffer(index))
            }
        })
        .await
    }

    async fn get_output_format(&self) -> CodecResult<MediaFormat> {
        self.transition(CodecOp::GetOutputFormat, |inner| {
            inner.require_not_released(CodecOp::GetOutputFormat)?;
            inner.format.clone().ok_or(CodecError::InvalidState {
                op: CodecOp::GetOutputFormat,
                state: inner.state.to_string(),
            })
        })
        .await
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<CodecEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.core.lock().events = Some(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MOCK_MIME, MockPlatform};
    use crate::platform::MediaPlatform;

    fn format() -> MediaFormat {
        MediaFormat {
            width: 320,
            height: 240,
            pixel_format: 3,
            frame_rate: 30,
        }
    }

    fn frame(seq: u8) -> Frame {
        Frame::Data {
            payload: vec![seq],
            pts_us: u64::from(seq),
        }
    }

    async fn prepared() -> (MockPlatform, MockEncoder) {
        let platform = MockPlatform::new();
        let encoder = platform.create_encoder_by_mime(MOCK_MIME).await.unwrap();
        encoder.configure(&format()).await.unwrap();
        encoder.get_input_surface().await.unwrap();
        encoder.prepare().await.unwrap();
        (platform, encoder)
    }

    #[tokio::test]
    async fn full_lifecycle_follows_transition_table() {
        let (platform, encoder) = prepared().await;
        assert_eq!(encoder.state(), EncoderState::Prepared);

        encoder.start().await.unwrap();
        assert_eq!(encoder.state(), EncoderState::Running);
        encoder.flush().await.unwrap();
        assert_eq!(encoder.state(), EncoderState::Flushed);
        encoder.stop().await.unwrap();
        assert_eq!(encoder.state(), EncoderState::Stopped);
        encoder.start().await.unwrap();
        encoder.reset().await.unwrap();
        assert_eq!(encoder.state(), EncoderState::Idle);
        encoder.configure(&format()).await.unwrap();
        encoder.release().await.unwrap();
        assert_eq!(encoder.state(), EncoderState::Released);
        assert_eq!(platform.live_encoders(), 0);
    }

    #[tokio::test]
    async fn invalid_transitions_are_rejected() {
        let platform = MockPlatform::new();
        let encoder = platform.create_encoder_by_mime(MOCK_MIME).await.unwrap();

        for result in [
            encoder.prepare().await,
            encoder.start().await,
            encoder.flush().await,
            encoder.stop().await,
        ] {
            assert!(matches!(result, Err(CodecError::InvalidState { .. })));
        }
        assert!(encoder.get_input_surface().await.is_err());

        encoder.configure(&format()).await.unwrap();
        assert_eq!(
            encoder.configure(&format()).await.unwrap_err(),
            CodecError::InvalidState {
                op: CodecOp::Configure,
                state: "Configured".to_string(),
            }
        );

        encoder.release().await.unwrap();
        assert!(encoder.release().await.is_err());
        assert!(encoder.reset().await.is_err());
    }

    #[tokio::test]
    async fn frames_queue_until_executing() {
        let (_platform, encoder) = prepared().await;
        let mut events = encoder.subscribe();

        encoder.core.accept(frame(1));
        encoder.core.accept(frame(2));
        assert_eq!(encoder.pending_frames(), 2);
        assert!(events.try_recv().is_err());

        encoder.start().await.unwrap();
        assert_eq!(encoder.pending_frames(), 0);
        assert!(matches!(
            events.try_recv().unwrap(),
            CodecEvent::StreamChanged(_)
        ));
        for expected in [1u8, 2] {
            match events.try_recv().unwrap() {
                CodecEvent::NewOutputData(buffer) => assert_eq!(buffer.data, vec![expected]),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn eos_frame_moves_to_end_of_stream() {
        let (_platform, encoder) = prepared().await;
        let mut events = encoder.subscribe();
        encoder.start().await.unwrap();

        encoder.core.accept(Frame::EndOfStream { pts_us: 0 });
        assert_eq!(encoder.state(), EncoderState::EndOfStream);

        let mut saw_eos = false;
        while let Ok(event) = events.try_recv() {
            if let CodecEvent::NewOutputData(buffer) = event {
                saw_eos |= buffer.is_eos();
            }
        }
        assert!(saw_eos);

        encoder.flush().await.unwrap();
        encoder.stop().await.unwrap();
        encoder.start().await.unwrap();
    }

    #[tokio::test]
    async fn free_output_buffer_rejects_unknown_index() {
        let (_platform, encoder) = prepared().await;
        let mut events = encoder.subscribe();
        encoder.start().await.unwrap();
        encoder.core.accept(frame(7));

        let index = loop {
            if let CodecEvent::NewOutputData(buffer) = events.try_recv().unwrap() {
                break buffer.index;
            }
        };
        encoder.free_output_buffer(index).await.unwrap();
        assert_eq!(
            encoder.free_output_buffer(index).await.unwrap_err(),
            CodecError::UnknownBuffer(index)
        );
    }

    #[tokio::test]
    async fn output_format_requires_configuration() {
        let platform = MockPlatform::new();
        let encoder = platform.create_encoder_by_mime(MOCK_MIME).await.unwrap();
        assert!(encoder.get_output_format().await.is_err());
        encoder.configure(&format()).await.unwrap();
        assert_eq!(encoder.get_output_format().await.unwrap(), format());
    }

    #[tokio::test]
    async fn injected_fault_fails_only_that_op() {
        let platform = MockPlatform::with_behavior(MockBehavior::default().fail_op(CodecOp::Prepare));
        let encoder = platform.create_encoder_by_mime(MOCK_MIME).await.unwrap();
        encoder.configure(&format()).await.unwrap();
        assert_eq!(
            encoder.prepare().await.unwrap_err(),
            CodecError::Injected(CodecOp::Prepare)
        );
        assert_eq!(encoder.state(), EncoderState::Configured);
    }
}
