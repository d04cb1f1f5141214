//! Deterministic in-process media platform.
//!
//! [`MockPlatform`] hands out [`MockEncoder`]s that enforce the encoder
//! lifecycle transition table and a [`SyntheticStream`] that feeds frames
//! into their input surfaces. Faults and per-operation latency are injected
//! through [`MockBehavior`]. Nothing here touches real media hardware.

mod encoder;
mod stream;

pub use encoder::{EncoderState, MockEncoder};
pub use stream::SyntheticStream;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::debug;

use crate::error::{CodecError, CodecResult};
use crate::platform::{CodecOp, MediaPlatform, SurfaceId};

/// Mime type served by the mock platform.
pub const MOCK_MIME: &str = "video/mp4v-es";

/// Encoder name served by the mock platform.
pub const MOCK_CODEC_NAME: &str = "avenc_mpeg4";

/// Raw frame pushed into an input surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Data { payload: Vec<u8>, pts_us: u64 },
    EndOfStream { pts_us: u64 },
}

/// Fault injection and latency for mock operations.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    fail_ops: HashSet<CodecOp>,
    latency: HashMap<CodecOp, Duration>,
}

impl MockBehavior {
    /// Make every call of `op` fail with [`CodecError::Injected`].
    #[must_use]
    pub fn fail_op(mut self, op: CodecOp) -> Self {
        self.fail_ops.insert(op);
        self
    }

    /// Delay every call of `op` before it takes effect.
    #[must_use]
    pub fn with_latency(mut self, op: CodecOp, latency: Duration) -> Self {
        self.latency.insert(op, latency);
        self
    }

    pub(crate) async fn gate(&self, op: CodecOp) -> CodecResult<()> {
        if let Some(latency) = self.latency.get(&op) {
            tokio::time::sleep(*latency).await;
        }
        if self.fail_ops.contains(&op) {
            debug!(op = %op, "injecting mock failure");
            return Err(CodecError::Injected(op));
        }
        Ok(())
    }
}

/// State shared by the platform, its encoders and its stream producer.
#[derive(Debug, Default)]
pub(crate) struct PlatformShared {
    surfaces: Mutex<HashMap<SurfaceId, Weak<encoder::EncoderCore>>>,
    next_encoder_id: AtomicU64,
    created: AtomicU64,
    released: AtomicU64,
}

impl PlatformShared {
    fn attach(&self, surface: SurfaceId, core: Weak<encoder::EncoderCore>) {
        self.surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(surface, core);
    }

    fn detach(&self, surface: &SurfaceId) {
        self.surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(surface);
    }

    fn is_attached(&self, surface: &SurfaceId) -> bool {
        self.surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(surface)
            .is_some_and(|core| core.strong_count() > 0)
    }

    /// Hand a frame to the encoder behind `surface`. Returns false when the
    /// surface is no longer attached.
    fn deliver(&self, surface: &SurfaceId, frame: Frame) -> bool {
        let core = self
            .surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(surface)
            .and_then(Weak::upgrade);
        match core {
            Some(core) => {
                core.accept(frame);
                true
            }
            None => false,
        }
    }
}

/// In-process [`MediaPlatform`] backed by [`MockEncoder`]s.
#[derive(Debug, Clone)]
pub struct MockPlatform {
    shared: Arc<PlatformShared>,
    behavior: Arc<MockBehavior>,
    stream: SyntheticStream,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        let shared = Arc::new(PlatformShared::default());
        Self {
            stream: SyntheticStream::new(Arc::clone(&shared)),
            shared,
            behavior: Arc::new(behavior),
        }
    }

    /// Scale frame pacing. `0.0` pushes frames back to back.
    #[must_use]
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.stream = self.stream.with_time_scale(scale);
        self
    }

    /// Encoders created so far.
    pub fn created_encoders(&self) -> u64 {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Encoders released so far.
    pub fn released_encoders(&self) -> u64 {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Encoders created and not yet released.
    pub fn live_encoders(&self) -> u64 {
        self.created_encoders()
            .saturating_sub(self.released_encoders())
    }

    async fn create(&self) -> CodecResult<MockEncoder> {
        self.behavior.gate(CodecOp::Create).await?;
        let id = self.shared.next_encoder_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        debug!(encoder = id, "mock encoder created");
        Ok(MockEncoder::new(
            id,
            Arc::clone(&self.shared),
            Arc::clone(&self.behavior),
        ))
    }
}

impl MediaPlatform for MockPlatform {
    type Encoder = MockEncoder;
    type Stream = SyntheticStream;

    async fn create_encoder_by_mime(&self, mime: &str) -> CodecResult<MockEncoder> {
        if mime != MOCK_MIME {
            return Err(CodecError::UnknownMime(mime.to_string()));
        }
        self.create().await
    }

    async fn create_encoder_by_name(&self, name: &str) -> CodecResult<MockEncoder> {
        if name != MOCK_CODEC_NAME {
            return Err(CodecError::UnknownName(name.to_string()));
        }
        self.create().await
    }

    fn stream_source(&self) -> SyntheticStream {
        self.stream.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::VideoEncoder;

    #[tokio::test]
    async fn creates_by_known_mime_and_name_only() {
        let platform = MockPlatform::new();

        assert!(platform.create_encoder_by_mime(MOCK_MIME).await.is_ok());
        assert!(platform.create_encoder_by_name(MOCK_CODEC_NAME).await.is_ok());
        assert_eq!(
            platform
                .create_encoder_by_mime("video/avc")
                .await
                .unwrap_err(),
            CodecError::UnknownMime("video/avc".to_string())
        );
        assert!(matches!(
            platform.create_encoder_by_name("nope").await,
            Err(CodecError::UnknownName(_))
        ));
        assert_eq!(platform.created_encoders(), 2);
    }

    #[tokio::test]
    async fn live_count_tracks_release() {
        let platform = MockPlatform::new();
        let first = platform.create_encoder_by_mime(MOCK_MIME).await.unwrap();
        let _second = platform.create_encoder_by_mime(MOCK_MIME).await.unwrap();
        assert_eq!(platform.live_encoders(), 2);

        first.release().await.unwrap();
        assert_eq!(platform.live_encoders(), 1);
        assert_eq!(platform.released_encoders(), 1);
    }

    #[tokio::test]
    async fn injected_create_failure() {
        let platform = MockPlatform::with_behavior(MockBehavior::default().fail_op(CodecOp::Create));
        assert_eq!(
            platform
                .create_encoder_by_mime(MOCK_MIME)
                .await
                .unwrap_err(),
            CodecError::Injected(CodecOp::Create)
        );
        assert_eq!(platform.created_encoders(), 0);
    }
}
