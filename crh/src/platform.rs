//! Interfaces to the resource under test.
//!
//! A [`MediaPlatform`] creates [`VideoEncoder`] handles and hands out the
//! [`StreamSource`] that feeds their input surfaces. Every lifecycle call is
//! deferred; output is delivered as [`CodecEvent`]s on a channel obtained
//! through [`VideoEncoder::subscribe`].

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{CodecError, CodecResult, StreamError};

/// Output buffer flag marking end of stream.
pub const FLAG_EOS: u32 = 1;

/// Lifecycle operation names, used in errors and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecOp {
    Create,
    Configure,
    GetInputSurface,
    Prepare,
    Start,
    Flush,
    Stop,
    Reset,
    Release,
    FreeOutputBuffer,
    GetOutputFormat,
}

impl CodecOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Configure => "configure",
            Self::GetInputSurface => "get_input_surface",
            Self::Prepare => "prepare",
            Self::Start => "start",
            Self::Flush => "flush",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::Release => "release",
            Self::FreeOutputBuffer => "free_output_buffer",
            Self::GetOutputFormat => "get_output_format",
        }
    }
}

impl fmt::Display for CodecOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder input description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub frame_rate: u32,
}

impl MediaFormat {
    pub fn validate(&self) -> CodecResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidFormat(format!(
                "resolution {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 {
            return Err(CodecError::InvalidFormat(
                "frame_rate must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}fps pixfmt={}",
            self.width, self.height, self.frame_rate, self.pixel_format
        )
    }
}

/// Opaque identifier of an encoder input surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub String);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One encoded output buffer lent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    pub index: u32,
    pub data: Vec<u8>,
    pub flags: u32,
    pub pts_us: u64,
}

impl OutputBuffer {
    pub fn is_eos(&self) -> bool {
        self.flags & FLAG_EOS != 0
    }
}

/// Notifications emitted by an encoder.
#[derive(Debug, Clone)]
pub enum CodecEvent {
    NewOutputData(OutputBuffer),
    Error(CodecError),
    StreamChanged(MediaFormat),
}

/// A live encoder handle.
///
/// Handles are cheap to clone; all clones refer to the same instance.
pub trait VideoEncoder: Clone + Send + Sync + 'static {
    fn configure(&self, format: &MediaFormat) -> impl Future<Output = CodecResult<()>> + Send;

    fn get_input_surface(&self) -> impl Future<Output = CodecResult<SurfaceId>> + Send;

    fn prepare(&self) -> impl Future<Output = CodecResult<()>> + Send;

    fn start(&self) -> impl Future<Output = CodecResult<()>> + Send;

    fn flush(&self) -> impl Future<Output = CodecResult<()>> + Send;

    fn stop(&self) -> impl Future<Output = CodecResult<()>> + Send;

    fn reset(&self) -> impl Future<Output = CodecResult<()>> + Send;

    fn release(&self) -> impl Future<Output = CodecResult<()>> + Send;

    /// Return an output buffer to the encoder.
    fn free_output_buffer(&self, index: u32) -> impl Future<Output = CodecResult<()>> + Send;

    fn get_output_format(&self) -> impl Future<Output = CodecResult<MediaFormat>> + Send;

    /// Attach a new event receiver. Only the most recent subscriber
    /// receives events.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<CodecEvent>;
}

/// Producer of raw frames into an encoder input surface.
pub trait StreamSource: Clone + Send + Sync + 'static {
    fn set_resolution(&self, width: u32, height: u32);

    fn set_frame_rate(&self, frame_rate: u32);

    fn set_frame_count(&self, frame_count: u32);

    fn start_stream(&self, surface: &SurfaceId) -> Result<(), StreamError>;

    fn close_stream(&self, surface: &SurfaceId);
}

/// Factory for encoders and their stream producer.
pub trait MediaPlatform: Send + Sync + 'static {
    type Encoder: VideoEncoder;
    type Stream: StreamSource;

    fn create_encoder_by_mime(
        &self,
        mime: &str,
    ) -> impl Future<Output = CodecResult<Self::Encoder>> + Send;

    fn create_encoder_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = CodecResult<Self::Encoder>> + Send;

    fn stream_source(&self) -> Self::Stream;
}
