//! Error types for the reliability harness.

use std::path::PathBuf;
use std::time::Duration;

use crate::platform::CodecOp;

/// Failure reported by the resource under test.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("{op} is not valid in state {state}")]
    InvalidState { op: CodecOp, state: String },

    #[error("no encoder registered for mime type '{0}'")]
    UnknownMime(String),

    #[error("no encoder registered under name '{0}'")]
    UnknownName(String),

    #[error("output buffer {0} is not owned by the client")]
    UnknownBuffer(u32),

    #[error("encoder has been released")]
    Released,

    #[error("injected fault on {0}")]
    Injected(CodecOp),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Failure reported by the stream producer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("surface '{0}' is not attached to any encoder")]
    UnknownSurface(String),

    #[error("stream parameters not set: {0}")]
    NotConfigured(&'static str),
}

/// Failure of a single step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("no live encoder handle for {0}")]
    NoLiveCodec(CodecOp),

    #[error("no input surface has been acquired")]
    NoSurface,
}

/// A completion token was resolved a second time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("case already completed via {first}; rejected second completion via {second}")]
pub struct CompletionError {
    pub first: crate::completion::CompletionPath,
    pub second: crate::completion::CompletionPath,
}

/// Errors surfaced by the harness outside a running case.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid scenario '{name}': {reason}")]
    InvalidScenario { name: String, reason: String },

    #[error("case '{0}' timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("failed to create encoder: {0}")]
    Create(#[from] CodecError),

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
