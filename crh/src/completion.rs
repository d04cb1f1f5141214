//! Single-shot case completion.
//!
//! Both the sequencer and the output drain may finish a case. They share one
//! [`CompletionToken`]; the first resolution wins and any later one is
//! rejected with [`CompletionError`] and remembered for the report.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::CompletionError;

/// Which code path resolved a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPath {
    /// `END` reached or the step list ran out.
    Sequencer,
    /// EOS observed with `work_done_on_eos` armed.
    Drain,
    /// A hard failure stopped the sequence.
    Halted,
}

impl fmt::Display for CompletionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequencer => "sequencer",
            Self::Drain => "drain",
            Self::Halted => "halted",
        })
    }
}

#[derive(Debug, Default)]
struct TokenState {
    resolved: Option<CompletionPath>,
    notify: Option<oneshot::Sender<CompletionPath>>,
    rejected: Vec<CompletionPath>,
}

/// Shared handle resolving a case exactly once.
#[derive(Debug, Clone)]
pub struct CompletionToken {
    state: Arc<Mutex<TokenState>>,
}

/// Receiving side of a [`CompletionToken`].
#[derive(Debug)]
pub struct CompletionSignal {
    rx: oneshot::Receiver<CompletionPath>,
}

impl CompletionToken {
    pub fn new() -> (Self, CompletionSignal) {
        let (tx, rx) = oneshot::channel();
        let token = Self {
            state: Arc::new(Mutex::new(TokenState {
                notify: Some(tx),
                ..TokenState::default()
            })),
        };
        (token, CompletionSignal { rx })
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve the case. Fails if it was already resolved.
    pub fn resolve(&self, path: CompletionPath) -> Result<(), CompletionError> {
        let mut state = self.lock();
        if let Some(first) = state.resolved {
            state.rejected.push(path);
            let err = CompletionError {
                first,
                second: path,
            };
            error!(%first, second = %path, "completion resolved twice");
            return Err(err);
        }

        state.resolved = Some(path);
        if let Some(tx) = state.notify.take() {
            let _ = tx.send(path);
        }
        debug!(%path, "case completed");
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().resolved.is_some()
    }

    /// Resolutions that arrived after the first one.
    pub fn rejected(&self) -> Vec<CompletionPath> {
        self.lock().rejected.clone()
    }
}

impl CompletionSignal {
    /// The resolved path, if any. Resolution sends synchronously, so this
    /// never misses a path that was resolved before the call.
    pub fn try_take(&mut self) -> Option<CompletionPath> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_resolution_wins() {
        let (token, mut signal) = CompletionToken::new();
        token.resolve(CompletionPath::Drain).unwrap();

        let err = token.resolve(CompletionPath::Sequencer).unwrap_err();
        assert_eq!(err.first, CompletionPath::Drain);
        assert_eq!(err.second, CompletionPath::Sequencer);
        assert_eq!(token.rejected(), vec![CompletionPath::Sequencer]);
        assert_eq!(signal.try_take(), Some(CompletionPath::Drain));
    }

    #[test]
    fn clones_share_state() {
        let (token, mut signal) = CompletionToken::new();
        let other = token.clone();
        assert!(signal.try_take().is_none());

        other.resolve(CompletionPath::Halted).unwrap();
        assert!(token.is_resolved());
        assert!(token.resolve(CompletionPath::Halted).is_err());
        assert_eq!(signal.try_take(), Some(CompletionPath::Halted));
    }

    #[test]
    fn dropped_token_yields_none() {
        let (token, mut signal) = CompletionToken::new();
        drop(token);
        assert_eq!(signal.try_take(), None);
    }
}
