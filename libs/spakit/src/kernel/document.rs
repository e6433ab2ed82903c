//! Host document readiness, observed once by `Core::init`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Loading,
    Interactive,
    #[default]
    Complete,
}

impl ReadyState {
    /// `Interactive` and `Complete` both count as ready.
    pub fn is_ready(self) -> bool {
        !matches!(self, Self::Loading)
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Loading => "loading",
            Self::Interactive => "interactive",
            Self::Complete => "complete",
        })
    }
}

/// Shared handle to the host's ready state. Clones observe the same state.
#[derive(Clone)]
pub struct HostDocument {
    state: Arc<watch::Sender<ReadyState>>,
}

impl Default for HostDocument {
    fn default() -> Self {
        Self::new(ReadyState::Complete)
    }
}

impl std::fmt::Debug for HostDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDocument")
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl HostDocument {
    pub fn new(state: ReadyState) -> Self {
        Self {
            state: Arc::new(watch::Sender::new(state)),
        }
    }

    pub fn loading() -> Self {
        Self::new(ReadyState::Loading)
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    pub fn set_ready_state(&self, state: ReadyState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "document ready state changed");
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ReadyState> {
        self.state.subscribe()
    }
}
