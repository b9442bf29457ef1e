//! Adapter lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Radio stack lifecycle state. `Error` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AdapterState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Error,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(self, to: AdapterState) -> bool {
        use AdapterState::*;
        matches!(
            (self, to),
            (Uninitialized, Initializing) | (Initializing, Ready) | (Initializing, Error) | (Ready, Error)
        )
    }

    /// Move to `to` if legal. Illegal transitions are logged and leave the
    /// state unchanged.
    pub fn transition(&mut self, to: AdapterState) -> bool {
        if !self.can_transition(to) {
            tracing::warn!("Invalid state transition: {} -> {}", self, to);
            return false;
        }
        tracing::info!("State: {} -> {}", self, to);
        *self = to;
        true
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
