//! Feeder lifecycle states.
//!
//! ```text
//! Created -> Starting -> Ready <-> Full <-> Draining
//!               |          \        |        /
//!               v           +-------+-------+
//!             Failed <---------- running ----------> Stopped
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::FeederError;

/// Lifecycle state of a [`StreamFeeder`](crate::StreamFeeder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeederState {
    /// Constructed; `start` has not been called.
    Created,
    /// The sink is being opened.
    Starting,
    /// Accepting messages, no backpressure episode active.
    Ready,
    /// The queue is at or above the high-water mark.
    Full,
    /// The queue fell below the high-water mark but has not yet drained below the low-water mark.
    Draining,
    /// Stopped gracefully. Terminal.
    Stopped,
    /// Start failed or the sink failed irrecoverably. Terminal.
    Failed,
}

impl FeederState {
    /// Returns true if `feed` is allowed in this state.
    pub const fn accepts_feeds(self) -> bool {
        matches!(self, Self::Ready | Self::Full | Self::Draining)
    }

    /// Returns true for `Stopped` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Returns true if the lifecycle permits moving from `self` to `next`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Created, Self::Starting)
            | (Self::Starting, Self::Ready | Self::Failed)
            | (Self::Ready, Self::Full | Self::Draining)
            | (Self::Full, Self::Ready | Self::Draining)
            | (Self::Draining, Self::Ready | Self::Full)
            | (Self::Ready | Self::Full | Self::Draining, Self::Stopped | Self::Failed) => true,
            _ => false,
        }
    }

    /// Checked transition.
    pub fn transition_to(self, next: Self) -> Result<Self, FeederError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(FeederError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for FeederState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Full => "full",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
