//! Error types for the stream feeder.
//!
//! The error design separates three layers:
//!
//! - **FeederError**: everything a caller of [`StreamFeeder`](crate::StreamFeeder)
//!   can observe, either synchronously from `feed`/`start`/`stop` or through
//!   the start completion and the registered error handler
//! - **SinkError**: failures reported by the downstream transport
//! - **ConfigError**: invalid feeder configuration
//!
//! # Propagation
//!
//! State-machine violations and backpressure rejections are returned to the
//! immediate caller. Sink failures reach the start completion, the error
//! handler, or the `Failed` state (see [`StreamFeeder::failure`](crate::StreamFeeder::failure)).
//!
//! ```rust,ignore
//! match feeder.feed(payload, Some(tag)) {
//!     Ok(id) => debug!(%id, "queued"),
//!     Err(FeederError::Backpressure { queued, .. }) => {
//!         // Queue is at its hard cap; wait for the drain handler
//!         pause_producer(queued);
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::handlers::HandlerKind;
use crate::state::FeederState;

/// Errors surfaced by the stream feeder.
///
/// # Error Handling Strategy
///
/// - **InvalidState / Stopping**: the operation is not valid right now; fix the call order
/// - **Backpressure**: the hard cap is reached; retry after the drain handler fires
/// - **Sink**: transport failure; transient ones are retried by the delivery task
/// - **Cancelled**: the start was cancelled through its handle
/// - **HandlerPanicked**: a user callback panicked and the feeder failed
#[derive(Debug, Clone, Error)]
pub enum FeederError {
    /// The operation is not valid in the feeder's current state.
    #[error("Cannot {operation} while feeder is {state}")]
    InvalidState {
        /// The operation that was attempted
        operation: &'static str,
        /// The state the feeder was in
        state: FeederState,
    },

    /// A stop is in progress; no further messages are accepted.
    #[error("Feeder is stopping and no longer accepts {operation} calls")]
    Stopping {
        /// The operation that was attempted
        operation: &'static str,
    },

    /// The pending queue reached its hard cap and the message was not queued.
    #[error("Backpressure: {queued} messages queued, hard cap is {hard_cap}")]
    Backpressure {
        /// Number of messages in the queue when the feed was rejected
        queued: usize,
        /// The configured hard cap
        hard_cap: usize,
    },

    /// The sink reported a failure.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// The start was cancelled before the sink finished opening.
    #[error("Start cancelled before the sink was opened")]
    Cancelled,

    /// No tokio runtime was available to drive the feeder.
    #[error("No tokio runtime available to drive the feeder")]
    NoRuntime,

    /// A registered handler panicked.
    #[error("The {handler} handler panicked")]
    HandlerPanicked {
        /// Which handler panicked
        handler: HandlerKind,
    },

    /// An internal state transition was rejected.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// The current state
        from: FeederState,
        /// The attempted state
        to: FeederState,
    },

    /// The feeder configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeederError {
    /// Returns true for errors caused by calling an operation at the wrong time.
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::Stopping { .. })
    }

    pub(crate) const fn invalid_state(operation: &'static str, state: FeederState) -> Self {
        Self::InvalidState { operation, state }
    }
}

/// Errors reported by a [`Sink`](crate::sink::Sink).
///
/// # Transient vs. fatal
///
/// - **Unavailable**, **Timeout**: transient; the delivery task backs off and retries
/// - **ConnectionFailed**, **Closed**, **Rejected**, **Internal**: fatal; the feeder fails
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The connection to the sink could not be established or was lost.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The sink is temporarily unavailable.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The sink did not answer in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The sink has been closed.
    #[error("Sink is closed")]
    Closed,

    /// The sink refused the message permanently.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// An unexpected internal error occurred in the sink.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SinkError {
    /// Returns true if retrying the same operation later may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Errors raised while building or loading a [`FeederConfig`](crate::config::FeederConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The low-water mark is not strictly below the high-water mark.
    #[error("Low-water mark {low} must be below high-water mark {high}")]
    WatermarksInverted {
        /// Configured low-water mark
        low: usize,
        /// Configured high-water mark
        high: usize,
    },

    /// The hard cap is below the high-water mark.
    #[error("Hard cap {hard_cap} must be at least the high-water mark {high}")]
    HardCapBelowHighWater {
        /// Configured hard cap
        hard_cap: usize,
        /// Configured high-water mark
        high: usize,
    },

    /// A single value failed validation.
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// The configuration document could not be parsed.
    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Type alias for feeder results.
pub type FeederResult<T> = Result<T, FeederError>;

/// Type alias for sink results.
pub type SinkResult<T> = Result<T, SinkError>;
