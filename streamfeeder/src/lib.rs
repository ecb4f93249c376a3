//! `StreamFeeder` - Backpressure-aware producer adapter for rate-limited sinks
//!
//! A [`StreamFeeder`] sits between a producer that can emit messages faster
//! than the downstream accepts them and a [`Sink`] that takes them at its own
//! pace. Producers never block: `feed` queues the message and returns. A
//! single background task delivers the queue in FIFO order.
//!
//! The queue is governed by a high-water mark and a low-water mark. Reaching
//! the high-water mark fires the full handler once; the drain handler fires
//! once the queue falls back below the low-water mark. Producers that keep
//! feeding past a hard cap get [`FeederError::Backpressure`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod errors;
pub mod handlers;
pub mod sink;
pub mod state;
pub mod stats;
pub mod types;
pub mod watermark;

mod feeder;
mod retry;
mod start;

pub use config::FeederConfig;
pub use errors::{ConfigError, FeederError, FeederResult, SinkError, SinkResult};
pub use feeder::{StopReport, StreamFeeder};
pub use handlers::HandlerKind;
pub use sink::{Sink, WriteStatus};
pub use start::StartHandle;
pub use state::FeederState;
pub use stats::FeederStats;
pub use types::{Message, MessageId, Tag, Timestamp};
pub use watermark::{BackpressureGauge, Transition, Watermarks};

/// Everything needed to feed a sink.
pub mod prelude {
    pub use crate::config::FeederConfig;
    pub use crate::errors::{FeederError, FeederResult, SinkError, SinkResult};
    pub use crate::feeder::{StopReport, StreamFeeder};
    pub use crate::sink::{Sink, WriteStatus};
    pub use crate::state::FeederState;
    pub use crate::types::{Message, MessageId, Tag};
}
