//! The transport a feeder writes onto.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::SinkResult;
use crate::types::Message;

/// Outcome of a successful [`Sink::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The sink took the message; it will not be offered again.
    Written,
    /// The sink has no capacity right now; the same message is offered again later.
    Busy,
}

/// A downstream consumer of fed messages.
///
/// The feeder calls `open` once from `start`, `write` once per delivery
/// attempt from its delivery task (never concurrently, always in FIFO order),
/// and `close` at most once: from `stop`, after a failure of an open sink,
/// or after an open that timed out or was cancelled. Transport-level retry
/// policy belongs to the implementation; the feeder only reacts to `Busy` and to
/// [`SinkError::is_transient`](crate::errors::SinkError::is_transient).
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Establishes the connection.
    async fn open(&self) -> SinkResult<()>;

    /// Offers one message.
    async fn write(&self, message: &Message) -> SinkResult<WriteStatus>;

    /// Releases the connection.
    async fn close(&self) -> SinkResult<()>;
}

#[async_trait]
impl<T> Sink for Arc<T>
where
    T: Sink + ?Sized,
{
    async fn open(&self) -> SinkResult<()> {
        (**self).open().await
    }

    async fn write(&self, message: &Message) -> SinkResult<WriteStatus> {
        (**self).write(message).await
    }

    async fn close(&self) -> SinkResult<()> {
        (**self).close().await
    }
}
