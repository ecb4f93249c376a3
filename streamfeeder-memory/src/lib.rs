//! In-memory sink for the `StreamFeeder` crate
//!
//! This crate provides an in-memory implementation of the `Sink` trait from
//! the streamfeeder crate. It records everything written to it and can be
//! scripted to push back, fail or stall, which makes it the sink of choice
//! for tests and demos where no real downstream exists.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use streamfeeder::errors::{SinkError, SinkResult};
use streamfeeder::sink::{Sink, WriteStatus};
use streamfeeder::types::Message;
use tracing::{debug, trace};

/// How the sink answers writes that are not scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Open,
    Paused,
    Granted(usize),
}

#[derive(Debug)]
struct SinkState {
    written: Vec<Message>,
    admission: Admission,
    open_failure: Option<SinkError>,
    write_failures: VecDeque<SinkError>,
    open_delay: Option<Duration>,
    write_delay: Option<Duration>,
    write_attempts: usize,
    opened: bool,
    closed: bool,
}

impl Default for SinkState {
    fn default() -> Self {
        Self {
            written: Vec::new(),
            admission: Admission::Open,
            open_failure: None,
            write_failures: VecDeque::new(),
            open_delay: None,
            write_delay: None,
            write_attempts: 0,
            opened: false,
            closed: false,
        }
    }
}

/// Thread-safe recording sink for testing
///
/// Clones share the same recording, so a test can keep one clone and hand
/// the other to a feeder.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl InMemorySink {
    /// Create a new sink that accepts every write
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every write with `Busy` until resumed or granted
    pub fn pause(&self) {
        self.state.lock().admission = Admission::Paused;
    }

    /// Accept every write again
    pub fn resume(&self) {
        self.state.lock().admission = Admission::Open;
    }

    /// Accept exactly `writes` more messages, then answer `Busy`
    ///
    /// Grants accumulate while the sink is rationed.
    pub fn grant(&self, writes: usize) {
        let mut state = self.state.lock();
        state.admission = match state.admission {
            Admission::Granted(left) => Admission::Granted(left + writes),
            Admission::Open | Admission::Paused => Admission::Granted(writes),
        };
    }

    /// Make the next `open` fail with `error`
    pub fn fail_open(&self, error: SinkError) {
        self.state.lock().open_failure = Some(error);
    }

    /// Make the next write attempt fail with `error`
    ///
    /// Calls queue up; each failure is consumed by one write attempt.
    pub fn fail_next_write(&self, error: SinkError) {
        self.state.lock().write_failures.push_back(error);
    }

    /// Delay every `open` by `delay`
    pub fn delay_open(&self, delay: Duration) {
        self.state.lock().open_delay = Some(delay);
    }

    /// Delay every write attempt by `delay`
    pub fn delay_writes(&self, delay: Duration) {
        self.state.lock().write_delay = Some(delay);
    }

    /// Messages accepted so far, in write order
    pub fn written(&self) -> Vec<Message> {
        self.state.lock().written.clone()
    }

    /// Number of messages accepted so far
    pub fn written_count(&self) -> usize {
        self.state.lock().written.len()
    }

    /// Number of write calls, including busy answers and failures
    pub fn write_attempts(&self) -> usize {
        self.state.lock().write_attempts
    }

    /// True between a successful `open` and `close`
    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        state.opened && !state.closed
    }

    /// True once `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn open(&self) -> SinkResult<()> {
        let delay = self.state.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(error) = state.open_failure.take() {
            debug!(error = %error, "scripted open failure");
            return Err(error);
        }
        state.opened = true;
        state.closed = false;
        Ok(())
    }

    async fn write(&self, message: &Message) -> SinkResult<WriteStatus> {
        let delay = self.state.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.write_attempts += 1;

        if !state.opened || state.closed {
            return Err(SinkError::Closed);
        }
        if let Some(error) = state.write_failures.pop_front() {
            debug!(message_id = %message.id, error = %error, "scripted write failure");
            return Err(error);
        }

        match state.admission {
            Admission::Paused | Admission::Granted(0) => {
                trace!(message_id = %message.id, "sink busy");
                return Ok(WriteStatus::Busy);
            }
            Admission::Granted(left) => state.admission = Admission::Granted(left - 1),
            Admission::Open => {}
        }

        state.written.push(message.clone());
        trace!(message_id = %message.id, written = state.written.len(), "message written");
        Ok(WriteStatus::Written)
    }

    async fn close(&self) -> SinkResult<()> {
        let mut state = self.state.lock();
        state.closed = true;
        debug!(written = state.written.len(), "sink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn opened() -> InMemorySink {
        let sink = InMemorySink::new();
        sink.open().await.unwrap();
        sink
    }

    fn message(n: u64) -> Message {
        Message::new(json!({ "n": n }), None)
    }

    #[tokio::test]
    async fn test_new_sink_is_empty_and_closed() {
        let sink = InMemorySink::new();
        assert_eq!(sink.written_count(), 0);
        assert!(!sink.is_open());
        assert!(!sink.is_closed());
    }

    #[tokio::test]
    async fn test_clone_shares_recording() {
        let sink1 = opened().await;
        let sink2 = sink1.clone();

        sink1.write(&message(1)).await.unwrap();

        assert!(Arc::ptr_eq(&sink1.state, &sink2.state));
        assert_eq!(sink2.written_count(), 1);
    }

    #[tokio::test]
    async fn test_write_before_open_is_refused() {
        let sink = InMemorySink::new();
        assert_eq!(sink.write(&message(1)).await, Err(SinkError::Closed));
        assert_eq!(sink.write_attempts(), 1);
    }

    #[tokio::test]
    async fn test_records_in_write_order() {
        let sink = opened().await;
        let messages: Vec<Message> = (0..5).map(message).collect();
        for m in &messages {
            assert_eq!(sink.write(m).await.unwrap(), WriteStatus::Written);
        }

        let ids: Vec<_> = sink.written().iter().map(|m| m.id).collect();
        let expected: Vec<_> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let sink = opened().await;
        sink.pause();
        assert_eq!(sink.write(&message(1)).await.unwrap(), WriteStatus::Busy);
        assert_eq!(sink.written_count(), 0);

        sink.resume();
        assert_eq!(sink.write(&message(1)).await.unwrap(), WriteStatus::Written);
        assert_eq!(sink.written_count(), 1);
    }

    #[tokio::test]
    async fn test_grant_rations_writes() {
        let sink = opened().await;
        sink.pause();
        sink.grant(2);
        sink.grant(1);

        for n in 0..3 {
            assert_eq!(sink.write(&message(n)).await.unwrap(), WriteStatus::Written);
        }
        assert_eq!(sink.write(&message(3)).await.unwrap(), WriteStatus::Busy);
        assert_eq!(sink.written_count(), 3);
        assert_eq!(sink.write_attempts(), 4);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let sink = opened().await;
        sink.fail_next_write(SinkError::Unavailable("throttled".to_string()));
        sink.fail_next_write(SinkError::Rejected("bad payload".to_string()));

        assert!(matches!(
            sink.write(&message(1)).await,
            Err(SinkError::Unavailable(_))
        ));
        assert!(matches!(
            sink.write(&message(1)).await,
            Err(SinkError::Rejected(_))
        ));
        assert_eq!(sink.write(&message(1)).await.unwrap(), WriteStatus::Written);
    }

    #[tokio::test]
    async fn test_open_failure_is_one_shot() {
        let sink = InMemorySink::new();
        sink.fail_open(SinkError::ConnectionFailed("refused".to_string()));

        assert!(sink.open().await.is_err());
        assert!(!sink.is_open());
        assert!(sink.open().await.is_ok());
        assert!(sink.is_open());
    }

    #[tokio::test]
    async fn test_close_rejects_further_writes() {
        let sink = opened().await;
        sink.close().await.unwrap();

        assert!(sink.is_closed());
        assert!(!sink.is_open());
        assert_eq!(sink.write(&message(1)).await, Err(SinkError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_delay_is_applied() {
        let sink = opened().await;
        sink.delay_writes(Duration::from_millis(250));

        let started = tokio::time::Instant::now();
        sink.write(&message(1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
