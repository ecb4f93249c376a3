//! The stream feeder: a bounded queue between a fast producer and a
//! rate-limited sink.
//!
//! Producers call [`StreamFeeder::feed`], which never waits on the sink. A
//! single delivery task per feeder drains the queue in FIFO order. Queue
//! length is tracked by a [`BackpressureGauge`]; its edges become the full
//! and drain notifications.
//!
//! # Locking
//!
//! All mutable state lives behind one `parking_lot::Mutex`. The lock is
//! never held across an `.await` or while a user callback runs.

use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::FeederConfig;
use crate::errors::{FeederError, FeederResult, SinkError};
use crate::handlers::{guarded, ErrorCallback, HandlerKind, HandlerSlots, Notification};
use crate::retry::Backoff;
use crate::sink::{Sink, WriteStatus};
use crate::start::StartHandle;
use crate::state::FeederState;
use crate::stats::{Counters, FeederStats};
use crate::types::{Message, MessageId, Tag};
use crate::watermark::{BackpressureGauge, Transition};

/// What `stop` managed to do with the messages still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    /// Messages delivered between the stop request and the end of the flush window.
    pub flushed: u64,
    /// Messages still queued when the flush window closed; they were dropped.
    pub discarded: usize,
    /// True if the flush window expired before the queue emptied.
    pub timed_out: bool,
}

/// Backpressure-aware producer-side adapter over a [`Sink`].
///
/// `StreamFeeder` is a cheap, cloneable handle; clones share one queue and
/// one delivery task.
///
/// # Example
///
/// ```rust,ignore
/// let feeder = StreamFeeder::new(sink, FeederConfig::new(5, 2, 8)?);
///
/// feeder.start_with(|result, feeder| {
///     if result.is_err() {
///         return;
///     }
///     feeder.full_handler(|| warn!("slow down"));
///     feeder.drain_handler(|| info!("resume"));
///
///     if !feeder.queue_full() {
///         let tag = Tag::try_new("test").ok();
///         let _ = feeder.feed(json!({"body": "Hello world!"}), tag);
///     }
/// })?;
/// ```
pub struct StreamFeeder<S: Sink> {
    inner: Arc<Inner<S>>,
}

impl<S: Sink> Clone for StreamFeeder<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Sink> fmt::Debug for StreamFeeder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("StreamFeeder")
            .field("state", &shared.state)
            .field("queued", &shared.queue.len())
            .field("closing", &shared.closing)
            .field("handlers", &shared.handlers)
            .finish_non_exhaustive()
    }
}

struct Inner<S> {
    sink: S,
    config: FeederConfig,
    shared: Mutex<Shared>,
    wake: Arc<Notify>,
}

struct Shared {
    state: FeederState,
    queue: VecDeque<Message>,
    gauge: BackpressureGauge,
    handlers: HandlerSlots,
    closing: bool,
    failure: Option<FeederError>,
    counters: Counters,
    delivery: Option<JoinHandle<()>>,
    runtime: Option<Handle>,
}

impl Shared {
    // Aligns Ready/Full/Draining with the gauge; leaves other states alone.
    fn sync_phase(&mut self) -> FeederResult<()> {
        let next = self.gauge.phase();
        if self.state.accepts_feeds() && next != self.state {
            debug!(from = %self.state, to = %next, "feeder phase change");
            self.state = self.state.transition_to(next)?;
        }
        Ok(())
    }
}

impl<S: Sink> StreamFeeder<S> {
    /// Creates a feeder in the `Created` state.
    pub fn new(sink: S, config: FeederConfig) -> Self {
        let gauge = BackpressureGauge::new(config.watermarks());
        Self {
            inner: Arc::new(Inner {
                sink,
                config,
                shared: Mutex::new(Shared {
                    state: FeederState::Created,
                    queue: VecDeque::new(),
                    gauge,
                    handlers: HandlerSlots::default(),
                    closing: false,
                    failure: None,
                    counters: Counters::default(),
                    delivery: None,
                    runtime: None,
                }),
                wake: Arc::new(Notify::new()),
            }),
        }
    }

    /// Creates a feeder with [`FeederConfig::default`].
    pub fn with_defaults(sink: S) -> Self {
        Self::new(sink, FeederConfig::default())
    }

    /// Opens the sink in the background.
    ///
    /// Returns immediately. The returned handle resolves once the sink is
    /// open (`Ready`) or opening failed (`Failed`). A second call fails with
    /// `InvalidState`; calling outside a tokio runtime fails with `NoRuntime`.
    pub fn start(&self) -> FeederResult<StartHandle> {
        let runtime = Handle::try_current().map_err(|_| FeederError::NoRuntime)?;
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != FeederState::Created {
                return Err(FeederError::invalid_state("start", shared.state));
            }
            shared.state = shared.state.transition_to(FeederState::Starting)?;
            shared.runtime = Some(runtime.clone());
        }
        info!(
            open_timeout = ?self.inner.config.open_timeout(),
            "starting stream feeder"
        );

        let (cancel, cancelled) = oneshot::channel();
        let task = runtime.spawn(open_sink(Arc::clone(&self.inner), cancelled));
        Ok(StartHandle::new(task, cancel))
    }

    /// Opens the sink in the background and reports through a callback.
    ///
    /// `on_complete` runs exactly once with the start result and a handle to
    /// this feeder. If the start is refused synchronously (already started,
    /// no runtime) the error is returned and `on_complete` is not called.
    pub fn start_with<F>(&self, on_complete: F) -> FeederResult<()>
    where
        F: FnOnce(FeederResult<()>, Self) + Send + 'static,
    {
        let handle = self.start()?;
        let feeder = self.clone();
        tokio::spawn(async move {
            let result = handle.await;
            let target = feeder.clone();
            if let Err(error) = guarded(HandlerKind::StartCompletion, move || {
                on_complete(result, target);
            }) {
                feeder.inner.fail(error, true);
            }
        });
        Ok(())
    }

    /// Queues a message for delivery.
    ///
    /// Never waits on the sink. Fails with `InvalidState` outside
    /// `Ready`/`Full`/`Draining`, with `Stopping` once `stop` was called, and
    /// with `Backpressure` when the queue already holds `hard_cap` messages.
    /// Reaching the high-water mark is not an error: the message is queued,
    /// the feeder becomes `Full` and the full handler runs on this thread.
    pub fn feed(&self, payload: Value, tag: Option<Tag>) -> FeederResult<MessageId> {
        let hard_cap = self.inner.config.hard_cap();
        let (id, full_handler) = {
            let mut shared = self.inner.shared.lock();
            if !shared.state.accepts_feeds() {
                return Err(FeederError::invalid_state("feed", shared.state));
            }
            if shared.closing {
                return Err(FeederError::Stopping { operation: "feed" });
            }

            let queued = shared.queue.len();
            if queued >= hard_cap {
                shared.counters.rejected += 1;
                warn!(queued, hard_cap, "rejecting message at hard cap");
                return Err(FeederError::Backpressure { queued, hard_cap });
            }

            let message = Message::new(payload, tag);
            let id = message.id;
            shared.queue.push_back(message);
            shared.counters.fed += 1;
            let transition = shared.gauge.on_enqueue();
            debug_assert_eq!(shared.gauge.len(), shared.queue.len());
            shared.sync_phase()?;
            debug!(message_id = %id, queued = queued + 1, "message queued");

            let handler = if transition == Some(Transition::Full) {
                shared.counters.full_episodes += 1;
                info!(
                    queued = queued + 1,
                    high_water_mark = self.inner.config.high_water_mark(),
                    "queue reached high-water mark"
                );
                shared.handlers.full.clone()
            } else {
                None
            };
            (id, handler)
        };

        self.inner.wake.notify_one();

        if let Some(handler) = full_handler {
            if let Err(error) = guarded(HandlerKind::Full, || handler()) {
                self.inner.fail(error, true);
            }
        }
        Ok(id)
    }

    /// True iff the feeder is `Full`, i.e. the queue is at or above the high-water mark.
    pub fn queue_full(&self) -> bool {
        self.inner.shared.lock().state == FeederState::Full
    }

    /// Sets the callback run when the queue reaches the high-water mark.
    ///
    /// Runs on the thread of the `feed` call that crossed the mark. The drain
    /// handler runs on the delivery task instead, so on a multi-threaded
    /// runtime the drain notification for one episode may arrive after the
    /// full notification of the next, or the other way round. Producers should
    /// gate on [`queue_full`](Self::queue_full) rather than on the order in
    /// which notifications arrive.
    ///
    /// Replaces any previous full handler.
    pub fn full_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let handler: Notification = Arc::new(handler);
        self.inner.shared.lock().handlers.full = Some(handler);
        self
    }

    /// Sets the callback run when a full queue drains below the low-water mark.
    ///
    /// Runs on the delivery task after the queue lock is released; see
    /// [`full_handler`](Self::full_handler) for how the two may interleave.
    ///
    /// Replaces any previous drain handler.
    pub fn drain_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let handler: Notification = Arc::new(handler);
        self.inner.shared.lock().handlers.drain = Some(handler);
        self
    }

    /// Sets the callback receiving transient sink errors and the error that
    /// failed the feeder.
    ///
    /// Replaces any previous error handler.
    pub fn error_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(&FeederError) + Send + Sync + 'static,
    {
        let handler: ErrorCallback = Arc::new(handler);
        self.inner.shared.lock().handlers.error = Some(handler);
        self
    }

    /// Stops accepting messages, flushes what it can, and closes the sink.
    ///
    /// The delivery task keeps draining for at most the configured flush
    /// timeout. After that the in-flight write is cancelled and whatever is
    /// still queued is discarded and counted in the report.
    pub async fn stop(&self) -> FeederResult<StopReport> {
        let (delivery, delivered_before, queued) = {
            let mut shared = self.inner.shared.lock();
            if !shared.state.accepts_feeds() {
                return Err(FeederError::invalid_state("stop", shared.state));
            }
            if shared.closing {
                return Err(FeederError::Stopping { operation: "stop" });
            }
            shared.closing = true;
            (
                shared.delivery.take(),
                shared.counters.delivered,
                shared.queue.len(),
            )
        };
        info!(queued, "stopping stream feeder");
        self.inner.wake.notify_one();

        let mut timed_out = false;
        if let Some(mut task) = delivery {
            let flush_timeout = self.inner.config.flush_timeout();
            if tokio::time::timeout(flush_timeout, &mut task).await.is_err() {
                timed_out = true;
                task.abort();
                // Cancelled by the abort above; nothing else to learn from the join
                let _ = task.await;
            }
        }

        let (report, failure) = {
            let mut shared = self.inner.shared.lock();
            let discarded = shared.queue.len();
            shared.queue.clear();
            shared.gauge.reset();
            shared.counters.discarded += u64::try_from(discarded).unwrap_or(u64::MAX);
            let report = StopReport {
                flushed: shared.counters.delivered - delivered_before,
                discarded,
                timed_out,
            };
            if shared.state == FeederState::Failed {
                (report, shared.failure.clone())
            } else {
                shared.state = shared.state.transition_to(FeederState::Stopped)?;
                (report, None)
            }
        };

        if let Some(error) = failure {
            warn!(
                error = %error,
                discarded = report.discarded,
                "feeder failed while flushing"
            );
            return Err(error);
        }
        if report.discarded > 0 {
            warn!(
                discarded = report.discarded,
                timed_out, "discarded undelivered messages on stop"
            );
        }

        self.inner.sink.close().await.map_err(|err| {
            error!(error = %err, "sink close failed");
            FeederError::Sink(err)
        })?;

        info!(
            flushed = report.flushed,
            discarded = report.discarded,
            "stream feeder stopped"
        );
        Ok(report)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FeederState {
        self.inner.shared.lock().state
    }

    /// Messages waiting for the sink.
    pub fn len(&self) -> usize {
        self.inner.shared.lock().queue.len()
    }

    /// True when nothing is waiting for the sink.
    pub fn is_empty(&self) -> bool {
        self.inner.shared.lock().queue.is_empty()
    }

    /// The error that moved the feeder to `Failed`, if any.
    pub fn failure(&self) -> Option<FeederError> {
        self.inner.shared.lock().failure.clone()
    }

    /// Snapshot of the feeder's counters.
    pub fn stats(&self) -> FeederStats {
        let shared = self.inner.shared.lock();
        FeederStats::from_counters(
            shared.state,
            shared.queue.len(),
            shared.gauge.peak(),
            &shared.counters,
        )
    }

    /// The configuration this feeder was built with.
    pub fn config(&self) -> &FeederConfig {
        &self.inner.config
    }

    /// The underlying sink.
    pub fn sink(&self) -> &S {
        &self.inner.sink
    }
}

impl<S: Sink> Inner<S> {
    fn become_ready(self: &Arc<Self>) -> FeederResult<()> {
        let mut shared = self.shared.lock();
        shared.state = shared.state.transition_to(FeederState::Ready)?;
        let task = tokio::spawn(run_delivery(Arc::downgrade(self), Arc::clone(&self.wake)));
        shared.delivery = Some(task);
        Ok(())
    }

    /// Moves the feeder to `Failed`; a no-op once terminal.
    ///
    /// A sink that was open is closed in the background.
    fn fail(self: &Arc<Self>, error: FeederError, notify: bool) {
        let (handler, delivery, release) = {
            let mut shared = self.shared.lock();
            if shared.state.is_terminal() {
                return;
            }
            let was_open = shared.state.accepts_feeds();
            match shared.state.transition_to(FeederState::Failed) {
                Ok(next) => shared.state = next,
                Err(refused) => {
                    error!(error = %error, refused = %refused, "cannot fail feeder");
                    return;
                }
            }
            shared.failure = Some(error.clone());
            let release = if was_open { shared.runtime.clone() } else { None };
            (shared.handlers.error.clone(), shared.delivery.take(), release)
        };

        error!(error = %error, "stream feeder failed");
        if let Some(task) = delivery {
            task.abort();
        }
        if let Some(runtime) = release {
            let inner = Arc::clone(self);
            runtime.spawn(async move {
                match inner.sink.close().await {
                    Ok(()) => debug!("sink closed after failure"),
                    Err(err) => warn!(error = %err, "closing sink after failure failed"),
                }
            });
        }
        if notify {
            self.report(handler, &error);
        }
    }

    fn report(self: &Arc<Self>, handler: Option<ErrorCallback>, error: &FeederError) {
        let Some(callback) = handler else {
            warn!(error = %error, "no error handler registered");
            return;
        };
        if guarded(HandlerKind::Error, || callback(error)).is_err() {
            self.fail(
                FeederError::HandlerPanicked {
                    handler: HandlerKind::Error,
                },
                false,
            );
        }
    }

    fn report_transient(self: &Arc<Self>, error: &FeederError) {
        let handler = {
            let mut shared = self.shared.lock();
            shared.counters.transient_errors += 1;
            shared.handlers.error.clone()
        };
        warn!(error = %error, "transient sink error, retrying");
        self.report(handler, error);
    }

    fn count_busy(&self) {
        self.shared.lock().counters.busy_retries += 1;
    }

    /// Pops the delivered head and returns the drain handler if the queue drained.
    fn complete_delivery(&self, id: MessageId) -> FeederResult<Option<Notification>> {
        let mut shared = self.shared.lock();
        if shared.queue.front().map(|head| head.id) != Some(id) {
            return Err(FeederError::Internal(format!(
                "delivered message {id} is not at the head of the queue"
            )));
        }
        shared.queue.pop_front();
        shared.counters.delivered += 1;
        let transition = shared.gauge.on_dequeue();
        shared.sync_phase()?;

        if transition == Some(Transition::Drained) {
            shared.counters.drain_episodes += 1;
            info!(
                queued = shared.queue.len(),
                low_water_mark = self.config.low_water_mark(),
                "queue drained below low-water mark"
            );
            return Ok(shared.handlers.drain.clone());
        }
        Ok(None)
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        if let Some(task) = self.shared.get_mut().delivery.take() {
            task.abort();
        }
    }
}

async fn open_sink<S: Sink>(
    inner: Arc<Inner<S>>,
    mut cancelled: oneshot::Receiver<()>,
) -> FeederResult<()> {
    let timeout = inner.config.open_timeout();
    let opening = AssertUnwindSafe(inner.sink.open()).catch_unwind();

    // Set when the open was cut short and the sink may be half-open
    let mut abandoned = false;
    let opened = tokio::select! {
        outcome = tokio::time::timeout(timeout, opening) => match outcome {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(FeederError::Sink(err)),
            Ok(Err(_)) => {
                abandoned = true;
                Err(FeederError::Sink(SinkError::Internal(
                    "sink panicked while opening".to_string(),
                )))
            }
            Err(_) => {
                abandoned = true;
                Err(FeederError::Sink(SinkError::Timeout(timeout)))
            }
        },
        // A dropped handle is not a cancellation
        Ok(()) = &mut cancelled => {
            abandoned = true;
            Err(FeederError::Cancelled)
        }
    };

    if abandoned {
        if let Err(err) = inner.sink.close().await {
            warn!(error = %err, "closing sink after abandoned open failed");
        }
    }

    let result = opened.and_then(|()| inner.become_ready());
    match &result {
        Ok(()) => info!(
            high_water_mark = inner.config.high_water_mark(),
            low_water_mark = inner.config.low_water_mark(),
            hard_cap = inner.config.hard_cap(),
            "stream feeder ready"
        ),
        Err(error) => inner.fail(error.clone(), false),
    }
    result
}

async fn run_delivery<S: Sink>(inner: Weak<Inner<S>>, wake: Arc<Notify>) {
    let Some(mut backoff) = inner
        .upgrade()
        .map(|feeder| Backoff::new(feeder.config.retry_delay(), feeder.config.max_retry_delay()))
    else {
        return;
    };

    loop {
        let Some(feeder) = inner.upgrade() else {
            break;
        };

        let next = {
            let shared = feeder.shared.lock();
            if !shared.state.accepts_feeds() {
                break;
            }
            match shared.queue.front() {
                Some(message) => Some(message.clone()),
                None if shared.closing => break,
                None => None,
            }
        };

        let Some(message) = next else {
            drop(feeder);
            wake.notified().await;
            continue;
        };

        let written = AssertUnwindSafe(feeder.sink.write(&message))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(SinkError::Internal("sink panicked while writing".to_string()))
            });

        match written {
            Ok(WriteStatus::Written) => {
                backoff.reset();
                debug!(message_id = %message.id, "message delivered");
                match feeder.complete_delivery(message.id) {
                    Ok(Some(handler)) => {
                        if let Err(error) = guarded(HandlerKind::Drain, || handler()) {
                            feeder.fail(error, true);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        feeder.fail(error, true);
                        break;
                    }
                }
            }
            Ok(WriteStatus::Busy) => {
                feeder.count_busy();
                let delay = backoff.next_delay();
                debug!(?delay, attempt = backoff.attempts(), "sink busy, backing off");
                drop(feeder);
                tokio::time::sleep(delay).await;
            }
            Err(err) if err.is_transient() => {
                feeder.report_transient(&FeederError::Sink(err));
                let delay = backoff.next_delay();
                drop(feeder);
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                feeder.fail(FeederError::Sink(err), true);
                break;
            }
        }
    }
    debug!("delivery task finished");
}
