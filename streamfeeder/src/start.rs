//! Handle for an in-flight `start`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::errors::{FeederError, FeederResult};

/// Completion of [`StreamFeeder::start`](crate::StreamFeeder::start).
///
/// Awaiting the handle yields the start result exactly once. Dropping it
/// does not cancel the start; the sink keeps opening in the background.
///
/// ```rust,ignore
/// let mut handle = feeder.start()?;
/// if shutting_down {
///     handle.cancel();
/// }
/// match handle.await {
///     Ok(()) => info!("feeder ready"),
///     Err(FeederError::Cancelled) => debug!("start cancelled"),
///     Err(e) => return Err(e),
/// }
/// ```
#[derive(Debug)]
pub struct StartHandle {
    task: JoinHandle<FeederResult<()>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl StartHandle {
    pub(crate) const fn new(
        task: JoinHandle<FeederResult<()>>,
        cancel: oneshot::Sender<()>,
    ) -> Self {
        Self {
            task,
            cancel: Some(cancel),
        }
    }

    /// Asks the start to give up.
    ///
    /// Returns false if the start task has already finished or `cancel` was
    /// already called. A true return means the signal was delivered, not that
    /// the start will fail: if the sink finishes opening first, the start
    /// still resolves to `Ok`. Otherwise it resolves to
    /// [`FeederError::Cancelled`] and leaves the feeder `Failed`.
    pub fn cancel(&mut self) -> bool {
        if self.task.is_finished() {
            self.cancel = None;
            return false;
        }
        self.cancel.take().is_some_and(|signal| signal.send(()).is_ok())
    }

    /// True once the start has completed, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for StartHandle {
    type Output = FeederResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(FeederError::Cancelled),
            Err(err) => Err(FeederError::Internal(format!("start task failed: {err}"))),
        })
    }
}
