//! Callback slots for full, drain and error notifications.
//!
//! Each slot holds at most one handler; registering again replaces the
//! previous one. Handlers are cloned out of the slot and invoked after the
//! feeder's lock is released, so a handler may call back into the feeder.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{FeederError, FeederResult};

/// Notification callback without arguments (full and drain).
pub type Notification = Arc<dyn Fn() + Send + Sync>;

/// Callback receiving the error being reported.
pub type ErrorCallback = Arc<dyn Fn(&FeederError) + Send + Sync>;

/// Identifies which user callback is involved in a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// The full handler.
    Full,
    /// The drain handler.
    Drain,
    /// The error handler.
    Error,
    /// The completion passed to `start_with`.
    StartCompletion,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Full => "full",
            Self::Drain => "drain",
            Self::Error => "error",
            Self::StartCompletion => "start completion",
        };
        f.write_str(name)
    }
}

#[derive(Default, Clone)]
pub(crate) struct HandlerSlots {
    pub(crate) full: Option<Notification>,
    pub(crate) drain: Option<Notification>,
    pub(crate) error: Option<ErrorCallback>,
}

impl fmt::Debug for HandlerSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlots")
            .field("full", &self.full.is_some())
            .field("drain", &self.drain.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// Runs a user callback, turning a panic into `HandlerPanicked`.
pub(crate) fn guarded<F>(kind: HandlerKind, callback: F) -> FeederResult<()>
where
    F: FnOnce(),
{
    panic::catch_unwind(AssertUnwindSafe(callback))
        .map_err(|_| FeederError::HandlerPanicked { handler: kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn guarded_passes_through_normal_callbacks() {
        let calls = AtomicUsize::new(0);
        let result = guarded(HandlerKind::Full, || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guarded_catches_panics() {
        let result = guarded(HandlerKind::Drain, || panic!("handler blew up"));
        match result {
            Err(FeederError::HandlerPanicked { handler }) => {
                assert_eq!(handler, HandlerKind::Drain);
            }
            other => panic!("Expected HandlerPanicked, got {other:?}"),
        }
    }

    #[test]
    fn slots_debug_hides_closures() {
        let slots = HandlerSlots {
            full: Some(Arc::new(|| {})),
            ..HandlerSlots::default()
        };
        let rendered = format!("{slots:?}");
        assert!(rendered.contains("full: true"));
        assert!(rendered.contains("drain: false"));
    }
}
