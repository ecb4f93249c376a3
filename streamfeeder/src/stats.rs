//! Counters describing what a feeder has done so far.

use serde::{Deserialize, Serialize};

use crate::state::FeederState;

#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub(crate) fed: u64,
    pub(crate) delivered: u64,
    pub(crate) rejected: u64,
    pub(crate) busy_retries: u64,
    pub(crate) transient_errors: u64,
    pub(crate) full_episodes: u64,
    pub(crate) drain_episodes: u64,
    pub(crate) discarded: u64,
}

/// Point-in-time snapshot returned by [`StreamFeeder::stats`](crate::StreamFeeder::stats).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeederStats {
    /// Current lifecycle state.
    pub state: FeederState,
    /// Messages waiting for the sink.
    pub queued: usize,
    /// Longest queue observed.
    pub peak_queued: usize,
    /// Messages accepted by `feed`.
    pub fed: u64,
    /// Messages the sink took.
    pub delivered: u64,
    /// `feed` calls rejected at the hard cap.
    pub rejected: u64,
    /// Writes answered with `Busy`.
    pub busy_retries: u64,
    /// Transient sink errors retried.
    pub transient_errors: u64,
    /// Times the full handler condition was met.
    pub full_episodes: u64,
    /// Times the drain handler condition was met.
    pub drain_episodes: u64,
    /// Messages dropped by `stop` after the flush window.
    pub discarded: u64,
}

impl FeederStats {
    pub(crate) const fn from_counters(
        state: FeederState,
        queued: usize,
        peak_queued: usize,
        counters: &Counters,
    ) -> Self {
        Self {
            state,
            queued,
            peak_queued,
            fed: counters.fed,
            delivered: counters.delivered,
            rejected: counters.rejected,
            busy_retries: counters.busy_retries,
            transient_errors: counters.transient_errors,
            full_episodes: counters.full_episodes,
            drain_episodes: counters.drain_episodes,
            discarded: counters.discarded,
        }
    }
}
