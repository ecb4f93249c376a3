//! Watermark hysteresis for the pending queue.
//!
//! Two thresholds keep the full/drain signals from flapping when the queue
//! length hovers around a single boundary:
//!
//! - crossing from `< H` to `>= H` opens a *backpressure episode* and yields
//!   [`Transition::Full`]
//! - crossing from `>= L` to `< L` while an episode is open closes it and
//!   yields [`Transition::Drained`]
//!
//! Re-reaching `H` inside an open episode yields nothing; the producer was
//! already told to slow down.

use crate::errors::ConfigError;
use crate::state::FeederState;

/// A validated `(high, low)` watermark pair with `1 <= low < high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    high: usize,
    low: usize,
}

impl Watermarks {
    /// Creates a watermark pair.
    pub fn new(high: usize, low: usize) -> Result<Self, ConfigError> {
        if low == 0 || low >= high {
            return Err(ConfigError::WatermarksInverted { low, high });
        }
        Ok(Self { high, low })
    }

    // Caller guarantees 1 <= low < high.
    pub(crate) const fn from_validated(high: usize, low: usize) -> Self {
        Self { high, low }
    }

    /// The high-water mark H.
    pub const fn high(self) -> usize {
        self.high
    }

    /// The low-water mark L.
    pub const fn low(self) -> usize {
        self.low
    }
}

/// An edge reported by the gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The queue reached the high-water mark; a backpressure episode began.
    Full,
    /// The queue fell below the low-water mark; the episode ended.
    Drained,
}

/// Tracks queue length against a [`Watermarks`] pair.
#[derive(Debug, Clone)]
pub struct BackpressureGauge {
    marks: Watermarks,
    len: usize,
    peak: usize,
    episode: bool,
}

impl BackpressureGauge {
    /// Creates an empty gauge.
    pub const fn new(marks: Watermarks) -> Self {
        Self {
            marks,
            len: 0,
            peak: 0,
            episode: false,
        }
    }

    /// Records one enqueued message.
    pub fn on_enqueue(&mut self) -> Option<Transition> {
        let before = self.len;
        self.len += 1;
        self.peak = self.peak.max(self.len);

        if before < self.marks.high && self.len >= self.marks.high && !self.episode {
            self.episode = true;
            return Some(Transition::Full);
        }
        None
    }

    /// Records one message handed to the sink.
    pub fn on_dequeue(&mut self) -> Option<Transition> {
        if self.len == 0 {
            return None;
        }
        let before = self.len;
        self.len -= 1;

        if self.episode && before >= self.marks.low && self.len < self.marks.low {
            self.episode = false;
            return Some(Transition::Drained);
        }
        None
    }

    /// Empties the gauge and closes any open episode.
    pub fn reset(&mut self) {
        self.len = 0;
        self.episode = false;
    }

    /// Current queue length.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is queued.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Longest queue observed.
    pub const fn peak(&self) -> usize {
        self.peak
    }

    /// True iff the queue is at or above the high-water mark.
    pub const fn is_full(&self) -> bool {
        self.len >= self.marks.high
    }

    /// True while a backpressure episode is open.
    pub const fn in_episode(&self) -> bool {
        self.episode
    }

    /// The running state implied by the current length and episode.
    pub const fn phase(&self) -> FeederState {
        if self.is_full() {
            FeederState::Full
        } else if self.episode {
            FeederState::Draining
        } else {
            FeederState::Ready
        }
    }

    /// The watermarks this gauge enforces.
    pub const fn marks(&self) -> Watermarks {
        self.marks
    }
}
