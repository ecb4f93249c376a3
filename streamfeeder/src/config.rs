//! Feeder configuration with type-safe validation.
//!
//! Each tunable is a `nutype` newtype validated at construction time, and
//! [`FeederConfig`] adds the cross-field rules (`low < high <= hard_cap`).
//! A configuration that exists is a configuration that is valid, whether it
//! was built in code or deserialized from JSON.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::watermark::Watermarks;

/// Queue length at which backpressure begins.
#[nutype(
    validate(greater_or_equal = 2, less_or_equal = 10_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct HighWaterMark(usize);

/// Queue length below which backpressure is lifted.
///
/// At least 1: with a low-water mark of 0 the queue could never fall below it.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct LowWaterMark(usize);

/// Absolute bound on the pending queue; feeds beyond it are rejected.
#[nutype(
    validate(greater_or_equal = 2, less_or_equal = 10_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct HardCap(usize);

/// How long `start` may wait for the sink to open, in milliseconds.
#[nutype(
    validate(greater_or_equal = 10, less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct OpenTimeoutMs(u64);

impl OpenTimeoutMs {
    /// Convert to Duration for use with `tokio::time::timeout`.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// How long `stop` lets the queue flush before discarding the rest, in milliseconds.
///
/// Zero discards immediately.
#[nutype(
    validate(less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct FlushTimeoutMs(u64);

impl FlushTimeoutMs {
    /// Convert to Duration for use with `tokio::time::timeout`.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Delay before re-offering a message the sink refused, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryDelayMs(u64);

impl RetryDelayMs {
    /// Convert to Duration for use with `tokio::time::sleep`.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Complete feeder configuration.
///
/// # Overflow policy
///
/// At or above `high_water_mark` the feeder is `Full` and fires its full
/// handler, but still queues messages until `hard_cap` of them are pending.
/// From then on `feed` returns `FeederError::Backpressure` without queueing.
/// Setting `hard_cap == high_water_mark` rejects as soon as the queue is full.
///
/// # Example
///
/// ```rust,ignore
/// let config = FeederConfig::new(5, 2, 8)?
///     .with_flush_timeout(FlushTimeoutMs::try_new(1_000)?);
/// let feeder = StreamFeeder::new(sink, config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FeederConfigRepr")]
pub struct FeederConfig {
    high_water_mark: HighWaterMark,
    low_water_mark: LowWaterMark,
    hard_cap: HardCap,
    open_timeout: OpenTimeoutMs,
    flush_timeout: FlushTimeoutMs,
    retry_delay: RetryDelayMs,
    max_retry_delay: RetryDelayMs,
}

// Unvalidated mirror used as the deserialization target.
#[derive(Deserialize)]
struct FeederConfigRepr {
    high_water_mark: HighWaterMark,
    low_water_mark: LowWaterMark,
    hard_cap: HardCap,
    open_timeout: OpenTimeoutMs,
    flush_timeout: FlushTimeoutMs,
    retry_delay: RetryDelayMs,
    max_retry_delay: RetryDelayMs,
}

impl TryFrom<FeederConfigRepr> for FeederConfig {
    type Error = ConfigError;

    fn try_from(repr: FeederConfigRepr) -> Result<Self, Self::Error> {
        let config = Self {
            high_water_mark: repr.high_water_mark,
            low_water_mark: repr.low_water_mark,
            hard_cap: repr.hard_cap,
            open_timeout: repr.open_timeout,
            flush_timeout: repr.flush_timeout,
            retry_delay: repr.retry_delay,
            max_retry_delay: repr.max_retry_delay,
        };
        config.validate()?;
        Ok(config)
    }
}

impl FeederConfig {
    /// Creates a configuration with the given queue bounds and default timings.
    pub fn new(
        high_water_mark: usize,
        low_water_mark: usize,
        hard_cap: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            high_water_mark: HighWaterMark::try_new(high_water_mark)
                .map_err(|e| ConfigError::invalid("high_water_mark", e))?,
            low_water_mark: LowWaterMark::try_new(low_water_mark)
                .map_err(|e| ConfigError::invalid("low_water_mark", e))?,
            hard_cap: HardCap::try_new(hard_cap)
                .map_err(|e| ConfigError::invalid("hard_cap", e))?,
            open_timeout: OpenTimeoutMs::try_new(30_000)
                .map_err(|e| ConfigError::invalid("open_timeout", e))?,
            flush_timeout: FlushTimeoutMs::try_new(5_000)
                .map_err(|e| ConfigError::invalid("flush_timeout", e))?,
            retry_delay: RetryDelayMs::try_new(10)
                .map_err(|e| ConfigError::invalid("retry_delay", e))?,
            max_retry_delay: RetryDelayMs::try_new(1_000)
                .map_err(|e| ConfigError::invalid("max_retry_delay", e))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Small queue and short retry delays, for producers that should feel backpressure early.
    pub fn low_latency() -> Result<Self, ConfigError> {
        Self::new(64, 16, 128)?.with_retry_delays(
            RetryDelayMs::try_new(1).map_err(|e| ConfigError::invalid("retry_delay", e))?,
            RetryDelayMs::try_new(50).map_err(|e| ConfigError::invalid("max_retry_delay", e))?,
        )
    }

    /// Large queue for bursty producers feeding a fast sink.
    pub fn high_throughput() -> Result<Self, ConfigError> {
        Self::new(10_000, 5_000, 20_000)
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    /// Checks the cross-field rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let high = self.high_water_mark();
        let low = self.low_water_mark();
        let hard_cap = self.hard_cap();

        if low >= high {
            return Err(ConfigError::WatermarksInverted { low, high });
        }
        if hard_cap < high {
            return Err(ConfigError::HardCapBelowHighWater { hard_cap, high });
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(ConfigError::invalid(
                "max_retry_delay",
                "must not be shorter than retry_delay",
            ));
        }
        Ok(())
    }

    /// Set the open timeout.
    #[must_use]
    pub const fn with_open_timeout(mut self, timeout: OpenTimeoutMs) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the flush timeout used by `stop`.
    #[must_use]
    pub const fn with_flush_timeout(mut self, timeout: FlushTimeoutMs) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Set the initial and maximum retry delays.
    pub fn with_retry_delays(
        mut self,
        initial: RetryDelayMs,
        max: RetryDelayMs,
    ) -> Result<Self, ConfigError> {
        self.retry_delay = initial;
        self.max_retry_delay = max;
        self.validate()?;
        Ok(self)
    }

    /// The high-water mark H.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark.into_inner()
    }

    /// The low-water mark L.
    pub fn low_water_mark(&self) -> usize {
        self.low_water_mark.into_inner()
    }

    /// The hard cap.
    pub fn hard_cap(&self) -> usize {
        self.hard_cap.into_inner()
    }

    /// The open timeout.
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout.as_duration()
    }

    /// The flush timeout.
    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout.as_duration()
    }

    /// The first retry delay.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay.as_duration()
    }

    /// The ceiling for retry delays.
    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay.as_duration()
    }

    /// The watermark pair, for building a gauge.
    pub fn watermarks(&self) -> Watermarks {
        Watermarks::from_validated(self.high_water_mark(), self.low_water_mark())
    }
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self::new(1_000, 500, 2_000).expect("Default feeder configuration should always be valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newtype_validation() {
        assert!(HighWaterMark::try_new(5).is_ok());
        assert!(LowWaterMark::try_new(1).is_ok());
        assert!(HardCap::try_new(10).is_ok());

        assert!(HighWaterMark::try_new(1).is_err()); // Leaves no room for L
        assert!(LowWaterMark::try_new(0).is_err()); // Drain could never fire
        assert!(HardCap::try_new(20_000_000).is_err()); // Too large
        assert!(OpenTimeoutMs::try_new(5).is_err()); // Too short
        assert!(RetryDelayMs::try_new(0).is_err()); // Would spin
        assert!(FlushTimeoutMs::try_new(0).is_ok());
    }

    #[test]
    fn test_watermarks_must_be_ordered() {
        assert_eq!(
            FeederConfig::new(5, 5, 10).unwrap_err(),
            ConfigError::WatermarksInverted { low: 5, high: 5 }
        );
        assert_eq!(
            FeederConfig::new(5, 2, 4).unwrap_err(),
            ConfigError::HardCapBelowHighWater { hard_cap: 4, high: 5 }
        );
        assert!(FeederConfig::new(5, 4, 5).is_ok());
    }

    #[test]
    fn test_field_errors_name_the_field() {
        let err = FeederConfig::new(5, 0, 10).unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "low_water_mark"),
            other => panic!("Expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_presets_are_valid() {
        let default = FeederConfig::default();
        let low_latency = FeederConfig::low_latency().unwrap();
        let high_throughput = FeederConfig::high_throughput().unwrap();

        assert!(low_latency.high_water_mark() < default.high_water_mark());
        assert!(high_throughput.high_water_mark() > default.high_water_mark());
        assert!(low_latency.max_retry_delay() < default.max_retry_delay());
    }

    #[test]
    fn test_retry_delays_must_be_ordered() {
        let result = FeederConfig::default().with_retry_delays(
            RetryDelayMs::try_new(500).unwrap(),
            RetryDelayMs::try_new(100).unwrap(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_json_roundtrip_keeps_values() {
        let config = FeederConfig::new(5, 2, 8)
            .unwrap()
            .with_flush_timeout(FlushTimeoutMs::try_new(250).unwrap());

        let json = serde_json::to_string(&config).unwrap();
        let back = FeederConfig::from_json(&json).unwrap();

        assert_eq!(back, config);
        assert_eq!(back.flush_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_json_rejects_inverted_watermarks() {
        let json = r#"{
            "high_water_mark": 4,
            "low_water_mark": 8,
            "hard_cap": 16,
            "open_timeout": 1000,
            "flush_timeout": 0,
            "retry_delay": 5,
            "max_retry_delay": 50
        }"#;

        let err = FeederConfig::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(msg) if msg.contains("Low-water mark 8")));
    }

    #[test]
    fn test_json_rejects_out_of_range_values() {
        let json = r#"{
            "high_water_mark": 1,
            "low_water_mark": 1,
            "hard_cap": 16,
            "open_timeout": 1000,
            "flush_timeout": 0,
            "retry_delay": 5,
            "max_retry_delay": 50
        }"#;

        assert!(FeederConfig::from_json(json).is_err());
    }
}
