//! Shared fixtures for the feeder integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streamfeeder::config::{FlushTimeoutMs, RetryDelayMs};
use streamfeeder::{FeederConfig, StreamFeeder};
use streamfeeder_memory::InMemorySink;

/// Watermark config with short retry delays so rationed sinks are polled often.
pub fn fast_config(high: usize, low: usize, hard_cap: usize) -> FeederConfig {
    FeederConfig::new(high, low, hard_cap)
        .and_then(|config| {
            config.with_retry_delays(
                RetryDelayMs::try_new(1).expect("valid retry delay"),
                RetryDelayMs::try_new(20).expect("valid retry delay"),
            )
        })
        .expect("valid test config")
}

/// Same as [`fast_config`] with a custom flush window.
pub fn with_flush(config: FeederConfig, flush_ms: u64) -> FeederConfig {
    config.with_flush_timeout(FlushTimeoutMs::try_new(flush_ms).expect("valid flush timeout"))
}

/// Starts a feeder over a clone of `sink` and waits until it is ready.
pub async fn started(sink: &InMemorySink, config: FeederConfig) -> StreamFeeder<InMemorySink> {
    let feeder = StreamFeeder::new(sink.clone(), config);
    feeder
        .start()
        .expect("start accepted")
        .await
        .expect("sink opened");
    feeder
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

/// Counts handler invocations.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
