//! Throttled producer demo
//!
//! A producer emits messages in bursts while the sink only takes a few per
//! tick. The producer backs off while the feeder reports full; the full and
//! drain notifications are only logged.

use std::time::Duration;

use serde_json::json;
use streamfeeder::prelude::*;
use streamfeeder_memory::InMemorySink;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let sink = InMemorySink::new();
    sink.pause();
    let feeder = StreamFeeder::new(sink.clone(), FeederConfig::new(20, 5, 40)?);
    feeder.start()?.await?;

    feeder
        .full_handler(|| info!("feeder full, producer backing off"))
        .drain_handler(|| info!("feeder drained"))
        .error_handler(|error| warn!(%error, "sink trouble"));

    // The sink takes three messages per tick
    let ticker = {
        let sink = sink.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            loop {
                interval.tick().await;
                sink.grant(3);
            }
        })
    };

    let tag = Tag::try_new("demo")?;
    let mut sent = 0_u32;
    while sent < 200 {
        if feeder.queue_full() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            continue;
        }
        feeder.feed(json!({ "seq": sent }), Some(tag.clone()))?;
        sent += 1;
    }

    let report = feeder.stop().await?;
    ticker.abort();

    let stats = feeder.stats();
    info!(
        written = sink.written_count(),
        full_episodes = stats.full_episodes,
        drain_episodes = stats.drain_episodes,
        discarded = report.discarded,
        "demo finished"
    );
    Ok(())
}
