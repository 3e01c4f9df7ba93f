use envguard::alarm::AlarmChannel;
use envguard::broadcast::Broadcaster;
use envguard::forecast::{ForecastConfig, Forecaster};
use envguard::pipeline::Ingestor;
use envguard::store::MemoryStore;
use std::sync::Arc;

const SAFE: &[u8] = br#"{"temperature":25.0,"humidity":50.0,"pressure":101.0,"light":10.0,"CH2O":0.05,"gas":20.0}"#;
const HOT: &[u8] = br#"{"temperature":35.0,"humidity":50.0,"pressure":101.0,"light":10.0,"CH2O":0.05,"gas":20.0}"#;

fn ingestor(buffer: usize) -> Ingestor {
    Ingestor::new(Arc::new(MemoryStore::new()), Broadcaster::new(buffer))
}

#[tokio::test]
async fn safe_reading_is_stored_and_broadcast() -> Result<(), Box<dyn std::error::Error>> {
    let ingestor = ingestor(4);
    let mut subscription = ingestor.broadcaster().subscribe();

    let record = ingestor.ingest(SAFE).await?;

    assert_eq!(record.id, 1);
    assert!(!record.alarms.any());
    assert_eq!(ingestor.store().len()?, 1);
    let event = subscription.try_recv().ok_or("no event delivered")?;
    assert_eq!(event.temperature, 25.0);
    assert_eq!(event.smoke, 20.0);
    assert!(subscription.try_recv().is_none());
    Ok(())
}

#[tokio::test]
async fn hot_reading_raises_only_temperature_alarm() -> Result<(), Box<dyn std::error::Error>> {
    let ingestor = ingestor(4);

    let record = ingestor.ingest(HOT).await?;

    assert_eq!(record.alarms.raised(), vec![AlarmChannel::Temp]);
    assert_eq!(ingestor.store().latest()?.id, record.id);
    Ok(())
}

#[tokio::test]
async fn slow_subscriber_does_not_block_others() -> Result<(), Box<dyn std::error::Error>> {
    let ingestor = ingestor(1);
    let mut slow = ingestor.broadcaster().subscribe();
    let mut fast = ingestor.broadcaster().subscribe();

    ingestor.ingest(SAFE).await?;
    let first = fast.try_recv();
    ingestor.ingest(HOT).await?;
    let second = fast.try_recv();

    assert!(first.is_some());
    assert_eq!(second.map(|event| event.temperature), Some(35.0));
    assert_eq!(ingestor.store().len()?, 2);
    // The slow queue kept the first event and dropped the second.
    assert_eq!(slow.try_recv().map(|event| event.temperature), Some(25.0));
    assert!(slow.try_recv().is_none());
    Ok(())
}

#[tokio::test]
async fn dropped_subscriber_is_unregistered() -> Result<(), Box<dyn std::error::Error>> {
    let ingestor = ingestor(4);
    let subscription = ingestor.broadcaster().subscribe();
    drop(subscription);

    ingestor.ingest(SAFE).await?;

    assert_eq!(ingestor.broadcaster().subscriber_count(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_append_is_not_broadcast() {
    let ingestor = Ingestor::new(Arc::new(MemoryStore::failing()), Broadcaster::new(4));
    let mut subscription = ingestor.broadcaster().subscribe();

    let result = ingestor.ingest(SAFE).await;

    assert!(result.is_err());
    assert!(subscription.try_recv().is_none());
}

#[tokio::test]
async fn ingested_history_feeds_the_forecaster() -> Result<(), Box<dyn std::error::Error>> {
    let ingestor = ingestor(4);
    for _ in 0..10 {
        ingestor.ingest(SAFE).await?;
    }

    let config = ForecastConfig {
        horizon: 3,
        trees: 5,
        ..ForecastConfig::default()
    };
    let forecast = Forecaster::new(config).run(ingestor.store().as_ref())?;

    assert_eq!(forecast.history_len, 10);
    let temp = forecast.channel(AlarmChannel::Temp).ok_or("missing temp channel")?;
    assert_eq!(temp.predictions, vec![false; 3]);
    assert!(forecast.channel(AlarmChannel::Light).is_none());
    Ok(())
}
