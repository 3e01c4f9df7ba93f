//! Fan-out of accepted readings to live subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full queue
//! drops the event for that subscriber only, and a closed queue unregisters it.

use crate::store::PersistedRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

pub const SENSOR_DATA_EVENT: &str = "sensor_data";
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

pub type SubscriberId = u64;

/// Payload of a `sensor_data` event. Alarm flags are not included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorEvent {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub light: f64,
    pub tvoc: f64,
    pub smoke: f64,
}

impl From<&PersistedRecord> for SensorEvent {
    fn from(record: &PersistedRecord) -> Self {
        let reading = &record.reading;
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            pressure: reading.pressure,
            light: reading.light,
            tvoc: reading.tvoc,
            smoke: reading.smoke,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("subscriber {subscriber} is lagging, event dropped")]
    Lagging { subscriber: SubscriberId },
    #[error("subscriber {subscriber} disconnected")]
    Closed { subscriber: SubscriberId },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failures: Vec<BroadcastError>,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<SensorEvent>>>,
    next_id: AtomicU64,
    buffer: usize,
}

#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<SensorEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<SensorEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SensorEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<SensorEvent> {
        ReceiverStream::new(self.receiver)
    }
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.buffer);
        let mut subscribers = self.subscribers();
        subscribers.insert(id, sender);
        debug!(subscriber = id, total = subscribers.len(), "Subscriber registered");
        Subscription { id, receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Deliver `record` to every registered subscriber without blocking.
    pub fn publish(&self, record: &PersistedRecord) -> PublishReport {
        let event = SensorEvent::from(record);
        let mut report = PublishReport::default();
        let mut subscribers = self.subscribers();

        subscribers.retain(|&subscriber, sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber, id = record.id, "Subscriber queue full, dropping event");
                report.failures.push(BroadcastError::Lagging { subscriber });
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber, "Subscriber disconnected, unregistering");
                report.failures.push(BroadcastError::Closed { subscriber });
                false
            }
        });

        debug!(
            id = record.id,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Published sensor_data"
        );
        report
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<SensorEvent>>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}
