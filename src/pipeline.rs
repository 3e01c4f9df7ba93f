//! Shared ingestion path: validate, classify, persist, publish.
//!
//! Every listener hands raw request bytes to [`Ingestor::ingest`]; nothing
//! protocol specific happens past this point.

use crate::alarm::AlarmFlags;
use crate::broadcast::Broadcaster;
use crate::error::AppError;
use crate::reading::parse_reading;
use crate::store::{PersistedRecord, ReadingStore};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn ReadingStore>,
    broadcaster: Broadcaster,
}

impl fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingestor")
            .field("subscribers", &self.broadcaster.subscriber_count())
            .finish()
    }
}

impl Ingestor {
    pub fn new(store: Arc<dyn ReadingStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    pub fn store(&self) -> &Arc<dyn ReadingStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub async fn ingest(&self, body: &[u8]) -> Result<PersistedRecord, AppError> {
        self.ingest_at(body, OffsetDateTime::now_utc()).await
    }

    /// Ingest with an explicit fallback timestamp for messages that carry none.
    pub async fn ingest_at(
        &self,
        body: &[u8],
        now: OffsetDateTime,
    ) -> Result<PersistedRecord, AppError> {
        let reading = parse_reading(body, now).inspect_err(|err| {
            warn!(error = %err, bytes = body.len(), "Rejected sensor reading");
        })?;
        let alarms = AlarmFlags::classify(&reading);

        // The write lock is only taken on the blocking pool, never across socket I/O.
        let store = Arc::clone(&self.store);
        let record = tokio::task::spawn_blocking(move || store.append(&reading, alarms))
            .await
            .map_err(AppError::from)
            .and_then(|appended| appended.map_err(AppError::from))
            .inspect_err(|err| {
                error!(error = %err, "Failed to persist sensor reading");
            })?;

        info!(
            id = record.id,
            alarms = ?record.alarms.raised(),
            "Sensor reading stored"
        );

        self.broadcaster.publish(&record);
        Ok(record)
    }
}
