use crate::alarm::AlarmFlags;
use crate::reading::SensorReading;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

pub type RecordId = u64;

/// Lazy ascending-id scan over committed records.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<PersistedRecord, StoreError>> + Send + 'a>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub reading: SensorReading,
    pub alarms: AlarmFlags,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("no data available")]
    Empty,
    #[error("store writer lock poisoned")]
    WriterPoisoned,
    #[error("store writer disabled after a failed rollback")]
    WriterFailed,
}

/// Append-only repository of classified readings.
///
/// Implementations serialize appends so that ids are assigned gap-free and in
/// commit order. Reads must not wait on an in-flight append for longer than
/// it takes to observe the committed state.
pub trait ReadingStore: Send + Sync {
    fn append(&self, reading: &SensorReading, alarms: AlarmFlags)
    -> Result<PersistedRecord, StoreError>;

    /// Highest-id record, or [`StoreError::Empty`].
    fn latest(&self) -> Result<PersistedRecord, StoreError>;

    /// Every committed record in ascending id order.
    fn scan(&self) -> Result<RecordIter<'_>, StoreError>;

    fn len(&self) -> Result<u64, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}
