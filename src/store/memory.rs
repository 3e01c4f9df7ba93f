use crate::alarm::AlarmFlags;
use crate::reading::SensorReading;
use crate::store::{PersistedRecord, ReadingStore, RecordIter, StoreError};
use std::sync::Mutex;

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedRecord>>,
    fail_appends: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose appends always fail with an io error.
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_appends: true,
        }
    }

    /// Seed the store with pre-classified readings, assigning ids in order.
    pub fn with_readings(
        readings: impl IntoIterator<Item = (SensorReading, AlarmFlags)>,
    ) -> Result<Self, StoreError> {
        let store = Self::new();
        for (reading, alarms) in readings {
            store.append(&reading, alarms)?;
        }
        Ok(store)
    }
}

impl ReadingStore for MemoryStore {
    fn append(
        &self,
        reading: &SensorReading,
        alarms: AlarmFlags,
    ) -> Result<PersistedRecord, StoreError> {
        if self.fail_appends {
            return Err(StoreError::Io(std::io::Error::other("mock append failed")));
        }
        let mut records = self.records.lock().map_err(|_| StoreError::WriterPoisoned)?;
        let record = PersistedRecord {
            id: records.len() as u64 + 1,
            reading: reading.clone(),
            alarms,
        };
        records.push(record.clone());
        Ok(record)
    }

    fn latest(&self) -> Result<PersistedRecord, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::WriterPoisoned)?;
        records.last().cloned().ok_or(StoreError::Empty)
    }

    fn scan(&self) -> Result<RecordIter<'_>, StoreError> {
        let snapshot = self
            .records
            .lock()
            .map_err(|_| StoreError::WriterPoisoned)?
            .clone();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn len(&self) -> Result<u64, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::WriterPoisoned)?;
        Ok(records.len() as u64)
    }
}
