//! JSON Lines file store.
//!
//! One [`PersistedRecord`] per line. The writer keeps the committed byte
//! length so that scans read a consistent prefix without holding the lock.

use crate::alarm::AlarmFlags;
use crate::reading::SensorReading;
use crate::store::{PersistedRecord, ReadingStore, RecordId, RecordIter, StoreError};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Take, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    writer: Mutex<Writer>,
}

#[derive(Debug)]
struct Writer {
    file: File,
    committed_len: u64,
    next_id: RecordId,
    count: u64,
    latest: Option<PersistedRecord>,
    // Set once the file may hold bytes past `committed_len`.
    failed: bool,
}

struct Recovered {
    committed_len: u64,
    count: u64,
    latest: Option<PersistedRecord>,
    torn: bool,
}

impl JsonlStore {
    /// Open or create the store file, recovering the id sequence from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let recovered = recover(&path)?;
        if recovered.torn {
            warn!(
                path = %path.display(),
                committed_len = recovered.committed_len,
                "Truncating torn trailing record"
            );
            file.set_len(recovered.committed_len)?;
        }

        let next_id = recovered.latest.as_ref().map(|r| r.id + 1).unwrap_or(1);
        info!(
            path = %path.display(),
            records = recovered.count,
            next_id,
            "Record store opened"
        );

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                committed_len: recovered.committed_len,
                next_id,
                count: recovered.count,
                latest: recovered.latest,
                failed: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Writer>, StoreError> {
        self.writer.lock().map_err(|_| StoreError::WriterPoisoned)
    }
}

impl ReadingStore for JsonlStore {
    fn append(
        &self,
        reading: &SensorReading,
        alarms: AlarmFlags,
    ) -> Result<PersistedRecord, StoreError> {
        let mut writer = self.lock()?;
        if writer.failed {
            return Err(StoreError::WriterFailed);
        }
        let record = PersistedRecord {
            id: writer.next_id,
            reading: reading.clone(),
            alarms,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        if let Err(err) = write_line(&mut writer.file, &line) {
            // Drop whatever part of the line reached the file.
            let committed_len = writer.committed_len;
            if let Err(truncate_err) = writer.file.set_len(committed_len) {
                error!(
                    error = %truncate_err,
                    committed_len,
                    "Failed to roll back partial record, refusing further appends"
                );
                writer.failed = true;
            }
            return Err(err);
        }

        writer.committed_len += line.len() as u64;
        writer.next_id += 1;
        writer.count += 1;
        writer.latest = Some(record.clone());
        debug!(id = record.id, "Record appended");
        Ok(record)
    }

    fn latest(&self) -> Result<PersistedRecord, StoreError> {
        self.lock()?.latest.clone().ok_or(StoreError::Empty)
    }

    fn scan(&self) -> Result<RecordIter<'_>, StoreError> {
        let committed_len = self.lock()?.committed_len;
        let file = File::open(&self.path)?;
        Ok(Box::new(Records {
            reader: BufReader::new(file.take(committed_len)),
            line: 0,
            buf: String::new(),
        }))
    }

    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.count)
    }
}

/// Scan a store file without opening it for writing.
///
/// Safe to call while another process appends to the same file; a trailing
/// record that is still being written is skipped. A store that was never
/// created scans as empty.
pub fn read_committed(path: impl AsRef<Path>) -> Result<RecordIter<'static>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(Box::new(std::iter::empty::<Result<PersistedRecord, StoreError>>()));
        }
        Err(err) => return Err(err.into()),
    };
    let committed_len = file.metadata()?.len();
    Ok(Box::new(Records {
        reader: BufReader::new(file.take(committed_len)),
        line: 0,
        buf: String::new(),
    }))
}

fn write_line(file: &mut File, line: &[u8]) -> Result<(), StoreError> {
    file.write_all(line)?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

struct Records {
    reader: BufReader<Take<File>>,
    line: usize,
    buf: String,
}

impl Iterator for Records {
    type Item = Result<PersistedRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line += 1;
                    // A line without its newline is still being written.
                    if !self.buf.ends_with('\n') {
                        return None;
                    }
                    let text = self.buf.trim();
                    if text.is_empty() {
                        continue;
                    }
                    return Some(decode_line(text, self.line));
                }
                Err(err) => return Some(Err(StoreError::Io(err))),
            }
        }
    }
}

fn decode_line(text: &str, line: usize) -> Result<PersistedRecord, StoreError> {
    serde_json::from_str(text).map_err(|err| StoreError::Corrupt {
        line,
        reason: err.to_string(),
    })
}

fn recover(path: &Path) -> Result<Recovered, StoreError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut recovered = Recovered {
        committed_len: 0,
        count: 0,
        latest: None,
        torn: false,
    };
    let mut buf = Vec::new();
    let mut line = 0;

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        line += 1;
        if buf.last() != Some(&b'\n') {
            recovered.torn = true;
            break;
        }

        let text = std::str::from_utf8(&buf).map_err(|err| StoreError::Corrupt {
            line,
            reason: err.to_string(),
        })?;
        let text = text.trim();
        if !text.is_empty() {
            let record = decode_line(text, line)?;
            if let Some(previous) = recovered.latest.as_ref()
                && record.id <= previous.id
            {
                return Err(StoreError::Corrupt {
                    line,
                    reason: format!("id {} does not follow {}", record.id, previous.id),
                });
            }
            recovered.count += 1;
            recovered.latest = Some(record);
        }
        recovered.committed_len += read as u64;
    }

    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};
    use time::OffsetDateTime;

    fn temp_store_path(label: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        Ok(std::env::temp_dir().join(format!("envguard-{label}-{unique}.jsonl")))
    }

    fn reading(temperature: f64) -> SensorReading {
        SensorReading {
            temperature,
            humidity: 50.0,
            pressure: 101.0,
            light: 0.0,
            tvoc: 0.05,
            smoke: 20.0,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn empty_store_reports_no_data() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("empty")?;
        let store = JsonlStore::open(&path)?;

        let latest = store.latest();
        let scanned = store.scan()?.count();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(latest, Err(StoreError::Empty)));
        assert_eq!(scanned, 0);
        Ok(())
    }

    #[test]
    fn append_assigns_ids_and_tracks_latest() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("append")?;
        let store = JsonlStore::open(&path)?;

        let first = store.append(&reading(20.0), AlarmFlags::default())?;
        let second = store.append(&reading(21.0), AlarmFlags::default())?;
        let latest = store.latest()?;
        let _ = std::fs::remove_file(&path);

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(latest, second);
        Ok(())
    }

    #[test]
    fn reopen_recovers_sequence() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("reopen")?;
        {
            let store = JsonlStore::open(&path)?;
            store.append(&reading(20.0), AlarmFlags::default())?;
            store.append(&reading(21.0), AlarmFlags::default())?;
        }

        let store = JsonlStore::open(&path)?;
        let next = store.append(&reading(22.0), AlarmFlags::default())?;
        let ids: Vec<RecordId> = store.scan()?.map(|r| r.map(|r| r.id)).collect::<Result<_, _>>()?;
        let _ = std::fs::remove_file(&path);

        assert_eq!(next.id, 3);
        assert_eq!(ids, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn torn_tail_is_truncated_on_open() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("torn")?;
        {
            let store = JsonlStore::open(&path)?;
            store.append(&reading(20.0), AlarmFlags::default())?;
        }
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(br#"{"id":2,"tempera"#)?;
        drop(file);

        let store = JsonlStore::open(&path)?;
        let next = store.append(&reading(23.0), AlarmFlags::default())?;
        let count = store.scan()?.collect::<Result<Vec<_>, _>>()?.len();
        let _ = std::fs::remove_file(&path);

        assert_eq!(next.id, 2);
        assert_eq!(count, 2);
        Ok(())
    }

    #[test]
    fn read_committed_skips_partial_tail_without_truncating() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("readonly")?;
        {
            let store = JsonlStore::open(&path)?;
            store.append(&reading(20.0), AlarmFlags::default())?;
        }
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(br#"{"id":2,"tempera"#)?;
        drop(file);
        let before = std::fs::metadata(&path)?.len();

        let records = read_committed(&path)?.collect::<Result<Vec<_>, _>>()?;
        let after = std::fs::metadata(&path)?.len();
        let _ = std::fs::remove_file(&path);

        assert_eq!(records.len(), 1);
        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn failed_writer_rejects_appends_and_keeps_reads() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("failed-writer")?;
        let store = JsonlStore::open(&path)?;
        store.append(&reading(20.0), AlarmFlags::default())?;
        store.lock()?.failed = true;
        let len_before = std::fs::metadata(&path)?.len();

        let result = store.append(&reading(21.0), AlarmFlags::default());
        let len_after = std::fs::metadata(&path)?.len();
        let latest = store.latest()?;
        let scanned = store.scan()?.count();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(StoreError::WriterFailed)));
        assert_eq!(len_before, len_after);
        assert_eq!(latest.id, 1);
        assert_eq!(scanned, 1);
        Ok(())
    }

    #[test]
    fn out_of_order_ids_are_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("order")?;
        {
            let store = JsonlStore::open(&path)?;
            store.append(&reading(20.0), AlarmFlags::default())?;
        }
        let contents = std::fs::read_to_string(&path)?;
        std::fs::write(&path, format!("{contents}{contents}"))?;

        let result = JsonlStore::open(&path);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(StoreError::Corrupt { line: 2, .. })));
        Ok(())
    }

    #[test]
    fn scan_sees_committed_prefix_only() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("prefix")?;
        let store = JsonlStore::open(&path)?;
        store.append(&reading(20.0), AlarmFlags::default())?;

        let scan = store.scan()?;
        store.append(&reading(21.0), AlarmFlags::default())?;
        let seen = scan.count();
        let _ = std::fs::remove_file(&path);

        assert_eq!(seen, 1);
        Ok(())
    }

    #[test]
    fn concurrent_appends_are_gap_free() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_store_path("concurrent")?;
        let store = Arc::new(JsonlStore::open(&path)?);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            store
                                .append(&reading(worker as f64 + i as f64), AlarmFlags::default())
                                .map(|r| r.id)
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();

        let mut ids = BTreeSet::new();
        for handle in handles {
            let assigned = handle.join().map_err(|_| "append thread panicked")??;
            ids.extend(assigned);
        }
        let scanned: Vec<RecordId> = store.scan()?.map(|r| r.map(|r| r.id)).collect::<Result<_, _>>()?;
        let _ = std::fs::remove_file(&path);

        let expected: Vec<RecordId> = (1..=200).collect();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), expected);
        assert_eq!(scanned, expected);
        Ok(())
    }
}
