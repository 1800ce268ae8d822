//! Purpose: Persistent per-key storage of cache state and record sets.
//! Exports: `CacheBackend`, `CacheEntry`, `CachingState`, `MemoryStore`, `StoredRecords`, `persist_records`.
//! Role: Storage seam under the cache coordinator; `FileStore` is the on-disk backend.
//! Invariants: Record sets are replaced wholesale; an old set is deleted before a new one is written.
//! Invariants: Reads and writes materialise the full record set before acting on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};
use crate::core::model::{CacheMetadata, Record, VersionedKey};
use crate::core::source::{Buffered, Source, drain};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachingState {
    #[default]
    NotStarted,
    Started,
    Finished,
}

impl CachingState {
    pub fn as_str(self) -> &'static str {
        match self {
            CachingState::NotStarted => "not-started",
            CachingState::Started => "started",
            CachingState::Finished => "finished",
        }
    }
}

/// Persisted state record for one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub metadata: CacheMetadata,
    pub caching_state: CachingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl CacheEntry {
    pub fn started(metadata: CacheMetadata) -> Self {
        Self {
            metadata,
            caching_state: CachingState::Started,
            started_at: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
        }
    }

    /// Time since the `Started` transition, if it was recorded and parses.
    pub fn started_age(&self) -> Option<Duration> {
        let started = self.started_at.as_deref()?;
        let started = OffsetDateTime::parse(started, &Rfc3339).ok()?;
        let elapsed = OffsetDateTime::now_utc() - started;
        Duration::try_from(elapsed).ok()
    }
}

pub trait CacheBackend: Send + Sync {
    fn read_entry(&self, key: &VersionedKey) -> Result<Option<CacheEntry>, Error>;

    fn write_entry(&self, key: &VersionedKey, entry: &CacheEntry) -> Result<(), Error>;

    /// Replace the stored record set for `key`.
    fn write_records(&self, key: &VersionedKey, records: Vec<Record>) -> Result<(), Error>;

    fn read_records(&self, key: &VersionedKey) -> Result<Vec<Record>, Error>;
}

/// Drain `records` into memory, then hand the whole set to the backend.
pub fn persist_records<S>(
    backend: &dyn CacheBackend,
    key: &VersionedKey,
    records: &mut S,
) -> Result<usize, Error>
where
    S: Source<Item = Record> + ?Sized,
{
    let records = drain(records)?;
    let count = records.len();
    backend.write_records(key, records)?;
    Ok(count)
}

/// Lazy read-back of a stored record set; the backend is read on first pull.
pub struct StoredRecords {
    backend: Arc<dyn CacheBackend>,
    key: VersionedKey,
    loaded: Option<Buffered<Record>>,
}

impl StoredRecords {
    pub fn new(backend: Arc<dyn CacheBackend>, key: VersionedKey) -> Self {
        Self {
            backend,
            key,
            loaded: None,
        }
    }
}

impl Source for StoredRecords {
    type Item = Record;

    fn next_item(&mut self) -> Result<Option<Record>, Error> {
        if self.loaded.is_none() {
            let records = self.backend.read_records(&self.key)?;
            tracing::debug!(key = %self.key, records = records.len(), "read cached records");
            self.loaded = Some(Buffered::new(records));
        }
        match self.loaded.as_mut() {
            Some(records) => records.next_item(),
            None => Ok(None),
        }
    }

    fn cancel(&mut self) {
        self.loaded = Some(Buffered::new(Vec::new()));
    }
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<VersionedKey, CacheEntry>>,
    records: Mutex<HashMap<VersionedKey, Vec<Record>>>,
    record_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write_records` calls served so far.
    pub fn record_writes(&self) -> u64 {
        self.record_writes.load(Ordering::SeqCst)
    }

    pub fn stored_count(&self, key: &VersionedKey) -> Option<usize> {
        lock(&self.records).get(key).map(Vec::len)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CacheBackend for MemoryStore {
    fn read_entry(&self, key: &VersionedKey) -> Result<Option<CacheEntry>, Error> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn write_entry(&self, key: &VersionedKey, entry: &CacheEntry) -> Result<(), Error> {
        lock(&self.entries).insert(key.clone(), entry.clone());
        Ok(())
    }

    fn write_records(&self, key: &VersionedKey, records: Vec<Record>) -> Result<(), Error> {
        let mut stored = lock(&self.records);
        stored.remove(key);
        stored.insert(key.clone(), records);
        self.record_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_records(&self, key: &VersionedKey) -> Result<Vec<Record>, Error> {
        lock(&self.records).get(key).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("no stored records")
                .with_key(key)
        })
    }
}
