//! Purpose: Per-key not-started/started/finished state machine over a cache backend.
//! Exports: `CacheCoordinator`, `CacheOptions`, `Loaded`, `LoadOrigin`, `PersistHandle`, `mark_started`, `mark_finished`.
//! Role: Decides hit/miss for a `(version, table)` load and drives background persistence.
//! Invariants: A hit never invokes the fresh loader.
//! Invariants: `Finished` is only reachable from `Started`.
//! Invariants: Within one process at most one fresh load per key is in flight.
//! Notes: Writers in other processes are observed by re-reading state every `wait_interval`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::error::{Error, ErrorKind};
use crate::core::fanout::duplicate;
use crate::core::model::{CacheMetadata, GameData, RecordStream, VersionedKey};
use crate::core::notify::{Completion, WaitOutcome};
use crate::core::store::{CacheBackend, CacheEntry, CachingState, StoredRecords, persist_records};

pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(250);

type PersistResult = Result<usize, Error>;

#[derive(Clone, Copy, Debug)]
pub struct CacheOptions {
    /// Upper bound on one wait before the persisted state is re-read.
    pub wait_interval: Duration,
    /// Age after which a `Started` entry with no writer in this process is
    /// taken over. `None` waits indefinitely.
    pub started_timeout: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            wait_interval: DEFAULT_WAIT_INTERVAL,
            started_timeout: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadOrigin {
    /// Served from the persistent store.
    Cache,
    /// Fetched fresh; a background writer is persisting a copy.
    Fresh,
    /// Fetched fresh without persisting, because the writer for this key failed.
    Uncached,
}

impl LoadOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadOrigin::Cache => "cache",
            LoadOrigin::Fresh => "fresh",
            LoadOrigin::Uncached => "uncached",
        }
    }
}

/// Completion handle of a background writer.
#[derive(Clone)]
pub struct PersistHandle {
    key: VersionedKey,
    done: Arc<Completion<PersistResult>>,
}

impl PersistHandle {
    pub fn key(&self) -> &VersionedKey {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_complete()
    }

    /// Block until the writer finishes; returns the number of records persisted.
    pub fn wait(&self) -> Result<usize, Error> {
        self.done.wait()
    }
}

impl fmt::Debug for PersistHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistHandle")
            .field("key", &self.key)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Result of `CacheCoordinator::load`.
pub struct Loaded {
    pub metadata: CacheMetadata,
    pub records: RecordStream,
    pub origin: LoadOrigin,
    pub persist: Option<PersistHandle>,
}

impl fmt::Debug for Loaded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loaded")
            .field("metadata", &self.metadata)
            .field("origin", &self.origin)
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}

/// Record the `Started` transition together with the schema snapshot.
pub fn mark_started(
    backend: &dyn CacheBackend,
    key: &VersionedKey,
    metadata: &CacheMetadata,
) -> Result<(), Error> {
    backend.write_entry(key, &CacheEntry::started(metadata.clone()))
}

/// Record the `Finished` transition; only legal from `Started`.
pub fn mark_finished(backend: &dyn CacheBackend, key: &VersionedKey) -> Result<(), Error> {
    let entry = backend.read_entry(key)?;
    let Some(mut entry) = entry.filter(|entry| entry.caching_state != CachingState::NotStarted)
    else {
        return Err(Error::new(ErrorKind::CacheStateViolation)
            .with_message("caching not started")
            .with_key(key));
    };
    entry.caching_state = CachingState::Finished;
    backend.write_entry(key, &entry)
}

enum Decision {
    Hit(CacheEntry),
    Wait(Arc<Completion<PersistResult>>),
    Poll,
    Bypass,
    Claim(Arc<Completion<PersistResult>>),
}

pub struct CacheCoordinator {
    backend: Arc<dyn CacheBackend>,
    writers: Mutex<HashMap<VersionedKey, Arc<Completion<PersistResult>>>>,
    options: CacheOptions,
}

impl CacheCoordinator {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_options(backend, CacheOptions::default())
    }

    pub fn with_options(backend: Arc<dyn CacheBackend>, options: CacheOptions) -> Self {
        Self {
            backend,
            writers: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn state(&self, key: &VersionedKey) -> Result<CachingState, Error> {
        Ok(self
            .backend
            .read_entry(key)?
            .map(|entry| entry.caching_state)
            .unwrap_or_default())
    }

    fn writers(&self) -> MutexGuard<'_, HashMap<VersionedKey, Arc<Completion<PersistResult>>>> {
        self.writers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serve `key` from the store, or run `fresh` and persist a copy in the background.
    pub fn load<F>(&self, key: &VersionedKey, fresh: F) -> Result<Loaded, Error>
    where
        F: FnOnce() -> Result<GameData, Error>,
    {
        let claim = loop {
            match self.decide(key)? {
                Decision::Hit(entry) => {
                    tracing::debug!(key = %key, "cache hit");
                    return Ok(Loaded {
                        metadata: entry.metadata,
                        records: Box::new(StoredRecords::new(Arc::clone(&self.backend), key.clone())),
                        origin: LoadOrigin::Cache,
                        persist: None,
                    });
                }
                Decision::Wait(writer) => {
                    tracing::debug!(key = %key, "waiting for in-process writer");
                    if let WaitOutcome::Completed(Err(err)) =
                        writer.wait_timeout(self.options.wait_interval)
                    {
                        tracing::debug!(key = %key, error = %err, "in-process writer failed");
                    }
                }
                Decision::Poll => {
                    tracing::debug!(key = %key, "cache population in progress elsewhere");
                    std::thread::sleep(self.options.wait_interval);
                }
                Decision::Bypass => {
                    tracing::warn!(key = %key, "previous cache write failed; loading without cache");
                    let data = fresh()?;
                    return Ok(Loaded {
                        metadata: data.metadata,
                        records: data.records,
                        origin: LoadOrigin::Uncached,
                        persist: None,
                    });
                }
                Decision::Claim(claim) => break claim,
            }
        };
        self.populate(key, claim, fresh)
    }

    fn decide(&self, key: &VersionedKey) -> Result<Decision, Error> {
        let mut writers = self.writers();
        let previous = writers.get(key).cloned();
        if let Some(writer) = &previous {
            if !writer.is_complete() {
                return Ok(Decision::Wait(Arc::clone(writer)));
            }
            // Failed writers stay registered so later loads bypass the cache.
            if writer.peek().is_some_and(|result| result.is_ok()) {
                writers.remove(key);
            }
        }

        let entry = self.backend.read_entry(key)?;
        let state = entry
            .as_ref()
            .map(|entry| entry.caching_state)
            .unwrap_or_default();
        match (state, entry) {
            (CachingState::Finished, Some(entry)) => return Ok(Decision::Hit(entry)),
            (CachingState::Started, entry) => {
                let writer_failed = previous
                    .as_ref()
                    .and_then(|writer| writer.peek())
                    .is_some_and(|result| result.is_err());
                if writer_failed {
                    return Ok(Decision::Bypass);
                }
                if !self.started_expired(entry.as_ref()) {
                    return Ok(Decision::Poll);
                }
                tracing::warn!(key = %key, "taking over stale cache population");
            }
            _ => {}
        }

        let claim = Arc::new(Completion::new());
        writers.insert(key.clone(), Arc::clone(&claim));
        Ok(Decision::Claim(claim))
    }

    fn started_expired(&self, entry: Option<&CacheEntry>) -> bool {
        let Some(timeout) = self.options.started_timeout else {
            return false;
        };
        entry
            .and_then(CacheEntry::started_age)
            .is_some_and(|age| age >= timeout)
    }

    fn populate<F>(
        &self,
        key: &VersionedKey,
        claim: Arc<Completion<PersistResult>>,
        fresh: F,
    ) -> Result<Loaded, Error>
    where
        F: FnOnce() -> Result<GameData, Error>,
    {
        let release = |err: Error| {
            claim.complete(Err(err.clone()));
            err
        };

        tracing::info!(key = %key, "loading fresh data");
        let GameData { metadata, records } = fresh().map_err(release)?;
        let mut branches = duplicate(records, 2);
        let (Some(for_cache), Some(for_caller)) = (branches.pop(), branches.pop()) else {
            return Err(release(
                Error::new(ErrorKind::Internal).with_message("stream duplication failed"),
            ));
        };

        mark_started(self.backend.as_ref(), key, &metadata).map_err(release)?;

        let writer = WriterGuard {
            key: key.clone(),
            done: Arc::clone(&claim),
        };
        let backend = Arc::clone(&self.backend);
        let mut for_cache = for_cache;
        std::thread::Builder::new()
            .name(format!("cache-writer {key}"))
            .spawn(move || {
                let result = persist_records(backend.as_ref(), &writer.key, &mut for_cache)
                    .and_then(|count| {
                        mark_finished(backend.as_ref(), &writer.key)?;
                        Ok(count)
                    });
                writer.finish(result);
            })
            .map_err(|err| {
                release(
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start cache writer")
                        .with_source(err),
                )
            })?;

        Ok(Loaded {
            metadata,
            records: Box::new(for_caller),
            origin: LoadOrigin::Fresh,
            persist: Some(PersistHandle {
                key: key.clone(),
                done: claim,
            }),
        })
    }
}

// Publishes the writer's outcome; a writer that unwinds still completes its signal.
struct WriterGuard {
    key: VersionedKey,
    done: Arc<Completion<PersistResult>>,
}

impl WriterGuard {
    fn finish(self, result: PersistResult) {
        match &result {
            Ok(count) => tracing::info!(key = %self.key, records = count, "cache write finished"),
            Err(err) => tracing::error!(key = %self.key, error = %err, "cache write failed"),
        }
        self.done.complete(result);
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if !self.done.is_complete() {
            tracing::error!(key = %self.key, "cache writer exited without a result");
            self.done.complete(Err(Error::new(ErrorKind::Internal)
                .with_message("cache writer exited without a result")
                .with_key(&self.key)));
        }
    }
}
