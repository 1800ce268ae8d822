//! Purpose: In-memory, id-ordered index over one loaded table.
//! Exports: `Table`, `Filter`.
//! Role: Query surface; construction starts exactly one load on a loader thread.
//! Invariants: Every query waits on the same readiness signal, then reads the populated map.
//! Invariants: Queries never fail; a failed load behaves as an empty table.
//! Invariants: A missing field never matches a filter term.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::core::cache::{Loaded, LoadOrigin, PersistHandle};
use crate::core::error::{Error, ErrorKind};
use crate::core::model::{CacheMetadata, Record, VersionedKey};
use crate::core::notify::Completion;
use crate::core::source::drain;

/// Pseudo-key matching the record id instead of a data field.
pub const ID_KEY: &str = "$id";

/// Conjunction of exact-equality terms; an empty filter matches every record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.terms.iter().all(|(key, expected)| {
            if key == ID_KEY {
                return values_equal(&Value::from(record.id), expected);
            }
            record
                .get(key)
                .is_some_and(|actual| values_equal(actual, expected))
        })
    }
}

// Numbers compare by value, so `5` and `5.0` are equal.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(actual), Value::Number(expected)) => {
            match (actual.as_i64(), expected.as_i64()) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => actual.as_f64() == expected.as_f64(),
            }
        }
        _ => actual == expected,
    }
}

struct Contents {
    metadata: CacheMetadata,
    records: BTreeMap<i64, Record>,
    origin: LoadOrigin,
    persist: Option<PersistHandle>,
}

type Readiness = Completion<Result<Arc<Contents>, Error>>;

#[derive(Clone)]
pub struct Table {
    key: VersionedKey,
    ready: Arc<Readiness>,
}

impl Table {
    /// Start `loader` on a dedicated thread and return immediately.
    pub fn spawn<F>(key: VersionedKey, loader: F) -> Result<Self, Error>
    where
        F: FnOnce() -> Result<Loaded, Error> + Send + 'static,
    {
        let ready: Arc<Readiness> = Arc::new(Completion::new());
        let guard = LoadGuard {
            key: key.clone(),
            ready: Arc::clone(&ready),
        };
        std::thread::Builder::new()
            .name(format!("table-loader {key}"))
            .spawn(move || {
                let result = loader().and_then(index);
                guard.finish(result);
            })
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to start table loader")
                    .with_key(&key)
                    .with_source(err)
            })?;
        Ok(Self { key, ready })
    }

    pub fn key(&self) -> &VersionedKey {
        &self.key
    }

    fn contents(&self) -> Option<Arc<Contents>> {
        self.ready.wait().ok()
    }

    /// Wait for the load; returns its error, if any.
    pub fn ready(&self) -> Result<(), Error> {
        self.ready.wait().map(|_| ())
    }

    /// Wait for the load and for background persistence of a fresh load.
    pub fn persisted(&self) -> Result<(), Error> {
        let contents = self.ready.wait()?;
        match &contents.persist {
            Some(handle) => handle.wait().map(|_| ()),
            None => Ok(()),
        }
    }

    pub fn metadata(&self) -> Option<CacheMetadata> {
        self.contents().map(|contents| contents.metadata.clone())
    }

    pub fn origin(&self) -> Option<LoadOrigin> {
        self.contents().map(|contents| contents.origin)
    }

    pub fn find(&self, filter: &Filter) -> Option<Record> {
        let contents = self.contents()?;
        contents
            .records
            .values()
            .find(|record| filter.matches(record))
            .cloned()
    }

    pub fn find_by_id(&self, id: i64) -> Option<Record> {
        self.contents()?.records.get(&id).cloned()
    }

    pub fn find_all(&self, filter: &Filter) -> Vec<Record> {
        let Some(contents) = self.contents() else {
            return Vec::new();
        };
        contents
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }

    pub fn count(&self, filter: &Filter) -> usize {
        let Some(contents) = self.contents() else {
            return 0;
        };
        if filter.is_empty() {
            return contents.records.len();
        }
        contents
            .records
            .values()
            .filter(|record| filter.matches(record))
            .count()
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("key", &self.key)
            .field("ready", &self.ready.is_complete())
            .finish()
    }
}

fn index(loaded: Loaded) -> Result<Arc<Contents>, Error> {
    let Loaded {
        metadata,
        mut records,
        origin,
        persist,
    } = loaded;
    let records = drain(&mut records)?
        .into_iter()
        .map(|record| (record.id, record))
        .collect();
    Ok(Arc::new(Contents {
        metadata,
        records,
        origin,
        persist,
    }))
}

struct LoadGuard {
    key: VersionedKey,
    ready: Arc<Readiness>,
}

impl LoadGuard {
    fn finish(self, result: Result<Arc<Contents>, Error>) {
        match &result {
            Ok(contents) => tracing::info!(
                key = %self.key,
                records = contents.records.len(),
                origin = contents.origin.as_str(),
                "table ready"
            ),
            Err(err) => tracing::error!(key = %self.key, error = %err, "table load failed"),
        }
        self.ready.complete(result);
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if !self.ready.is_complete() {
            self.ready.complete(Err(Error::new(ErrorKind::Internal)
                .with_message("table loader exited without a result")
                .with_key(&self.key)));
        }
    }
}
