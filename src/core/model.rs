// Data model shared by the parser, the cache, and the table index.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};
use crate::core::source::Source;

/// One data column, in header order.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub key: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
}

impl FieldDescriptor {
    /// Key used in record data for the column at `index`.
    pub fn record_key(field: Option<&FieldDescriptor>, index: usize) -> String {
        match field {
            Some(field) if !field.key.is_empty() => field.key.clone(),
            _ => format!("${index}"),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

pub type RecordStream = Box<dyn Source<Item = Record>>;

/// Schema plus a lazy record sequence, as produced by a loader.
pub struct GameData {
    pub metadata: CacheMetadata,
    pub records: RecordStream,
}

impl fmt::Debug for GameData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameData")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// `(version, table)` identity of one data snapshot.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct VersionedKey {
    version: String,
    table: String,
}

impl VersionedKey {
    pub fn new(version: impl Into<String>, table: impl Into<String>) -> Result<Self, Error> {
        let version = version.into();
        let table = table.into();
        ensure_component("version", &version)?;
        ensure_component("table", &table)?;
        Ok(Self { version, table })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for VersionedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.version, self.table)
    }
}

fn ensure_component(label: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("{label} must not be empty")));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("{label} must not contain path separators"))
            .with_hint("Use the bare table name, e.g. `Item`."));
    }
    Ok(())
}
