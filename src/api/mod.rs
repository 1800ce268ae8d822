//! Purpose: Define the public Rust API boundary for rawexd.
//! Exports: Client, table index, remote source, and the core types they return.
//! Role: Surface used by the CLI and by library callers.
//! Invariants: Storage and parsing internals stay reachable through `crate::core` only.

mod client;
mod remote;
mod table;

pub use crate::core::cache::{CacheOptions, LoadOrigin, Loaded, PersistHandle};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::file_store::FileStore;
pub use crate::core::model::{CacheMetadata, FieldDescriptor, GameData, Record, VersionedKey};
pub use crate::core::store::{CacheBackend, CacheEntry, CachingState, MemoryStore};
pub use client::{ClientOptions, DEFAULT_CONNECT_TIMEOUT, GameDataClient};
pub use remote::{DEFAULT_BASE_URL, RemoteSource};
pub use table::{Filter, ID_KEY, Table};
