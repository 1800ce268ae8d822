//! Purpose: Public entry point tying the remote source, the cache, and table indexes together.
//! Exports: `GameDataClient`, `ClientOptions`.
//! Role: Stable boundary for the CLI and library users.
//! Invariants: Clones share one cache coordinator, so in-process loads of a key are deduplicated.
#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::remote::{DEFAULT_BASE_URL, RemoteSource};
use super::table::Table;
use crate::cache_paths::default_cache_dir;
use crate::core::cache::{CacheCoordinator, CacheOptions, Loaded};
use crate::core::error::Error;
use crate::core::file_store::FileStore;
use crate::core::model::VersionedKey;
use crate::core::store::{CacheBackend, CacheEntry, CachingState};

pub type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub base_url: String,
    pub cache_dir: PathBuf,
    pub connect_timeout: Option<Duration>,
    pub cache: CacheOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_dir: default_cache_dir(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            cache: CacheOptions::default(),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_cache_options(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }
}

#[derive(Clone)]
pub struct GameDataClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    remote: RemoteSource,
    cache: CacheCoordinator,
    cache_dir: Option<PathBuf>,
}

impl GameDataClient {
    /// Client backed by a `FileStore` under `options.cache_dir`.
    pub fn new(options: ClientOptions) -> ApiResult<Self> {
        let remote = RemoteSource::with_connect_timeout(options.base_url, options.connect_timeout)?;
        let backend = Arc::new(FileStore::new(options.cache_dir.clone()));
        Ok(Self::build(
            remote,
            backend,
            options.cache,
            Some(options.cache_dir),
        ))
    }

    pub fn with_backend(
        remote: RemoteSource,
        backend: Arc<dyn CacheBackend>,
        cache: CacheOptions,
    ) -> Self {
        Self::build(remote, backend, cache, None)
    }

    fn build(
        remote: RemoteSource,
        backend: Arc<dyn CacheBackend>,
        cache: CacheOptions,
        cache_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                remote,
                cache: CacheCoordinator::with_options(backend, cache),
                cache_dir,
            }),
        }
    }

    /// Directory of the file-backed cache, when the client owns one.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.inner.cache_dir.as_deref()
    }

    pub fn remote(&self) -> &RemoteSource {
        &self.inner.remote
    }

    /// Load `key` from the cache, fetching and persisting it on a miss.
    pub fn load(&self, key: &VersionedKey) -> ApiResult<Loaded> {
        let remote = &self.inner.remote;
        self.inner.cache.load(key, || remote.load_table(key))
    }

    pub fn cache_state(&self, key: &VersionedKey) -> ApiResult<CachingState> {
        self.inner.cache.state(key)
    }

    pub fn cache_entry(&self, key: &VersionedKey) -> ApiResult<Option<CacheEntry>> {
        self.inner.cache.backend().read_entry(key)
    }

    /// Start loading `key` in the background and return its index handle.
    pub fn open_table(&self, key: VersionedKey) -> ApiResult<Table> {
        let client = self.clone();
        let load_key = key.clone();
        Table::spawn(key, move || client.load(&load_key))
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientOptions, DEFAULT_CONNECT_TIMEOUT, GameDataClient};
    use crate::api::remote::{DEFAULT_BASE_URL, RemoteSource};
    use crate::core::cache::CacheOptions;
    use crate::core::store::MemoryStore;
    use std::sync::Arc;
    use crate::core::error::ErrorKind;
    use crate::core::model::VersionedKey;
    use crate::core::store::CachingState;
    use std::time::Duration;

    #[test]
    fn options_default_to_public_mirror() {
        let options = ClientOptions::default();
        assert_eq!(options.base_url, DEFAULT_BASE_URL);
        assert_eq!(options.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert!(options.cache_dir.ends_with(".rawexd/cache"));
    }

    #[test]
    fn client_reports_not_started_for_unknown_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = GameDataClient::new(
            ClientOptions::new()
                .with_cache_dir(dir.path())
                .with_connect_timeout(Some(Duration::from_secs(1))),
        )
        .expect("client");
        assert_eq!(client.cache_dir(), Some(dir.path()));
        assert_eq!(client.remote().base_url().as_str(), DEFAULT_BASE_URL);
        let key = VersionedKey::new("7.0", "Item").expect("key");
        assert_eq!(client.cache_state(&key).expect("state"), CachingState::NotStarted);
        assert!(client.cache_entry(&key).expect("entry").is_none());
    }

    #[test]
    fn memory_backed_client_has_no_cache_dir() {
        let remote = RemoteSource::new("http://127.0.0.1:9/mirror").expect("remote");
        let client = GameDataClient::with_backend(
            remote,
            Arc::new(MemoryStore::new()),
            CacheOptions::default(),
        );
        assert!(client.cache_dir().is_none());
        assert_eq!(client.remote().base_url().path(), "/mirror");
        let key = VersionedKey::new("7.0", "Item").expect("key");
        assert_eq!(client.cache_state(&key).expect("state"), CachingState::NotStarted);
    }

    #[test]
    fn client_rejects_bad_base_url() {
        let err = GameDataClient::new(ClientOptions::new().with_base_url("file:///tmp"))
            .err()
            .expect("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
