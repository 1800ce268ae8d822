//! Purpose: Default local cache-directory resolution.
//! Exports: `default_cache_dir`.
//! Role: Keep CLI and API-client directory defaults aligned from one source.
//! Invariants: Default cache directory remains `~/.rawexd/cache`.

use std::path::PathBuf;

pub(crate) fn default_cache_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".rawexd").join("cache")
}
