//! Purpose: Library crate behind the `rawexd` CLI.
//! Exports: `api` (client, table index, remote source) and `core` (parsing, fan-out, cache, storage).
//! Role: Versioned game-data loader with a persistent local cache.
//! Invariants: Every load names its game version explicitly; there is no ambient "current version".
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod cache_paths;
pub mod core;
