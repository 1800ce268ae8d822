//! Purpose: End-to-end tests for fetching tables through the client and cache.
//! Exports: None (integration test module).
//! Role: Validate remote fetch, persistence, and cache hits against a loopback stub.
//! Invariants: Uses a loopback-only stub with a temp cache directory.

mod common;

use common::{ITEM_CSV, StubServer};
use rawexd::api::{
    CachingState, ClientOptions, ErrorKind, Filter, GameDataClient, LoadOrigin, VersionedKey,
};
use rawexd::core::source::drain;
use serde_json::json;
use std::time::Duration;

const ITEM_PATH: &str = "/mirror/7.0/data/rawexd/Item.csv";

fn client(server: &StubServer, dir: &std::path::Path) -> GameDataClient {
    GameDataClient::new(
        ClientOptions::new()
            .with_base_url(server.base_url())
            .with_cache_dir(dir)
            .with_connect_timeout(Some(Duration::from_secs(5))),
    )
    .expect("client")
}

fn item_key() -> VersionedKey {
    VersionedKey::new("7.0", "Item").expect("key")
}

#[test]
fn fresh_fetch_then_cache_hit_without_request() {
    let server = StubServer::start(&[(ITEM_PATH, ITEM_CSV)]);
    let dir = tempfile::tempdir().expect("tempdir");
    let key = item_key();

    let client = client(&server, dir.path());
    let mut first = client.load(&key).expect("load");
    assert_eq!(first.origin, LoadOrigin::Fresh);
    let fields: Vec<&str> = first.metadata.fields.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(fields, vec!["Name", "Level", "IsUnique", "Description"]);
    let fresh = drain(&mut first.records).expect("records");
    assert_eq!(fresh.len(), 4);
    assert_eq!(fresh[2].get("Name"), Some(&json!("Ether, Greater")));
    assert_eq!(
        fresh[1].get("Description"),
        Some(&json!("Restores more HP.\nSold in towns."))
    );
    assert_eq!(fresh[3].get("Description"), Some(&json!(null)));
    assert_eq!(first.persist.expect("persist").wait().expect("persisted"), 4);
    assert_eq!(server.hits(), 1);
    assert_eq!(client.cache_state(&key).expect("state"), CachingState::Finished);

    // A new client (as in a new process) over the same directory must not refetch.
    let again = self::client(&server, dir.path());
    let mut second = again.load(&key).expect("load");
    assert_eq!(second.origin, LoadOrigin::Cache);
    assert_eq!(drain(&mut second.records).expect("records"), fresh);
    assert_eq!(server.hits(), 1);
}

#[test]
fn missing_table_is_network_failure() {
    let server = StubServer::start(&[(ITEM_PATH, ITEM_CSV)]);
    let dir = tempfile::tempdir().expect("tempdir");
    let client = client(&server, dir.path());
    let key = VersionedKey::new("7.0", "NoSuchTable").expect("key");

    let err = client.load(&key).expect_err("err");
    assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    assert!(err.message().unwrap_or_default().contains("404"));
    assert_eq!(client.cache_state(&key).expect("state"), CachingState::NotStarted);
}

#[test]
fn truncated_header_is_malformed_source() {
    let server = StubServer::start(&[(ITEM_PATH, "key,0,1\n#,Name,Level\n")]);
    let dir = tempfile::tempdir().expect("tempdir");
    let client = client(&server, dir.path());

    let err = client.load(&item_key()).expect_err("err");
    assert_eq!(err.kind(), ErrorKind::MalformedSource);
    assert_eq!(err.message(), Some("types header row missing"));
}

#[test]
fn unreachable_host_is_network_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let dir = tempfile::tempdir().expect("tempdir");
    let client = GameDataClient::new(
        ClientOptions::new()
            .with_base_url(format!("http://{addr}"))
            .with_cache_dir(dir.path())
            .with_connect_timeout(Some(Duration::from_secs(2))),
    )
    .expect("client");

    let err = client.load(&item_key()).expect_err("err");
    assert_eq!(err.kind(), ErrorKind::NetworkFailure);
}

#[test]
fn tables_share_one_fetch_across_clones() {
    let server = StubServer::start(&[(ITEM_PATH, ITEM_CSV)]);
    let dir = tempfile::tempdir().expect("tempdir");
    let client = client(&server, dir.path());

    let tables: Vec<_> = (0..3)
        .map(|_| client.clone().open_table(item_key()).expect("table"))
        .collect();
    for table in &tables {
        table.ready().expect("ready");
        assert_eq!(table.count(&Filter::new()), 4);
        let potions = table.find_all(&Filter::new().eq("Name", "Potion"));
        let ids: Vec<i64> = potions.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![1, 4]);
        table.persisted().expect("persisted");
    }
    assert_eq!(server.hits(), 1);
}
