//! Integration tests for end-to-end version operations over WebSocket.
//!
//! Verifies:
//! - Client connects to server
//! - Versions created by one client are visible to another
//! - Removing an edit keeps later edits and is itself a version
//! - Service errors arrive as `ProtocolError::Remote` with their code
//! - Concurrent clients writing one file lose no versions

use palimpsest_server::{
    ConnectionState, EntryKind, ErrorCode, FileKey, MemoryBlobStore, ProtocolError, ServerConfig,
    VersionClient, VersionServer,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Start a server on an ephemeral port and return its URL.
async fn start_test_server() -> (String, Arc<VersionServer<MemoryBlobStore>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Arc::new(VersionServer::new(
        ServerConfig::for_testing(),
        MemoryBlobStore::new(),
    ));
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });

    (format!("ws://{addr}"), server)
}

async fn connected_client(url: &str) -> VersionClient {
    let mut client = VersionClient::new(url).with_request_timeout(Duration::from_secs(5));
    timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect timed out")
        .expect("connect failed");
    client
}

fn remote_code(err: ProtocolError) -> ErrorCode {
    match err {
        ProtocolError::Remote { code, .. } => code,
        other => panic!("expected a remote error, got {other:?}"),
    }
}

// ─── Connection ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_client_connects_and_pings() {
    let (url, server) = start_test_server().await;
    let client = connected_client(&url).await;
    assert_eq!(client.state().await, ConnectionState::Connected);

    let rtt = client.ping().await.unwrap();
    assert!(rtt < Duration::from_secs(5));

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.total_requests, 1);
}

#[tokio::test]
async fn test_disconnect_fails_later_requests() {
    let (url, _server) = start_test_server().await;
    let mut client = connected_client(&url).await;

    client.disconnect().await;
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert_eq!(client.ping().await, Err(ProtocolError::ConnectionClosed));
}

// ─── Version lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_absent_file_reads_as_empty() {
    let (url, _server) = start_test_server().await;
    let client = connected_client(&url).await;
    let key = FileKey::random();

    let latest = client.get_version(key, None).await.unwrap();
    assert_eq!(latest.info.version, 0);
    assert_eq!(latest.content, "");
    assert!(client.list_versions(key).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_versions_visible_across_clients() {
    let (url, _server) = start_test_server().await;
    let alice = connected_client(&url).await;
    let bob = connected_client(&url).await;
    let key = FileKey::random();

    let v1 = alice.create_version(key, "alice", "Hello world").await.unwrap();
    let v2 = bob.create_version(key, "bob", "Hello world!").await.unwrap();
    assert_eq!(v1.version, 1);
    assert_eq!(v2.version, 2);
    assert_eq!(v2.author, "bob");
    assert_eq!(v2.length, 12);

    let latest = alice.get_version(key, None).await.unwrap();
    assert_eq!(latest.info.version, 2);
    assert_eq!(latest.content, "Hello world!");

    let first = bob.get_version(key, Some(1)).await.unwrap();
    assert_eq!(first.content, "Hello world");

    let versions = alice.list_versions(key).await.unwrap();
    let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn test_remove_edit_keeps_later_edits() {
    let (url, _server) = start_test_server().await;
    let client = connected_client(&url).await;
    let key = FileKey::random();

    client.create_version(key, "alice", "Hello world").await.unwrap();
    client.create_version(key, "alice", "Hello world!").await.unwrap();
    client.create_version(key, "bob", "Hi world!").await.unwrap();

    let removal = client.remove_edit(key, 2, "carol").await.unwrap();
    assert_eq!(removal.version, 4);
    assert_eq!(removal.author, "carol");
    assert_eq!(removal.kind, EntryKind::Removal { removed_version: 2 });

    let latest = client.get_version(key, None).await.unwrap();
    assert_eq!(latest.content, "Hi world");

    // Earlier versions are untouched
    let v3 = client.get_version(key, Some(3)).await.unwrap();
    assert_eq!(v3.content, "Hi world!");
    assert_eq!(client.list_versions(key).await.unwrap().len(), 4);
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_version_is_not_found() {
    let (url, server) = start_test_server().await;
    let client = connected_client(&url).await;
    let key = FileKey::random();
    client.create_version(key, "alice", "only version").await.unwrap();

    let err = client.get_version(key, Some(9)).await.unwrap_err();
    assert_eq!(remote_code(err), ErrorCode::NotFound);

    let err = client.remove_edit(key, 9, "alice").await.unwrap_err();
    assert_eq!(remote_code(err), ErrorCode::NotFound);

    assert_eq!(server.stats().await.failed_requests, 2);
}

#[tokio::test]
async fn test_overlapping_removal_is_conflict() {
    let (url, _server) = start_test_server().await;
    let client = connected_client(&url).await;
    let key = FileKey::random();

    client.create_version(key, "alice", "abc").await.unwrap();
    client.create_version(key, "alice", "abcXYZ").await.unwrap();
    client.create_version(key, "bob", "abc").await.unwrap();

    let err = client.remove_edit(key, 2, "carol").await.unwrap_err();
    assert_eq!(remote_code(err), ErrorCode::RebaseConflict);

    // Nothing was recorded for the failed removal
    assert_eq!(client.list_versions(key).await.unwrap().len(), 3);
    assert_eq!(client.get_version(key, None).await.unwrap().content, "abc");
}

#[tokio::test]
async fn test_empty_author_is_invalid() {
    let (url, _server) = start_test_server().await;
    let client = connected_client(&url).await;
    let key = FileKey::random();

    let err = client.create_version(key, "  ", "text").await.unwrap_err();
    assert_eq!(remote_code(err), ErrorCode::Invalid);
    assert!(client.list_versions(key).await.unwrap().is_empty());
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_one_file() {
    const CLIENTS: usize = 8;
    const EDITS: usize = 10;

    let (url, _server) = start_test_server().await;
    let key = FileKey::random();

    let mut handles = Vec::new();
    for c in 0..CLIENTS {
        let client = connected_client(&url).await;
        handles.push(tokio::spawn(async move {
            for e in 0..EDITS {
                let content = format!("client {c} edit {e}");
                client
                    .create_version(key, &format!("client-{c}"), &content)
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let reader = connected_client(&url).await;
    let latest = reader.get_version(key, None).await.unwrap();
    // for_testing compacts, but version numbers never reset
    assert_eq!(latest.info.version, (CLIENTS * EDITS) as u64);
}
