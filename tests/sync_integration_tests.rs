//! End-to-end cycles against a live server on an ephemeral port.

use cachebox::hash::hash_bytes;
use cachebox::ignore::MAX_FILE_SIZE;
use cachebox::metadata::MetadataStore;
use cachebox::perms::{write_rule, PermissionRule, PermissionTree};
use cachebox::protocol::{ContentPayload, ManifestEntry};
use cachebox::sync::consumer::manifest_signature;
use cachebox::sync::types::{RemoteState, SyncStatus};
use cachebox::sync::{Consumer, SyncClient, SyncManager};
use cachebox::{create_router, ClientConfig, ServerConfig, SyncPath};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";

async fn spawn_server(snapshot: &Path) -> String {
    let app = create_router(ServerConfig::new(snapshot)).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn manager_for(url: &str, user: &str, root: &Path) -> SyncManager {
    SyncManager::new(ClientConfig::new(url, user, root)).unwrap()
}

fn write_local(root: &Path, logical: &str, content: &[u8]) {
    let abs = root.join(logical);
    fs::create_dir_all(abs.parent().unwrap()).unwrap();
    fs::write(abs, content).unwrap();
}

async fn server_content(url: &str, user: &str, path: &str) -> Vec<u8> {
    let client = SyncClient::new(url, user);
    let payload = client.download(&SyncPath::parse(path).unwrap()).await.unwrap();
    B64.decode(payload.content_b64).unwrap()
}

#[tokio::test]
async fn local_create_uploads_and_settles() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    write_local(root.path(), &format!("{ALICE}/docs/note.txt"), b"first draft");

    let manager = manager_for(&url, ALICE, root.path());
    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(report.failures.is_empty());
    assert_eq!(
        server_content(&url, ALICE, &format!("{ALICE}/docs/note.txt")).await,
        b"first draft"
    );

    // a second cycle finds nothing to do
    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 0);
    assert_eq!(report.conflicts, 0);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn dot_files_are_never_uploaded() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    write_local(root.path(), &format!("{ALICE}/visible.txt"), b"yes");
    write_local(root.path(), &format!("{ALICE}/.hidden"), b"no");
    write_local(root.path(), &format!("{ALICE}/.git/config"), b"no");

    let manager = manager_for(&url, ALICE, root.path());
    manager.run_once().await.unwrap();

    let client = SyncClient::new(&url, ALICE);
    let manifest = client
        .manifest(&SyncPath::parse(ALICE).unwrap())
        .await
        .unwrap();
    let paths: Vec<&str> = manifest.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["alice@example.com/visible.txt"]);
}

#[tokio::test]
async fn remote_modify_is_downloaded() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    let logical = format!("{ALICE}/shared.txt");
    write_local(root.path(), &logical, b"v1");

    let manager = manager_for(&url, ALICE, root.path());
    manager.run_once().await.unwrap();

    // another device of the same user replaces the content
    let other_device = SyncClient::new(&url, ALICE);
    let content = b"v2 from elsewhere".to_vec();
    other_device
        .upload(
            &SyncPath::parse(&logical).unwrap(),
            &ContentPayload {
                content_b64: B64.encode(&content),
                hash: hash_bytes(&content),
            },
        )
        .await
        .unwrap();

    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(fs::read(root.path().join(&logical)).unwrap(), content);
}

#[tokio::test]
async fn remote_delete_is_adopted_locally() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    let logical = format!("{ALICE}/doomed.txt");
    write_local(root.path(), &logical, b"short lived");

    let manager = manager_for(&url, ALICE, root.path());
    manager.run_once().await.unwrap();

    let other_device = SyncClient::new(&url, ALICE);
    other_device
        .delete(&SyncPath::parse(&logical).unwrap())
        .await
        .unwrap();

    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(!root.path().join(&logical).exists());

    // and the record is gone too: nothing left to classify
    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 0);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn local_delete_propagates_to_server() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    let logical = format!("{ALICE}/gone.txt");
    write_local(root.path(), &logical, b"temporary");

    let manager = manager_for(&url, ALICE, root.path());
    manager.run_once().await.unwrap();

    fs::remove_file(root.path().join(&logical)).unwrap();
    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 1);

    let client = SyncClient::new(&url, ALICE);
    let err = client
        .download(&SyncPath::parse(&logical).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn concurrent_edits_preserve_local_and_adopt_remote() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    let logical = format!("{ALICE}/report.txt");
    write_local(root.path(), &logical, b"agreed baseline");

    let manager = manager_for(&url, ALICE, root.path());
    manager.run_once().await.unwrap();

    // both sides diverge before the next cycle
    write_local(root.path(), &logical, b"my local rewrite");
    let other_device = SyncClient::new(&url, ALICE);
    let remote = b"their remote rewrite, longer".to_vec();
    other_device
        .upload(
            &SyncPath::parse(&logical).unwrap(),
            &ContentPayload {
                content_b64: B64.encode(&remote),
                hash: hash_bytes(&remote),
            },
        )
        .await
        .unwrap();

    let report = manager.run_once().await.unwrap();
    assert_eq!(report.conflicts, 1);
    // remote wins on disk
    assert_eq!(fs::read(root.path().join(&logical)).unwrap(), remote);
    // the local rewrite survives in the recovery area
    let conflicts_dir = root.path().join(".cachebox").join("conflicts");
    let recovered = find_file_containing(&conflicts_dir, b"my local rewrite");
    assert!(recovered, "recovery copy missing under {conflicts_dir:?}");

    // converged: next cycle is clean
    let report = manager.run_once().await.unwrap();
    assert_eq!(report.conflicts, 0);
    assert!(report.failures.is_empty());
}

fn find_file_containing(dir: &Path, needle: &[u8]) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if find_file_containing(&path, needle) {
                return true;
            }
        } else if fs::read(&path).map(|c| c == needle).unwrap_or(false) {
            return true;
        }
    }
    false
}

#[tokio::test]
async fn denied_upload_is_reported_and_leaves_server_untouched() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    // bob drops a file into alice's datasite directory locally
    let logical = format!("{ALICE}/intruder.txt");
    write_local(root.path(), &logical, b"should not leave this machine");

    let manager = manager_for(&url, BOB, root.path());
    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].1, "permission_denied");

    let status = manager.status_snapshot();
    let info = status.get(&SyncPath::parse(&logical).unwrap()).unwrap();
    assert_eq!(info.status, SyncStatus::Rejected);

    // the file never reached the server, and stays on disk locally
    let alice = SyncClient::new(&url, ALICE);
    let err = alice
        .download(&SyncPath::parse(&logical).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
    assert!(root.path().join(&logical).exists());
}

#[tokio::test]
async fn oversized_files_get_ignored_status() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    write_local(root.path(), &format!("{ALICE}/small.txt"), b"fits");
    // sparse file over the limit
    let huge_abs = root.path().join(ALICE).join("huge.bin");
    let huge = fs::File::create(&huge_abs).unwrap();
    huge.set_len(MAX_FILE_SIZE + 1).unwrap();

    let manager = manager_for(&url, ALICE, root.path());
    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(report.failures.is_empty());

    let status = manager.status_snapshot();
    let huge_path = SyncPath::parse(&format!("{ALICE}/huge.bin")).unwrap();
    assert_eq!(status.get(&huge_path).unwrap().status, SyncStatus::Ignored);

    // the oversized file never reached the server
    let client = SyncClient::new(&url, ALICE);
    let manifest = client
        .manifest(&SyncPath::parse(ALICE).unwrap())
        .await
        .unwrap();
    let paths: Vec<&str> = manifest.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["alice@example.com/small.txt"]);
}

#[tokio::test]
async fn bootstrap_fills_an_empty_client() {
    let snapshot = tempfile::tempdir().unwrap();
    // pre-seed the server snapshot; reindex picks these up at open
    write_local(snapshot.path(), &format!("{ALICE}/a.txt"), b"aaa");
    write_local(snapshot.path(), &format!("{ALICE}/deep/b.txt"), b"bbb");
    let url = spawn_server(snapshot.path()).await;

    let root = tempfile::tempdir().unwrap();
    let manager = manager_for(&url, ALICE, root.path());
    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(fs::read(root.path().join(ALICE).join("a.txt")).unwrap(), b"aaa");
    assert_eq!(
        fs::read(root.path().join(ALICE).join("deep").join("b.txt")).unwrap(),
        b"bbb"
    );

    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 0);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn readable_datasites_flow_between_users() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;

    // alice publishes a public directory
    let alice_root = tempfile::tempdir().unwrap();
    let public = alice_root.path().join(ALICE).join("public");
    fs::create_dir_all(&public).unwrap();
    write_rule(&public, &PermissionRule::public_read(ALICE)).unwrap();
    write_local(
        alice_root.path(),
        &format!("{ALICE}/public/data.csv"),
        b"1,2,3",
    );
    write_local(alice_root.path(), &format!("{ALICE}/private.txt"), b"mine");
    let alice = manager_for(&url, ALICE, alice_root.path());
    let report = alice.run_once().await.unwrap();
    assert!(report.failures.is_empty());

    // bob's fresh client discovers alice's datasite and pulls what he may read
    let bob_root = tempfile::tempdir().unwrap();
    let bob = manager_for(&url, BOB, bob_root.path());
    let report = bob.run_once().await.unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(
        fs::read(bob_root.path().join(ALICE).join("public").join("data.csv")).unwrap(),
        b"1,2,3"
    );
    assert!(!bob_root.path().join(ALICE).join("private.txt").exists());
}

#[tokio::test]
async fn stale_delta_base_falls_back_to_full_upload() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let client = SyncClient::new(&url, ALICE);
    let logical = SyncPath::parse(&format!("{ALICE}/big.bin")).unwrap();

    // the server once held `old`, then moved on to `current`
    let old: Vec<u8> = b"0123456789".repeat(1000);
    let stale_entry = ManifestEntry {
        path: logical.clone(),
        hash: hash_bytes(&old),
        size: old.len() as u64,
        signature_b64: manifest_signature(&old),
    };
    let current = b"something else entirely".to_vec();
    client
        .upload(
            &logical,
            &ContentPayload {
                content_b64: B64.encode(&current),
                hash: hash_bytes(&current),
            },
        )
        .await
        .unwrap();

    // local has a third version, with a record claiming `old` was synced
    let root = tempfile::tempdir().unwrap();
    let mut local_content = old.clone();
    local_content.extend_from_slice(b"tail");
    write_local(root.path(), logical.as_str(), &local_content);
    let store = Arc::new(
        MetadataStore::open(&root.path().join("state.redb")).unwrap(),
    );
    store
        .put(&cachebox::metadata::FileRecord {
            path: logical.clone(),
            content_hash: hash_bytes(&local_content),
            last_synced_hash: Some(hash_bytes(&old)),
            size: local_content.len() as u64,
            modified_at: 0,
        })
        .unwrap();

    // the stale manifest snapshot routes the upload through the delta path;
    // the 409 must turn into a full upload within the same call
    let consumer = Consumer::new(root.path(), store, client.clone(), 1);
    let mut remote = RemoteState::new();
    remote.insert(logical.clone(), stale_entry);
    let perms = PermissionTree::default();
    consumer.process(&logical, &remote, &perms).await.unwrap();

    assert_eq!(
        server_content(&url, ALICE, logical.as_str()).await,
        local_content
    );
}

#[tokio::test]
async fn large_modify_round_trips_through_delta() {
    let snapshot = tempfile::tempdir().unwrap();
    let url = spawn_server(snapshot.path()).await;
    let root = tempfile::tempdir().unwrap();
    let logical = format!("{ALICE}/large.bin");
    let v1: Vec<u8> = b"abcdefghij".repeat(2000);
    write_local(root.path(), &logical, &v1);

    let manager = manager_for(&url, ALICE, root.path());
    manager.run_once().await.unwrap();

    // an in-place edit large enough for the delta path
    let mut v2 = v1.clone();
    v2.extend_from_slice(b"appended section");
    write_local(root.path(), &logical, &v2);

    let report = manager.run_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(server_content(&url, ALICE, &logical).await, v2);
}
