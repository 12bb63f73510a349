//! Error handling and recovery tests.

use registration_store::{
    read_registrations, AccountBinding, RegistrationStore, StoreConfig, StoreError,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn open_over(path: &Path, contents: &[u8]) -> RegistrationStore {
    fs::write(path, contents).unwrap();
    RegistrationStore::open(StoreConfig {
        sync_on_write: false,
        ..StoreConfig::at(path)
    })
    .unwrap()
}

/// The loaded mapping is only observable after a write, so register a marker key.
fn loaded_keys(store: &RegistrationStore) -> Vec<String> {
    store
        .register("marker".into(), AccountBinding::new("marker", "h", "a"))
        .unwrap();

    let users = read_registrations(store.path()).unwrap();
    let mut keys: Vec<String> = users
        .keys()
        .filter(|k| k.as_str() != "marker")
        .map(|k| k.to_string())
        .collect();
    keys.sort();
    keys
}

// --- Corrupt prior state ---

#[test]
fn test_malformed_json_starts_empty() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = open_over(&dir.path().join("users.json"), b"{\"users\": {\"u1\": ");

    assert!(loaded_keys(&store).is_empty());
}

#[test]
fn test_empty_file_starts_empty() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = open_over(&dir.path().join("users.json"), b"");

    assert!(loaded_keys(&store).is_empty());
}

#[test]
fn test_wrong_shape_starts_empty() {
    init_tracing();
    let dir = TempDir::new().unwrap();

    for contents in [
        &b"[1, 2, 3]"[..],
        &br#"{"u1": {"login": "andy"}}"#[..],
        &br#"{"users": []}"#[..],
        &br#"{"users": {"u1": {"login": "andy", "htmlUrl": "h", "avatarUrl": "a", "currentNotificationIds": "n1"}}}"#[..],
    ] {
        let store = open_over(&dir.path().join("users.json"), contents);
        assert!(loaded_keys(&store).is_empty());
    }
}

#[test]
fn test_invalid_utf8_starts_empty() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = open_over(&dir.path().join("users.json"), &[0xff, 0xfe, 0x00, 0x7b]);

    assert!(loaded_keys(&store).is_empty());
}

#[test]
fn test_corrupt_file_is_overwritten_on_first_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.json");
    let store = open_over(&path, b"not json at all, and fairly long so truncation matters");

    store
        .register("u1".into(), AccountBinding::new("andy", "h", "a"))
        .unwrap();

    let users = read_registrations(&path).unwrap();
    assert_eq!(users.len(), 1);
    assert!(users.contains("u1"));
}

#[test]
fn test_valid_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let store = open_over(
        &dir.path().join("users.json"),
        br#"{"users": {"u1": {"login": "andy", "htmlUrl": "h", "avatarUrl": "a", "currentNotificationIds": ["n1"]}}}"#,
    );

    assert_eq!(loaded_keys(&store), vec!["u1".to_string()]);
    let users = read_registrations(store.path()).unwrap();
    assert_eq!(users.get("u1").unwrap().current_notification_ids.len(), 1);
}

// --- Storage failures ---

#[test]
fn test_directory_in_place_of_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.json");
    fs::create_dir(&path).unwrap();

    let result = RegistrationStore::open_at(&path);
    assert!(matches!(result, Err(StoreError::Io(_))));
}

#[test]
fn test_parent_is_a_file_fails() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join(".cache");
    fs::write(&blocker, b"").unwrap();

    let result = RegistrationStore::open_at(blocker.join("users.json"));
    assert!(matches!(result, Err(StoreError::Io(_))));
}

#[test]
fn test_concurrent_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.json");
    let _store = RegistrationStore::open_at(&path).unwrap();

    let result = RegistrationStore::open_at(&path);
    assert!(matches!(result, Err(StoreError::Locked)));
}

#[test]
fn test_strict_reader_reports_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.json");
    fs::write(&path, b"{").unwrap();

    assert!(matches!(
        read_registrations(&path),
        Err(StoreError::Deserialization(_))
    ));
}
