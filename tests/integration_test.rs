//! Integration tests for filehaven-rust
//!
//! The live tests require environment variables to be set:
//! - FILEHAVEN_USERNAME: account name
//! - FILEHAVEN_PASSWORD: account password
//!
//! Run with: cargo test --test integration_test -- --ignored

use filehaven_rust::{
    FolderUploadEngine, HavenClient, HavenError, NullSink, RemoteFolder, Settings, UploadOptions,
};
use std::env;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a logged-in client plus the account's base folder.
async fn get_session() -> Option<(HavenClient, RemoteFolder)> {
    let username = env::var("FILEHAVEN_USERNAME").ok()?;
    let password = env::var("FILEHAVEN_PASSWORD").ok()?;

    let mut client = HavenClient::new();
    let session = client.login(&username, &password).await.ok()?;
    Some((client, session.base))
}

fn live_creds() -> (String, String) {
    (
        env::var("FILEHAVEN_USERNAME").expect("FILEHAVEN_USERNAME not set"),
        env::var("FILEHAVEN_PASSWORD").expect("FILEHAVEN_PASSWORD not set"),
    )
}

#[tokio::test]
#[ignore] // Requires credentials
async fn test_login_success() {
    let (username, password) = live_creds();

    let mut client = HavenClient::new();
    let session = client
        .login(&username, &password)
        .await
        .expect("login should succeed");

    assert!(!session.session.is_empty());
    assert!(!session.base.hash.is_empty());
    assert!(session.base.upload_key().is_some());
}

#[tokio::test]
#[ignore] // Requires credentials
async fn test_login_invalid_credentials() {
    let mut client = HavenClient::new();
    let result = client.login("invalid@example.com", "wrongpassword").await;

    assert!(result.is_err());
}

#[tokio::test]
#[ignore] // Requires credentials
async fn test_list_base_folder() {
    let (client, base) = get_session().await.expect("Failed to authenticate");

    let items = client
        .list_folder(&base.hash, false)
        .await
        .expect("listing the base folder should succeed");
    // A valid (possibly empty) listing is all we can assert against a live
    // account.
    drop(items);
}

#[tokio::test]
#[ignore] // Requires credentials
async fn test_create_and_list_folder() {
    use filehaven_rust::{AccessType, Credentials, RemoteApi};

    let (username, password) = live_creds();
    let (client, base) = get_session().await.expect("Failed to authenticate");
    let creds = Credentials { username, password };

    // Create a unique test folder
    let name = format!(
        "test_folder_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_millis()
    );

    let folder = client
        .create_folder(&name, &base.hash, AccessType::Private, &creds)
        .await
        .expect("folder creation should succeed");
    assert!(!folder.hash.is_empty());
    assert!(folder.upload_key().is_some());

    let items = client
        .list_folder(&base.hash, false)
        .await
        .expect("listing should succeed");
    assert!(items.iter().any(|item| item.name == name && item.is_folder));
}

#[tokio::test]
#[ignore] // Requires credentials
async fn test_upload_single_file() {
    let (client, base) = get_session().await.expect("Failed to authenticate");

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let test_file = temp_dir.path().join("test_upload.txt");
    std::fs::write(&test_file, "Hello, FileHaven! This is a test file.")
        .expect("Failed to write test file");

    let key = base.upload_key().expect("base folder key").to_string();
    let sink = NullSink;
    let engine = FolderUploadEngine::new(&client, &sink);

    let report = engine
        .upload_single_file(&test_file, &base.hash, &key, true)
        .await
        .expect("run");

    assert!(report.success(), "failures: {:?}", report.failures);
    assert_eq!(report.uploaded.len(), 1);
}

#[tokio::test]
#[ignore] // Requires credentials
async fn test_upload_folder_tree() {
    use filehaven_rust::Credentials;

    let (username, password) = live_creds();
    let (client, base) = get_session().await.expect("Failed to authenticate");
    let creds = Credentials { username, password };

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path().join("haven_it_root");
    std::fs::create_dir(&root).expect("mkdir");
    std::fs::write(root.join("top.txt"), "top").expect("write");
    let sub = root.join("nested");
    std::fs::create_dir(&sub).expect("mkdir");
    std::fs::write(sub.join("deep.txt"), "deep").expect("write");

    let sink = NullSink;
    let engine = FolderUploadEngine::new(&client, &sink);

    let report = engine
        .upload_folder(&root, &base, &creds, &UploadOptions::default())
        .await
        .expect("run");

    assert!(report.success(), "failures: {:?}", report.failures);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 2);
}

#[test]
fn test_settings_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{"Username":"me","Password":"pw","BaseFolderHash":"H123","FolderKey":"K456"}"#,
    )
    .expect("write settings");

    let settings = Settings::load(&path).expect("load settings");
    assert_eq!(settings.base_folder().hash, "H123");
    assert_eq!(settings.credentials().username, "me");
}

#[test]
fn test_settings_missing_file() {
    let result = Settings::load(Path::new("/no/such/settings.json"));
    assert!(matches!(result, Err(HavenError::Configuration(_))));
}

#[test]
fn test_settings_incomplete() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{"Username":"me","Password":"","BaseFolderHash":"H123","FolderKey":"K456"}"#,
    )
    .expect("write settings");

    let result = Settings::load(&path);
    assert!(matches!(result, Err(HavenError::Configuration(_))));
}
