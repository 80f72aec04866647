use super::*;

use tempfile::TempDir;

use crate::file::tmp_path_for;

fn sample_config() -> InstallationConfig {
    InstallationConfig {
        data_directory: "/opt/ec".into(),
        ..Default::default()
    }
}

fn file_store() -> (TempDir, FileStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::new(dir.path().join("migration").join("state.json"));
    (dir, store)
}

async fn initialize_sets_initial_status(store: &dyn MigrationStore) {
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");

    let status = store.status().await.expect("status");
    assert_eq!(status.state, MigrationState::NotStarted);
    assert_eq!(status.phase, MigrationPhase::Discovery);
    assert_eq!(status.progress, 0);
    assert!(status.message.is_empty());
    assert!(status.error.is_empty());

    assert_eq!(store.migration_id().await.expect("id"), "id1");
    assert_eq!(
        store.transfer_mode().await.expect("mode"),
        TransferMode::Copy
    );
    assert_eq!(store.config().await.expect("config"), sample_config());
}

async fn second_initialize_is_rejected(store: &dyn MigrationStore) {
    store
        .initialize_migration("first", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");
    let before = store.record().await.expect("record");

    let err = store
        .initialize_migration("second", TransferMode::Move, InstallationConfig::default())
        .await
        .expect_err("second initialize must fail");
    assert!(err.is_already_started(), "unexpected error: {err}");

    assert_eq!(store.record().await.expect("record"), before);
}

async fn uninitialized_store_reports_no_active_migration(store: &dyn MigrationStore) {
    assert!(store
        .migration_id()
        .await
        .expect_err("id")
        .is_no_active_migration());
    assert!(store.status().await.expect_err("status").is_no_active_migration());
    assert!(store
        .transfer_mode()
        .await
        .expect_err("mode")
        .is_no_active_migration());
    assert!(store.config().await.expect_err("config").is_no_active_migration());
    assert!(store
        .set_state(MigrationState::InProgress)
        .await
        .expect_err("state")
        .is_no_active_migration());
    assert!(store
        .set_phase(MigrationPhase::Preparation)
        .await
        .expect_err("phase")
        .is_no_active_migration());
    assert!(store
        .set_message("hello")
        .await
        .expect_err("message")
        .is_no_active_migration());
    assert!(store
        .set_progress(10)
        .await
        .expect_err("progress")
        .is_no_active_migration());
    assert!(store
        .set_error("boom")
        .await
        .expect_err("error")
        .is_no_active_migration());

    assert_eq!(
        store.user_config().await.expect("user config"),
        InstallationConfig::default()
    );
}

async fn status_updates_touch_only_their_field(store: &dyn MigrationStore) {
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");
    store
        .set_state(MigrationState::InProgress)
        .await
        .expect("state");
    store
        .set_phase(MigrationPhase::Preparation)
        .await
        .expect("phase");
    store.set_progress(25).await.expect("progress");

    let status = store.status().await.expect("status");
    assert_eq!(
        status,
        MigrationStatus {
            state: MigrationState::InProgress,
            phase: MigrationPhase::Preparation,
            message: String::new(),
            progress: 25,
            error: String::new(),
        }
    );
    assert_eq!(store.migration_id().await.expect("id"), "id1");
    assert_eq!(store.config().await.expect("config"), sample_config());
}

async fn pending_user_config_survives_initialization(store: &dyn MigrationStore) {
    let user = InstallationConfig {
        http_proxy: "http://proxy:8080".into(),
        ..Default::default()
    };
    store
        .set_user_config(user.clone())
        .await
        .expect("pending user config");
    assert_eq!(store.user_config().await.expect("pending"), user);

    store
        .initialize_migration("id1", TransferMode::Move, sample_config())
        .await
        .expect("initialize");
    assert_eq!(store.user_config().await.expect("folded"), user);
    assert_eq!(store.record().await.expect("record").user_config, user);
}

async fn user_config_after_initialization_is_persisted(store: &dyn MigrationStore) {
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");
    let user = InstallationConfig {
        no_proxy: "10.0.0.0/8".into(),
        ..Default::default()
    };
    store.set_user_config(user.clone()).await.expect("set");
    assert_eq!(store.user_config().await.expect("get"), user);
    assert_eq!(store.config().await.expect("config"), sample_config());
}

async fn getters_return_independent_copies(store: &dyn MigrationStore) {
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");
    store
        .set_user_config(InstallationConfig {
            http_proxy: "http://proxy:8080".into(),
            ..Default::default()
        })
        .await
        .expect("user config");

    let mut config = store.config().await.expect("config");
    config.data_directory = "/mutated".into();
    let mut user = store.user_config().await.expect("user config");
    user.http_proxy.clear();
    let mut status = store.status().await.expect("status");
    status.message = "mutated".into();
    status.progress = 99;
    let mut record = store.record().await.expect("record");
    record.migration_id = "mutated".into();

    assert_eq!(store.config().await.expect("config"), sample_config());
    assert_eq!(
        store.user_config().await.expect("user config").http_proxy,
        "http://proxy:8080"
    );
    let status = store.status().await.expect("status");
    assert!(status.message.is_empty());
    assert_eq!(status.progress, 0);
    assert_eq!(store.migration_id().await.expect("id"), "id1");
}

async fn progress_is_clamped(store: &dyn MigrationStore) {
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");
    store.set_progress(250).await.expect("progress");
    assert_eq!(store.status().await.expect("status").progress, 100);
}

async fn message_and_error_are_recorded(store: &dyn MigrationStore) {
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");
    store.set_message("copying volumes").await.expect("message");
    store
        .set_error("execute phase Discovery: boom")
        .await
        .expect("error");

    let status = store.status().await.expect("status");
    assert_eq!(status.message, "copying volumes");
    assert_eq!(status.error, "execute phase Discovery: boom");
}

#[tokio::test]
async fn memory_initialize_sets_initial_status() {
    initialize_sets_initial_status(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_initialize_sets_initial_status() {
    let (_dir, store) = file_store();
    initialize_sets_initial_status(&store).await;
}

#[tokio::test]
async fn memory_second_initialize_is_rejected() {
    second_initialize_is_rejected(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_second_initialize_is_rejected() {
    let (_dir, store) = file_store();
    second_initialize_is_rejected(&store).await;
}

#[tokio::test]
async fn memory_uninitialized_store_reports_no_active_migration() {
    uninitialized_store_reports_no_active_migration(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_uninitialized_store_reports_no_active_migration() {
    let (_dir, store) = file_store();
    uninitialized_store_reports_no_active_migration(&store).await;
}

#[tokio::test]
async fn memory_status_updates_touch_only_their_field() {
    status_updates_touch_only_their_field(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_status_updates_touch_only_their_field() {
    let (_dir, store) = file_store();
    status_updates_touch_only_their_field(&store).await;
}

#[tokio::test]
async fn memory_pending_user_config_survives_initialization() {
    pending_user_config_survives_initialization(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_pending_user_config_survives_initialization() {
    let (_dir, store) = file_store();
    pending_user_config_survives_initialization(&store).await;

    let reopened = FileStore::new(store.path());
    assert_eq!(
        reopened.user_config().await.expect("durable").http_proxy,
        "http://proxy:8080"
    );
}

#[tokio::test]
async fn memory_user_config_after_initialization_is_persisted() {
    user_config_after_initialization_is_persisted(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_user_config_after_initialization_is_persisted() {
    let (_dir, store) = file_store();
    user_config_after_initialization_is_persisted(&store).await;
}

#[tokio::test]
async fn memory_getters_return_independent_copies() {
    getters_return_independent_copies(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_getters_return_independent_copies() {
    let (_dir, store) = file_store();
    getters_return_independent_copies(&store).await;
}

#[tokio::test]
async fn memory_progress_is_clamped() {
    progress_is_clamped(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_progress_is_clamped() {
    let (_dir, store) = file_store();
    progress_is_clamped(&store).await;
}

#[tokio::test]
async fn memory_message_and_error_are_recorded() {
    message_and_error_are_recorded(&MemoryStore::new()).await;
}

#[tokio::test]
async fn file_message_and_error_are_recorded() {
    let (_dir, store) = file_store();
    message_and_error_are_recorded(&store).await;
}

#[tokio::test]
async fn file_write_leaves_no_temp_file_and_valid_json() {
    let (_dir, store) = file_store();
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");
    store.set_message("working").await.expect("message");

    assert!(!tmp_path_for(store.path()).exists());
    let raw = std::fs::read_to_string(store.path()).expect("read");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(value["migrationId"], "id1");
    assert_eq!(value["transferMode"], "copy");
    assert_eq!(value["config"]["dataDirectory"], "/opt/ec");
    assert_eq!(value["status"]["state"], "NotStarted");
    assert_eq!(value["status"]["phase"], "Discovery");
    assert_eq!(value["status"]["message"], "working");
    assert!(raw.contains('\n'), "state file should be pretty printed");
}

#[cfg(unix)]
#[tokio::test]
async fn file_is_owner_read_write_only() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, store) = file_store();
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");
    let mode = std::fs::metadata(store.path())
        .expect("metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[cfg(unix)]
#[tokio::test]
async fn stale_temp_file_does_not_leak_its_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, store) = file_store();
    let tmp = tmp_path_for(store.path());
    std::fs::create_dir_all(tmp.parent().expect("parent")).expect("mkdir");
    std::fs::write(&tmp, b"half written").expect("write stale temp");
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).expect("chmod");

    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");

    let mode = std::fs::metadata(store.path())
        .expect("metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
    assert!(!tmp.exists());
    assert_eq!(store.migration_id().await.expect("id"), "id1");
}

#[tokio::test]
async fn malformed_file_is_a_parse_error_not_missing_migration() {
    let (_dir, store) = file_store();
    std::fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
    std::fs::write(store.path(), b"{ not json").expect("write");

    let err = store.status().await.expect_err("parse failure");
    assert!(matches!(err, StoreError::Parse { .. }), "unexpected error: {err}");
    assert!(!err.is_no_active_migration());

    let err = store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect_err("must not overwrite an unreadable record");
    assert!(matches!(err, StoreError::Parse { .. }));
}

#[tokio::test]
async fn pending_user_config_is_not_durable_before_initialization() {
    let (_dir, store) = file_store();
    store
        .set_user_config(InstallationConfig {
            http_proxy: "http://proxy:8080".into(),
            ..Default::default()
        })
        .await
        .expect("pending");
    assert!(!store.path().exists());

    let restarted = FileStore::new(store.path());
    assert_eq!(
        restarted.user_config().await.expect("user config"),
        InstallationConfig::default()
    );
}

#[tokio::test]
async fn concurrent_writers_keep_the_file_consistent() {
    let (_dir, store) = file_store();
    let store = std::sync::Arc::new(store);
    store
        .initialize_migration("id1", TransferMode::Copy, sample_config())
        .await
        .expect("initialize");

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.set_message(&format!("step {i}")).await.expect("message");
            store.set_progress(i).await.expect("progress");
        }));
    }
    for handle in handles {
        handle.await.expect("join");
    }

    let status = store.status().await.expect("status");
    assert!(status.message.starts_with("step "));
    assert!(status.progress < 16);
    assert_eq!(store.migration_id().await.expect("id"), "id1");
    assert!(!tmp_path_for(store.path()).exists());
}
