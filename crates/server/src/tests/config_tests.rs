use super::{load_settings_from, prepare_state_path, Settings};

use std::{collections::HashMap, fs, path::PathBuf};

fn no_env(_: &str) -> Option<String> {
    None
}

fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn missing_file_and_env_yield_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings_from(&dir.path().join("server.toml"), no_env);

    assert_eq!(settings.server_bind, "127.0.0.1:30080");
    assert_eq!(settings.data_dir, PathBuf::from("/var/lib/embedded-cluster"));
    assert_eq!(settings.start_delay_ms, 100);
    assert_eq!(settings.admin_console_port, 30000);
    assert_eq!(settings.local_artifact_mirror_port, 50000);
    assert_eq!(settings.global_cidr, "10.244.0.0/16");
    assert_eq!(
        settings.state_path(),
        PathBuf::from("/var/lib/embedded-cluster/migration/state.json")
    );
}

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(
        &path,
        r#"
bind_addr = "0.0.0.0:9000"
data_dir = "/opt/ec"
start_delay_ms = 0
admin_console_port = "31000"
global_cidr = "172.16.0.0/16"
"#,
    )
    .expect("write settings");

    let settings = load_settings_from(&path, no_env);
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.data_dir, PathBuf::from("/opt/ec"));
    assert_eq!(settings.start_delay_ms, 0);
    assert_eq!(settings.admin_console_port, 31000);
    assert_eq!(settings.global_cidr, "172.16.0.0/16");

    let defaults = settings.installer_defaults();
    assert_eq!(defaults.data_directory, "/opt/ec");
    assert_eq!(defaults.admin_console_port, 31000);
}

#[test]
fn prefixed_env_wins_over_legacy_names_and_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(&path, "bind_addr = \"0.0.0.0:9000\"\n").expect("write settings");

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("SERVER_BIND", "0.0.0.0:9100"),
            ("APP__BIND_ADDR", "0.0.0.0:9200"),
            ("DATA_DIR", "/legacy"),
            ("APP__LOCAL_ARTIFACT_MIRROR_PORT", "51000"),
        ]),
    );
    assert_eq!(settings.server_bind, "0.0.0.0:9200");
    assert_eq!(settings.data_dir, PathBuf::from("/legacy"));
    assert_eq!(settings.local_artifact_mirror_port, 51000);
}

#[test]
fn unparsable_values_keep_the_previous_layer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(&path, "admin_console_port = 31000\n").expect("write settings");

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("APP__ADMIN_CONSOLE_PORT", "not-a-port"),
            ("APP__START_DELAY_MS", "-5"),
        ]),
    );
    assert_eq!(settings.admin_console_port, 31000);
    assert_eq!(settings.start_delay_ms, 100);
}

#[test]
fn malformed_file_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(&path, "this is = = not toml").expect("write settings");

    let settings = load_settings_from(&path, no_env);
    assert_eq!(settings.server_bind, "127.0.0.1:30080");
}

#[test]
fn derived_paths_follow_data_dir_unless_set() {
    let settings = Settings {
        data_dir: PathBuf::from("/srv/ec"),
        ..Default::default()
    };
    assert_eq!(
        settings.source_config_path(),
        PathBuf::from("/srv/ec/migration/source.json")
    );
    assert_eq!(
        settings.phase_hooks_dir(),
        PathBuf::from("/srv/ec/migration/hooks")
    );

    let settings = load_settings_from(
        &PathBuf::from("/nonexistent/server.toml"),
        env_from(&[
            ("APP__DATA_DIR", "/srv/ec"),
            ("APP__SOURCE_CONFIG_PATH", "/etc/legacy/export.json"),
            ("APP__PHASE_HOOKS_DIR", "/usr/libexec/migration"),
        ]),
    );
    assert_eq!(
        settings.source_config_path(),
        PathBuf::from("/etc/legacy/export.json")
    );
    assert_eq!(
        settings.phase_hooks_dir(),
        PathBuf::from("/usr/libexec/migration")
    );
}

#[test]
fn prepare_state_path_creates_the_migration_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings {
        data_dir: dir.path().join("nested").join("data"),
        ..Default::default()
    };

    let state_path = prepare_state_path(&settings).expect("prepare state path");
    assert_eq!(
        state_path,
        dir.path()
            .join("nested")
            .join("data")
            .join("migration")
            .join("state.json")
    );
    assert!(state_path.parent().expect("parent").is_dir());
    assert!(!state_path.exists());
}
