use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use migration::StaticDefaults;
use tracing::warn;

const STATE_FILE: &str = "state.json";
const MIGRATION_DIR: &str = "migration";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    /// Installation data directory; the migration state lives underneath it.
    pub data_dir: PathBuf,
    pub source_config_path: Option<PathBuf>,
    pub phase_hooks_dir: Option<PathBuf>,
    pub start_delay_ms: u64,
    pub admin_console_port: u16,
    pub local_artifact_mirror_port: u16,
    pub global_cidr: String,
}

impl Default for Settings {
    fn default() -> Self {
        let defaults = StaticDefaults::default();
        Self {
            server_bind: "127.0.0.1:30080".into(),
            data_dir: PathBuf::from(defaults.data_directory),
            source_config_path: None,
            phase_hooks_dir: None,
            start_delay_ms: 100,
            admin_console_port: defaults.admin_console_port,
            local_artifact_mirror_port: defaults.local_artifact_mirror_port,
            global_cidr: defaults.global_cidr,
        }
    }
}

impl Settings {
    pub fn migration_dir(&self) -> PathBuf {
        self.data_dir.join(MIGRATION_DIR)
    }

    pub fn state_path(&self) -> PathBuf {
        self.migration_dir().join(STATE_FILE)
    }

    pub fn source_config_path(&self) -> PathBuf {
        self.source_config_path
            .clone()
            .unwrap_or_else(|| self.migration_dir().join("source.json"))
    }

    pub fn phase_hooks_dir(&self) -> PathBuf {
        self.phase_hooks_dir
            .clone()
            .unwrap_or_else(|| self.migration_dir().join("hooks"))
    }

    pub fn installer_defaults(&self) -> StaticDefaults {
        StaticDefaults {
            admin_console_port: self.admin_console_port,
            local_artifact_mirror_port: self.local_artifact_mirror_port,
            data_directory: self.data_dir.to_string_lossy().into_owned(),
            global_cidr: self.global_cidr.clone(),
        }
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new("server.toml"), |key| std::env::var(key).ok())
}

/// Built-in defaults, then the flat `server.toml` table, then environment
/// variables. `APP__*` names win over the older unprefixed ones.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => {
                for (key, value) in file_cfg {
                    let value = match value {
                        toml::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    apply(&mut settings, &key, value);
                }
            }
            Err(error) => warn!(path = %path.display(), %error, "ignoring unreadable settings file"),
        }
    }

    let overrides = [
        ("SERVER_BIND", "bind_addr"),
        ("APP__BIND_ADDR", "bind_addr"),
        ("DATA_DIR", "data_dir"),
        ("APP__DATA_DIR", "data_dir"),
        ("APP__SOURCE_CONFIG_PATH", "source_config_path"),
        ("APP__PHASE_HOOKS_DIR", "phase_hooks_dir"),
        ("APP__START_DELAY_MS", "start_delay_ms"),
        ("APP__ADMIN_CONSOLE_PORT", "admin_console_port"),
        ("APP__LOCAL_ARTIFACT_MIRROR_PORT", "local_artifact_mirror_port"),
        ("APP__GLOBAL_CIDR", "global_cidr"),
    ];
    for (var, key) in overrides {
        if let Some(value) = env(var) {
            apply(&mut settings, key, value);
        }
    }

    settings
}

fn apply(settings: &mut Settings, key: &str, value: String) {
    match key {
        "bind_addr" => settings.server_bind = value,
        "data_dir" => settings.data_dir = PathBuf::from(value),
        "source_config_path" => settings.source_config_path = Some(PathBuf::from(value)),
        "phase_hooks_dir" => settings.phase_hooks_dir = Some(PathBuf::from(value)),
        "start_delay_ms" => parse_into(&mut settings.start_delay_ms, key, &value),
        "admin_console_port" => parse_into(&mut settings.admin_console_port, key, &value),
        "local_artifact_mirror_port" => {
            parse_into(&mut settings.local_artifact_mirror_port, key, &value)
        }
        "global_cidr" => settings.global_cidr = value,
        other => warn!(key = other, "ignoring unknown setting"),
    }
}

fn parse_into<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value, "ignoring unparsable setting"),
    }
}

/// Returns the state file path, creating its directory.
pub fn prepare_state_path(settings: &Settings) -> anyhow::Result<PathBuf> {
    let state_path = settings.state_path();
    let Some(parent) = state_path.parent() else {
        return Ok(state_path);
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create migration state directory '{}'",
            parent.display()
        )
    })?;

    Ok(state_path)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
