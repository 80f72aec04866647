use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Copy,
    Move,
}

impl TransferMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transfer mode {0:?}: must be 'copy' or 'move'")]
pub struct InvalidTransferMode(pub String);

impl FromStr for TransferMode {
    type Err = InvalidTransferMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            other => Err(InvalidTransferMode(other.to_string())),
        }
    }
}

/// Coarse lifecycle of a migration attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "NotStarted",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Fine-grained progress marker, ordered the way phases execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MigrationPhase {
    #[default]
    Discovery,
    Preparation,
    InstallTarget,
    DataTransfer,
    Completed,
}

impl MigrationPhase {
    /// Phases that do work, in execution order. `Completed` is only a marker.
    pub const RUNNABLE: [MigrationPhase; 4] = [
        MigrationPhase::Discovery,
        MigrationPhase::Preparation,
        MigrationPhase::InstallTarget,
        MigrationPhase::DataTransfer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "Discovery",
            Self::Preparation => "Preparation",
            Self::InstallTarget => "InstallTarget",
            Self::DataTransfer => "DataTransfer",
            Self::Completed => "Completed",
        }
    }

    pub fn kebab_name(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Preparation => "preparation",
            Self::InstallTarget => "install-target",
            Self::DataTransfer => "data-transfer",
            Self::Completed => "completed",
        }
    }

    /// Overall progress once this phase has finished.
    pub fn completion_percent(self) -> u8 {
        match self {
            Self::Discovery => 25,
            Self::Preparation => 50,
            Self::InstallTarget => 75,
            Self::DataTransfer | Self::Completed => 100,
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installation settings for the target distribution. Empty strings and zero
/// ports mean "not set" and lose against any lower-precedence layer that has
/// a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallationConfig {
    #[serde(skip_serializing_if = "is_zero")]
    pub admin_console_port: u16,
    #[serde(skip_serializing_if = "is_zero")]
    pub local_artifact_mirror_port: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub data_directory: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http_proxy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub https_proxy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub no_proxy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network_interface: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pod_cidr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_cidr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub global_cidr: String,
}

impl InstallationConfig {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationStatus {
    pub state: MigrationState,
    pub phase: MigrationPhase,
    pub message: String,
    pub progress: u8,
    pub error: String,
}
