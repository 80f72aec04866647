use serde::{Deserialize, Serialize};

use crate::domain::InstallationConfig;

/// Configuration layers shown to an operator before starting a migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationConfigResponse {
    /// Values discovered on the source installation.
    pub values: InstallationConfig,
    pub defaults: InstallationConfig,
    pub resolved: InstallationConfig,
}

/// `transferMode` stays a raw string so an unknown value is reported as an
/// invalid transfer mode rather than a body parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMigrationRequest {
    #[serde(default)]
    pub transfer_mode: String,
    #[serde(default)]
    pub config: InstallationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMigrationResponse {
    pub migration_id: String,
    pub message: String,
}
