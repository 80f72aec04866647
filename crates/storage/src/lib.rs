//! Durable record of the one migration a node can have in flight.
//!
//! [`MigrationStore`] is the contract the orchestration layer talks to.
//! [`MemoryStore`] keeps the record for the lifetime of the process and
//! [`FileStore`] keeps it in a JSON file that survives restarts. Both behave
//! identically: every getter hands back an owned copy, every status mutator
//! fails with [`StoreError::NoActiveMigration`] until a migration has been
//! initialized, and user configuration may be set before initialization.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{
    InstallationConfig, MigrationPhase, MigrationState, MigrationStatus, TransferMode,
};
use thiserror::Error;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("migration already started")]
    AlreadyStarted,
    #[error("no active migration")]
    NoActiveMigration,
    #[error("failed to parse migration state {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode migration state: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn is_no_active_migration(&self) -> bool {
        matches!(self, Self::NoActiveMigration)
    }

    pub fn is_already_started(&self) -> bool {
        matches!(self, Self::AlreadyStarted)
    }
}

/// Everything persisted about one migration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub migration_id: String,
    pub transfer_mode: TransferMode,
    pub config: InstallationConfig,
    #[serde(default)]
    pub user_config: InstallationConfig,
    pub status: MigrationStatus,
}

impl MigrationRecord {
    pub fn new(
        migration_id: &str,
        transfer_mode: TransferMode,
        config: InstallationConfig,
        user_config: InstallationConfig,
    ) -> Self {
        Self {
            migration_id: migration_id.to_string(),
            transfer_mode,
            config,
            user_config,
            status: MigrationStatus {
                state: MigrationState::NotStarted,
                phase: MigrationPhase::Discovery,
                message: String::new(),
                progress: 0,
                error: String::new(),
            },
        }
    }
}

#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Creates the record. Fails with [`StoreError::AlreadyStarted`] when one
    /// exists; any pending user configuration is folded in.
    async fn initialize_migration(
        &self,
        migration_id: &str,
        transfer_mode: TransferMode,
        config: InstallationConfig,
    ) -> Result<()>;

    async fn migration_id(&self) -> Result<String>;

    async fn transfer_mode(&self) -> Result<TransferMode>;

    /// The resolved configuration the migration runs with.
    async fn config(&self) -> Result<InstallationConfig>;

    /// User supplied configuration, persisted or pending. Empty when the
    /// caller never supplied any.
    async fn user_config(&self) -> Result<InstallationConfig>;

    async fn set_user_config(&self, config: InstallationConfig) -> Result<()>;

    async fn status(&self) -> Result<MigrationStatus>;

    async fn set_state(&self, state: MigrationState) -> Result<()>;

    async fn set_phase(&self, phase: MigrationPhase) -> Result<()>;

    async fn set_message(&self, message: &str) -> Result<()>;

    /// Values above 100 are clamped.
    async fn set_progress(&self, progress: u8) -> Result<()>;

    async fn set_error(&self, error: &str) -> Result<()>;

    /// Full snapshot of the record, for operator tooling.
    async fn record(&self) -> Result<MigrationRecord>;
}

pub(crate) fn clamp_progress(progress: u8) -> u8 {
    progress.min(100)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
