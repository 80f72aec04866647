use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{InstallationConfig, InvalidTransferMode, MigrationPhase, TransferMode};
use storage::{MigrationStore, StoreError};
use thiserror::Error;
use tracing::info;

use crate::collaborators::{
    InstallationDefaults, PhaseContext, PhaseExecutor, PhaseReporter, SourceInspector,
};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    InvalidTransferMode(#[from] InvalidTransferMode),
    #[error("inspect source installation: {0:#}")]
    SourceConfig(anyhow::Error),
    #[error("load installer defaults: {0:#}")]
    Defaults(anyhow::Error),
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        source: StoreError,
    },
    #[error("{0:#}")]
    Phase(anyhow::Error),
}

impl ManagerError {
    fn store(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { context, source }
    }
}

#[async_trait]
pub trait MigrationManager: Send + Sync {
    async fn source_config(&self) -> Result<InstallationConfig, ManagerError>;

    async fn installer_defaults(&self) -> Result<InstallationConfig, ManagerError>;

    fn merge_configs(
        &self,
        user: &InstallationConfig,
        source: &InstallationConfig,
        defaults: &InstallationConfig,
    ) -> InstallationConfig {
        merge_configs(user, source, defaults)
    }

    fn validate_transfer_mode(&self, mode: &str) -> Result<TransferMode, ManagerError> {
        Ok(mode.parse()?)
    }

    /// Runs one phase to completion or failure.
    async fn execute_phase(&self, phase: MigrationPhase) -> Result<(), ManagerError>;
}

/// Field-wise merge with precedence user > source > defaults. Empty strings
/// and zero ports never override a lower layer.
pub fn merge_configs(
    user: &InstallationConfig,
    source: &InstallationConfig,
    defaults: &InstallationConfig,
) -> InstallationConfig {
    let mut merged = defaults.clone();
    overlay(&mut merged, source);
    overlay(&mut merged, user);
    merged
}

fn overlay(base: &mut InstallationConfig, layer: &InstallationConfig) {
    overlay_port(&mut base.admin_console_port, layer.admin_console_port);
    overlay_port(
        &mut base.local_artifact_mirror_port,
        layer.local_artifact_mirror_port,
    );
    overlay_str(&mut base.data_directory, &layer.data_directory);
    overlay_str(&mut base.http_proxy, &layer.http_proxy);
    overlay_str(&mut base.https_proxy, &layer.https_proxy);
    overlay_str(&mut base.no_proxy, &layer.no_proxy);
    overlay_str(&mut base.network_interface, &layer.network_interface);
    overlay_str(&mut base.pod_cidr, &layer.pod_cidr);
    overlay_str(&mut base.service_cidr, &layer.service_cidr);
    overlay_str(&mut base.global_cidr, &layer.global_cidr);
}

fn overlay_port(base: &mut u16, value: u16) {
    if value != 0 {
        *base = value;
    }
}

fn overlay_str(base: &mut String, value: &str) {
    if !value.is_empty() {
        *base = value.to_string();
    }
}

/// Collaborators a [`DefaultMigrationManager`] is assembled from.
pub struct ManagerComponents {
    pub store: Arc<dyn MigrationStore>,
    pub inspector: Arc<dyn SourceInspector>,
    pub defaults: Arc<dyn InstallationDefaults>,
    pub executor: Arc<dyn PhaseExecutor>,
}

pub struct DefaultMigrationManager {
    store: Arc<dyn MigrationStore>,
    inspector: Arc<dyn SourceInspector>,
    defaults: Arc<dyn InstallationDefaults>,
    executor: Arc<dyn PhaseExecutor>,
}

impl DefaultMigrationManager {
    pub fn new(components: ManagerComponents) -> Self {
        let ManagerComponents {
            store,
            inspector,
            defaults,
            executor,
        } = components;
        Self {
            store,
            inspector,
            defaults,
            executor,
        }
    }
}

#[async_trait]
impl MigrationManager for DefaultMigrationManager {
    async fn source_config(&self) -> Result<InstallationConfig, ManagerError> {
        self.inspector
            .inspect()
            .await
            .map_err(ManagerError::SourceConfig)
    }

    async fn installer_defaults(&self) -> Result<InstallationConfig, ManagerError> {
        self.defaults
            .defaults()
            .await
            .map_err(ManagerError::Defaults)
    }

    async fn execute_phase(&self, phase: MigrationPhase) -> Result<(), ManagerError> {
        let migration_id = self
            .store
            .migration_id()
            .await
            .map_err(ManagerError::store("get migration id"))?;
        let transfer_mode = self
            .store
            .transfer_mode()
            .await
            .map_err(ManagerError::store("get transfer mode"))?;
        let config = self
            .store
            .config()
            .await
            .map_err(ManagerError::store("get migration config"))?;

        self.store
            .set_message(&format!("{phase} phase in progress"))
            .await
            .map_err(ManagerError::store("set migration message"))?;

        info!(%migration_id, %phase, %transfer_mode, "executing migration phase");
        let ctx = PhaseContext {
            migration_id,
            phase,
            transfer_mode,
            config,
            reporter: PhaseReporter::new(self.store.clone()),
        };
        self.executor
            .execute(&ctx)
            .await
            .map_err(ManagerError::Phase)?;

        self.store
            .set_progress(phase.completion_percent())
            .await
            .map_err(ManagerError::store("set migration progress"))?;
        info!(migration_id = %ctx.migration_id, %phase, "migration phase finished");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/manager_tests.rs"]
mod tests;
