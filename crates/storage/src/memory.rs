use async_trait::async_trait;
use shared::domain::{
    InstallationConfig, MigrationPhase, MigrationState, MigrationStatus, TransferMode,
};
use tokio::sync::RwLock;

use crate::{clamp_progress, MigrationRecord, MigrationStore, Result, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    record: Option<MigrationRecord>,
    pending_user_config: Option<InstallationConfig>,
}

/// Process-lifetime store, mostly for tests and throwaway orchestration.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read<T>(&self, f: impl FnOnce(&MigrationRecord) -> T) -> Result<T> {
        let state = self.state.read().await;
        state
            .record
            .as_ref()
            .map(f)
            .ok_or(StoreError::NoActiveMigration)
    }

    async fn mutate(&self, f: impl FnOnce(&mut MigrationRecord)) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .record
            .as_mut()
            .ok_or(StoreError::NoActiveMigration)?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn initialize_migration(
        &self,
        migration_id: &str,
        transfer_mode: TransferMode,
        config: InstallationConfig,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.record.is_some() {
            return Err(StoreError::AlreadyStarted);
        }
        let user_config = state.pending_user_config.take().unwrap_or_default();
        state.record = Some(MigrationRecord::new(
            migration_id,
            transfer_mode,
            config,
            user_config,
        ));
        Ok(())
    }

    async fn migration_id(&self) -> Result<String> {
        self.read(|record| record.migration_id.clone()).await
    }

    async fn transfer_mode(&self) -> Result<TransferMode> {
        self.read(|record| record.transfer_mode).await
    }

    async fn config(&self) -> Result<InstallationConfig> {
        self.read(|record| record.config.clone()).await
    }

    async fn user_config(&self) -> Result<InstallationConfig> {
        let state = self.state.read().await;
        Ok(match &state.record {
            Some(record) => record.user_config.clone(),
            None => state.pending_user_config.clone().unwrap_or_default(),
        })
    }

    async fn set_user_config(&self, config: InstallationConfig) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        match state.record.as_mut() {
            Some(record) => record.user_config = config,
            None => state.pending_user_config = Some(config),
        }
        Ok(())
    }

    async fn status(&self) -> Result<MigrationStatus> {
        self.read(|record| record.status.clone()).await
    }

    async fn set_state(&self, state: MigrationState) -> Result<()> {
        self.mutate(|record| record.status.state = state).await
    }

    async fn set_phase(&self, phase: MigrationPhase) -> Result<()> {
        self.mutate(|record| record.status.phase = phase).await
    }

    async fn set_message(&self, message: &str) -> Result<()> {
        self.mutate(|record| record.status.message = message.to_string())
            .await
    }

    async fn set_progress(&self, progress: u8) -> Result<()> {
        self.mutate(|record| record.status.progress = clamp_progress(progress))
            .await
    }

    async fn set_error(&self, error: &str) -> Result<()> {
        self.mutate(|record| record.status.error = error.to_string())
            .await
    }

    async fn record(&self) -> Result<MigrationRecord> {
        self.read(MigrationRecord::clone).await
    }
}
