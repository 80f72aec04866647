use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use shared::{
    domain::{InstallationConfig, MigrationPhase, MigrationState, MigrationStatus},
    error::{ApiError, ErrorCode},
    protocol::InstallationConfigResponse,
};
use storage::{MigrationStore, StoreError};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::manager::{ManagerError, MigrationManager};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Pause before the first state change of a run, so the response that
    /// carries a new migration id reaches the caller before status moves.
    pub start_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_millis(100),
        }
    }
}

/// Why a run stopped. The display text is what ends up in the persisted
/// `error` field.
#[derive(Debug, Error)]
enum RunError {
    #[error("get migration status: {0}")]
    Status(StoreError),
    #[error("set migration state: {0}")]
    State(StoreError),
    #[error("set migration phase {0}: {1}")]
    Phase(MigrationPhase, StoreError),
    #[error("execute phase {0}: {1}")]
    Execute(MigrationPhase, ManagerError),
    #[error("migration panicked: {0}")]
    Panic(String),
}

/// Bridges request/response callers to the long-running migration task.
///
/// Holds no migration state of its own; everything lives in the store.
#[derive(Clone)]
pub struct MigrationController {
    manager: Arc<dyn MigrationManager>,
    store: Arc<dyn MigrationStore>,
    config: ControllerConfig,
    start_lock: Arc<Mutex<()>>,
    /// Held for the whole phase walk; phases never run in parallel.
    run_lock: Arc<Mutex<()>>,
}

impl MigrationController {
    pub fn new(
        manager: Arc<dyn MigrationManager>,
        store: Arc<dyn MigrationStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            manager,
            store,
            config,
            start_lock: Arc::new(Mutex::new(())),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Source values, installer defaults and the merged result, computed
    /// fresh on every call. Works before any migration exists.
    pub async fn installation_config(&self) -> Result<InstallationConfigResponse, ApiError> {
        let values = self
            .manager
            .source_config()
            .await
            .map_err(|e| internal("get source config", e))?;
        let defaults = self
            .manager
            .installer_defaults()
            .await
            .map_err(|e| internal("get installer defaults", e))?;
        let user = self
            .store
            .user_config()
            .await
            .map_err(|e| internal("get user config", e))?;
        let resolved = self.manager.merge_configs(&user, &values, &defaults);
        Ok(InstallationConfigResponse {
            values,
            defaults,
            resolved,
        })
    }

    /// Validates, persists and launches a migration, returning its id without
    /// waiting for any phase to run.
    pub async fn start_migration(
        &self,
        transfer_mode: &str,
        user_config: InstallationConfig,
    ) -> Result<String, ApiError> {
        let transfer_mode = self
            .manager
            .validate_transfer_mode(transfer_mode)
            .map_err(|e| ApiError::validation(e.to_string()))?;

        let _start = self.start_lock.lock().await;
        match self.store.migration_id().await {
            Ok(existing) => {
                warn!(migration_id = %existing, "rejecting start: migration already active");
                return Err(ApiError::conflict(format!(
                    "migration already started: {existing}"
                )));
            }
            Err(err) if err.is_no_active_migration() => {}
            Err(err) => return Err(internal("check for existing migration", err)),
        }

        let migration_id = Uuid::new_v4().to_string();
        let source = self
            .manager
            .source_config()
            .await
            .map_err(|e| internal("get source config", e))?;
        let defaults = self
            .manager
            .installer_defaults()
            .await
            .map_err(|e| internal("get installer defaults", e))?;
        let resolved = self.manager.merge_configs(&user_config, &source, &defaults);

        self.store
            .set_user_config(user_config)
            .await
            .map_err(|e| internal("store user config", e))?;
        self.store
            .initialize_migration(&migration_id, transfer_mode, resolved)
            .await
            .map_err(|e| {
                if e.is_already_started() {
                    ApiError::conflict(e.to_string())
                } else {
                    internal("initialize migration", e)
                }
            })?;

        info!(%migration_id, %transfer_mode, "migration initialized");
        self.spawn_run(&migration_id);
        Ok(migration_id)
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus, ApiError> {
        self.store.status().await.map_err(|e| {
            if e.is_no_active_migration() {
                ApiError::not_found(e.to_string())
            } else {
                internal("get migration status", e)
            }
        })
    }

    /// Relaunches a migration a previous process left unfinished. Failed and
    /// completed migrations are left alone.
    pub async fn resume_interrupted(&self) -> Result<Option<JoinHandle<()>>, ApiError> {
        let status = match self.store.status().await {
            Ok(status) => status,
            Err(e) if e.is_no_active_migration() => return Ok(None),
            Err(e) => return Err(internal("get migration status", e)),
        };
        if !matches!(
            status.state,
            MigrationState::NotStarted | MigrationState::InProgress
        ) {
            return Ok(None);
        }

        let migration_id = self
            .store
            .migration_id()
            .await
            .map_err(|e| internal("get migration id", e))?;
        info!(
            %migration_id,
            state = %status.state,
            phase = %status.phase,
            "resuming interrupted migration"
        );
        Ok(Some(self.spawn_run(&migration_id)))
    }

    /// Detaches [`run`](Self::run) from the caller. The task keeps the
    /// caller's span as parent but is not cancelled with the caller's future.
    fn spawn_run(&self, migration_id: &str) -> JoinHandle<()> {
        let controller = self.clone();
        let span = info_span!("migration", migration_id = %migration_id);
        tokio::spawn(
            async move {
                // failures are already recorded in the store by run()
                if let Err(err) = controller.run().await {
                    if err.code == ErrorCode::Conflict {
                        warn!(error = %err.message, "skipping migration run");
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Walks every phase in order, recording progress in the store. Safe to
    /// call on its own to pick up a persisted migration after a restart.
    ///
    /// Returns a conflict without touching the store while another run on
    /// this controller is still walking the phases.
    pub async fn run(&self) -> Result<(), ApiError> {
        let Ok(_running) = self.run_lock.try_lock() else {
            return Err(ApiError::conflict("migration run already in progress"));
        };

        if !self.config.start_delay.is_zero() {
            tokio::time::sleep(self.config.start_delay).await;
        }
        self.clear_previous_outcome().await;

        let outcome = AssertUnwindSafe(self.run_phases())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RunError::Panic(panic_message(&*panic))));

        match outcome {
            Ok(()) => {
                // the phases decide success; a lost final write is only logged
                if let Err(error) = self.store.set_state(MigrationState::Completed).await {
                    error!(%error, "failed to record completed migration state");
                }
                info!("migration completed");
                Ok(())
            }
            Err(err) => {
                self.record_failure(&err).await;
                Err(ApiError::internal(err.to_string()))
            }
        }
    }

    async fn run_phases(&self) -> Result<(), RunError> {
        let status = self.store.status().await.map_err(RunError::Status)?;
        if status.state == MigrationState::InProgress {
            // TODO: continue from status.phase instead of restarting at Discovery.
            info!(
                phase = %status.phase,
                "resuming in-progress migration from the first phase"
            );
        }

        for phase in MigrationPhase::RUNNABLE {
            self.store
                .set_state(MigrationState::InProgress)
                .await
                .map_err(RunError::State)?;
            self.store
                .set_phase(phase)
                .await
                .map_err(|e| RunError::Phase(phase, e))?;
            self.manager
                .execute_phase(phase)
                .await
                .map_err(|e| RunError::Execute(phase, e))?;
        }
        Ok(())
    }

    /// A retry starts from a clean slate; `error` stays empty unless this
    /// run fails.
    async fn clear_previous_outcome(&self) {
        if let Err(error) = self.store.set_error("").await {
            warn!(%error, "failed to clear previous migration error");
        }
        if let Err(error) = self.store.set_message("").await {
            warn!(%error, "failed to clear previous migration message");
        }
    }

    async fn record_failure(&self, err: &RunError) {
        error!(error = %err, "migration failed");
        if let Err(error) = self.store.set_state(MigrationState::Failed).await {
            error!(%error, "failed to record failed migration state");
        }
        if let Err(error) = self.store.set_error(&err.to_string()).await {
            error!(%error, "failed to record migration error");
        }
    }
}

fn internal(context: &str, err: impl std::fmt::Display) -> ApiError {
    ApiError::internal(format!("{context}: {err}"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
