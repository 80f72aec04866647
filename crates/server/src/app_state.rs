use std::{sync::Arc, time::Duration};

use migration::{
    ControllerConfig, DefaultMigrationManager, FileSourceInspector, HookPhaseExecutor,
    ManagerComponents, MigrationController,
};
use storage::{FileStore, MigrationStore};

use crate::config::{prepare_state_path, Settings};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) controller: MigrationController,
}

impl AppState {
    /// Wires the file-backed store, the source inspector and the hook runner
    /// together from `settings`.
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let state_path = prepare_state_path(settings)?;
        let store: Arc<dyn MigrationStore> = Arc::new(FileStore::new(state_path));
        let manager = DefaultMigrationManager::new(ManagerComponents {
            store: store.clone(),
            inspector: Arc::new(FileSourceInspector::new(settings.source_config_path())),
            defaults: Arc::new(settings.installer_defaults()),
            executor: Arc::new(HookPhaseExecutor::new(settings.phase_hooks_dir())),
        });
        let controller = MigrationController::new(
            Arc::new(manager),
            store,
            ControllerConfig {
                start_delay: Duration::from_millis(settings.start_delay_ms),
            },
        );
        Ok(Self { controller })
    }
}
