use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use shared::domain::{
    InstallationConfig, MigrationPhase, MigrationState, MigrationStatus, TransferMode,
};
use tokio::{fs, io::AsyncWriteExt, sync::RwLock};

use crate::{clamp_progress, MigrationRecord, MigrationStore, Result, StoreError};

#[cfg(unix)]
const STATE_FILE_MODE: u32 = 0o600;

#[derive(Debug, Default)]
struct FileState {
    /// User configuration set before the record exists. Only in memory: it
    /// is written with the record on initialization and lost on restart.
    pending_user_config: Option<InstallationConfig>,
}

/// Store backed by a single JSON document.
///
/// Every write serializes the full record to `<path>.tmp` and renames it over
/// `path`, so readers only ever see a complete file. One lock covers each
/// read-modify-write cycle against disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    tmp_path: PathBuf,
    state: RwLock<FileState>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tmp_path = tmp_path_for(&path);
        Self {
            path,
            tmp_path,
            state: RwLock::new(FileState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_record(&self) -> Result<Option<MigrationRecord>> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error("read", &self.path, source)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    async fn load(&self) -> Result<MigrationRecord> {
        self.read_record()
            .await?
            .ok_or(StoreError::NoActiveMigration)
    }

    async fn write_record(&self, record: &MigrationRecord) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(record).map_err(StoreError::Encode)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error("create directory", parent, source))?;
        }

        if let Err(err) = self.write_tmp(&encoded).await {
            let _ = fs::remove_file(&self.tmp_path).await;
            return Err(err);
        }

        if let Err(source) = fs::rename(&self.tmp_path, &self.path).await {
            let _ = fs::remove_file(&self.tmp_path).await;
            return Err(io_error("replace", &self.path, source));
        }
        Ok(())
    }

    async fn write_tmp(&self, encoded: &[u8]) -> Result<()> {
        // a stale temp file from a crash would keep its old permissions
        match fs::remove_file(&self.tmp_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(io_error("remove stale", &self.tmp_path, source)),
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(STATE_FILE_MODE);

        let mut file = options
            .open(&self.tmp_path)
            .await
            .map_err(|source| io_error("create", &self.tmp_path, source))?;
        file.write_all(encoded)
            .await
            .map_err(|source| io_error("write", &self.tmp_path, source))?;
        file.sync_all()
            .await
            .map_err(|source| io_error("sync", &self.tmp_path, source))?;
        Ok(())
    }

    async fn read<T>(&self, f: impl FnOnce(MigrationRecord) -> T) -> Result<T> {
        let _guard = self.state.read().await;
        self.load().await.map(f)
    }

    async fn mutate(&self, f: impl FnOnce(&mut MigrationRecord)) -> Result<()> {
        let _guard = self.state.write().await;
        let mut record = self.load().await?;
        f(&mut record);
        self.write_record(&record).await
    }
}

#[async_trait]
impl MigrationStore for FileStore {
    async fn initialize_migration(
        &self,
        migration_id: &str,
        transfer_mode: TransferMode,
        config: InstallationConfig,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if self.read_record().await?.is_some() {
            return Err(StoreError::AlreadyStarted);
        }

        let user_config = state.pending_user_config.clone().unwrap_or_default();
        let record = MigrationRecord::new(migration_id, transfer_mode, config, user_config);
        self.write_record(&record).await?;
        state.pending_user_config = None;
        Ok(())
    }

    async fn migration_id(&self) -> Result<String> {
        self.read(|record| record.migration_id).await
    }

    async fn transfer_mode(&self) -> Result<TransferMode> {
        self.read(|record| record.transfer_mode).await
    }

    async fn config(&self) -> Result<InstallationConfig> {
        self.read(|record| record.config).await
    }

    async fn user_config(&self) -> Result<InstallationConfig> {
        let state = self.state.read().await;
        Ok(match self.read_record().await? {
            Some(record) => record.user_config,
            None => state.pending_user_config.clone().unwrap_or_default(),
        })
    }

    async fn set_user_config(&self, config: InstallationConfig) -> Result<()> {
        let mut state = self.state.write().await;
        match self.read_record().await? {
            Some(mut record) => {
                record.user_config = config;
                self.write_record(&record).await
            }
            None => {
                state.pending_user_config = Some(config);
                Ok(())
            }
        }
    }

    async fn status(&self) -> Result<MigrationStatus> {
        self.read(|record| record.status).await
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
        self.read(|record| record).await
    }
}

pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state.json"));
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_error(action: &'static str, path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}
