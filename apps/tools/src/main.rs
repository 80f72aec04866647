use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use migration::{
    ControllerConfig, DefaultMigrationManager, FileSourceInspector, HookPhaseExecutor,
    ManagerComponents, MigrationController, StaticDefaults,
};
use shared::domain::MigrationState;
use storage::{FileStore, MigrationStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Installation data directory holding `migration/state.json`.
    #[arg(long, default_value = "/var/lib/embedded-cluster")]
    data_dir: PathBuf,
    /// Overrides the state file location derived from `--data-dir`.
    #[arg(long)]
    state_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the persisted migration status.
    Status,
    /// Print the full persisted record as JSON.
    Show,
    /// Re-run the phase loop in the foreground for a failed migration.
    Resume {
        #[arg(long)]
        hooks_dir: Option<PathBuf>,
        #[arg(long)]
        source_config: Option<PathBuf>,
        /// Also resume a migration that looks active. Only safe when no
        /// server is driving it.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let migration_dir = cli.data_dir.join("migration");
    let state_file = cli
        .state_file
        .clone()
        .unwrap_or_else(|| migration_dir.join("state.json"));
    let store = Arc::new(FileStore::new(&state_file));

    match cli.command {
        Command::Status => {
            let status = store
                .status()
                .await
                .with_context(|| format!("read {}", state_file.display()))?;
            println!(
                "state={} phase={} progress={}%",
                status.state, status.phase, status.progress
            );
            if !status.message.is_empty() {
                println!("message: {}", status.message);
            }
            if !status.error.is_empty() {
                println!("error: {}", status.error);
            }
        }
        Command::Show => {
            let record = store
                .record()
                .await
                .with_context(|| format!("read {}", state_file.display()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Resume {
            hooks_dir,
            source_config,
            force,
        } => {
            let status = store
                .status()
                .await
                .with_context(|| format!("read {}", state_file.display()))?;
            ensure_resumable(status.state, force)?;

            let store: Arc<dyn MigrationStore> = store;
            let manager = DefaultMigrationManager::new(ManagerComponents {
                store: store.clone(),
                inspector: Arc::new(FileSourceInspector::new(
                    source_config.unwrap_or_else(|| migration_dir.join("source.json")),
                )),
                defaults: Arc::new(StaticDefaults {
                    data_directory: cli.data_dir.to_string_lossy().into_owned(),
                    ..Default::default()
                }),
                executor: Arc::new(HookPhaseExecutor::new(
                    hooks_dir.unwrap_or_else(|| migration_dir.join("hooks")),
                )),
            });
            let controller = MigrationController::new(
                Arc::new(manager),
                store,
                ControllerConfig {
                    start_delay: Default::default(),
                },
            );

            match controller.run().await {
                Ok(()) => println!("migration completed"),
                Err(err) => bail!("migration failed: {}", err.message),
            }
        }
    }

    Ok(())
}

/// The server resumes `NotStarted` and `InProgress` records itself, so a
/// second runner from here would fire the same hooks concurrently.
fn ensure_resumable(state: MigrationState, force: bool) -> Result<()> {
    match state {
        MigrationState::Completed => bail!("migration already completed; nothing to resume"),
        MigrationState::Failed => Ok(()),
        MigrationState::NotStarted | MigrationState::InProgress if force => Ok(()),
        MigrationState::NotStarted | MigrationState::InProgress => bail!(
            "migration is {state} and may be driven by the server; \
             stop the server or pass --force"
        ),
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
