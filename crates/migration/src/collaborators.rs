//! Capabilities the migration engine consumes but does not implement itself,
//! plus the concrete versions the server binary wires in.

use std::{
    io,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use shared::domain::{InstallationConfig, MigrationPhase, TransferMode};
use storage::MigrationStore;
use tokio::process::Command;
use tracing::{debug, info};

/// Reads whatever configuration the running legacy installation exposes.
#[async_trait]
pub trait SourceInspector: Send + Sync {
    /// An all-empty config means nothing was discovered, which is not an error.
    async fn inspect(&self) -> anyhow::Result<InstallationConfig>;
}

/// Supplies the embedded distribution's own defaults.
#[async_trait]
pub trait InstallationDefaults: Send + Sync {
    async fn defaults(&self) -> anyhow::Result<InstallationConfig>;
}

/// Performs the real work of one phase. Returns once the phase has fully
/// succeeded or fully failed.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, ctx: &PhaseContext) -> anyhow::Result<()>;
}

/// Everything a phase needs to know about the migration it belongs to.
pub struct PhaseContext {
    pub migration_id: String,
    pub phase: MigrationPhase,
    pub transfer_mode: TransferMode,
    pub config: InstallationConfig,
    pub reporter: PhaseReporter,
}

/// Lets a running phase publish progress text and percentage.
#[derive(Clone)]
pub struct PhaseReporter {
    store: Arc<dyn MigrationStore>,
}

impl PhaseReporter {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        Self { store }
    }

    pub async fn message(&self, message: &str) -> anyhow::Result<()> {
        self.store
            .set_message(message)
            .await
            .context("failed to record migration message")
    }

    pub async fn progress(&self, percent: u8) -> anyhow::Result<()> {
        self.store
            .set_progress(percent)
            .await
            .context("failed to record migration progress")
    }
}

#[derive(Debug, Clone)]
pub struct StaticDefaults {
    pub admin_console_port: u16,
    pub local_artifact_mirror_port: u16,
    pub data_directory: String,
    pub global_cidr: String,
}

impl Default for StaticDefaults {
    fn default() -> Self {
        Self {
            admin_console_port: 30000,
            local_artifact_mirror_port: 50000,
            data_directory: "/var/lib/embedded-cluster".into(),
            global_cidr: "10.244.0.0/16".into(),
        }
    }
}

#[async_trait]
impl InstallationDefaults for StaticDefaults {
    async fn defaults(&self) -> anyhow::Result<InstallationConfig> {
        let (pod_cidr, service_cidr) = split_cidr(&self.global_cidr)
            .with_context(|| format!("invalid global CIDR {:?}", self.global_cidr))?;
        Ok(InstallationConfig {
            admin_console_port: self.admin_console_port,
            local_artifact_mirror_port: self.local_artifact_mirror_port,
            data_directory: self.data_directory.clone(),
            global_cidr: self.global_cidr.clone(),
            pod_cidr,
            service_cidr,
            ..Default::default()
        })
    }
}

/// Splits an IPv4 range into its lower half (pods) and upper half (services).
pub(crate) fn split_cidr(cidr: &str) -> anyhow::Result<(String, String)> {
    let Some((addr, prefix)) = cidr.trim().split_once('/') else {
        bail!("missing prefix length");
    };
    let addr: Ipv4Addr = addr.parse().context("invalid network address")?;
    let prefix: u32 = prefix.parse().context("invalid prefix length")?;
    if prefix >= 32 {
        bail!("prefix length {prefix} leaves no room to split");
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let base = u32::from(addr) & mask;
    let half = 1u32 << (32 - prefix - 1);
    let child = prefix + 1;
    Ok((
        format!("{}/{child}", Ipv4Addr::from(base)),
        format!("{}/{child}", Ipv4Addr::from(base + half)),
    ))
}

/// Reads an exported JSON description of the legacy installation.
#[derive(Debug, Clone)]
pub struct FileSourceInspector {
    path: PathBuf,
}

impl FileSourceInspector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceInspector for FileSourceInspector {
    async fn inspect(&self) -> anyhow::Result<InstallationConfig> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no source installation export found");
                return Ok(InstallationConfig::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read source export {}", self.path.display())
                })
            }
        };
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse source export {}", self.path.display()))
    }
}

/// Runs `<hooks_dir>/<phase>` (kebab-case phase name) for every phase.
///
/// The hook gets the migration id, phase, transfer mode and resolved config
/// as `MIGRATION_*` environment variables. A missing hook or a non-zero exit
/// fails the phase.
#[derive(Debug, Clone)]
pub struct HookPhaseExecutor {
    hooks_dir: PathBuf,
}

impl HookPhaseExecutor {
    pub fn new(hooks_dir: impl Into<PathBuf>) -> Self {
        Self {
            hooks_dir: hooks_dir.into(),
        }
    }

    pub fn hook_path(&self, phase: MigrationPhase) -> PathBuf {
        self.hooks_dir.join(phase.kebab_name())
    }
}

#[async_trait]
impl PhaseExecutor for HookPhaseExecutor {
    async fn execute(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        let hook = self.hook_path(ctx.phase);
        if !is_file(&hook).await {
            bail!("no hook installed for phase {} at {}", ctx.phase, hook.display());
        }

        let config = serde_json::to_string(&ctx.config).context("failed to encode config")?;
        ctx.reporter
            .message(&format!("running {} hook", ctx.phase))
            .await?;
        info!(hook = %hook.display(), phase = %ctx.phase, "running phase hook");

        let output = Command::new(&hook)
            .env("MIGRATION_ID", &ctx.migration_id)
            .env("MIGRATION_PHASE", ctx.phase.as_str())
            .env("MIGRATION_TRANSFER_MODE", ctx.transfer_mode.as_str())
            .env("MIGRATION_CONFIG", config)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to spawn hook {}", hook.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                bail!("hook {} exited with {}", hook.display(), output.status);
            }
            bail!("hook {} exited with {}: {stderr}", hook.display(), output.status);
        }
        Ok(())
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "tests/collaborators_tests.rs"]
mod tests;
