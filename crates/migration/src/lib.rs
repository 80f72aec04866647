//! Orchestration of a legacy installation's move onto the embedded
//! distribution.
//!
//! [`manager`] holds the business rules (configuration precedence, transfer
//! mode validation, single phase execution). [`controller`] drives the phase
//! state machine in a background task and answers status queries.

pub mod collaborators;
pub mod controller;
pub mod manager;

pub use collaborators::{
    FileSourceInspector, HookPhaseExecutor, InstallationDefaults, PhaseContext, PhaseExecutor,
    PhaseReporter, SourceInspector, StaticDefaults,
};
pub use controller::{ControllerConfig, MigrationController};
pub use manager::{
    merge_configs, DefaultMigrationManager, ManagerComponents, ManagerError, MigrationManager,
};
