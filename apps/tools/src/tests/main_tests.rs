use super::*;

use clap::Parser;

#[test]
fn resume_accepts_failed_migrations() {
    ensure_resumable(MigrationState::Failed, false).expect("failed is resumable");
}

#[test]
fn resume_refuses_completed_even_with_force() {
    let err = ensure_resumable(MigrationState::Completed, true).expect_err("completed");
    assert!(err.to_string().contains("already completed"));
}

#[test]
fn resume_refuses_possibly_active_migrations_without_force() {
    for state in [MigrationState::NotStarted, MigrationState::InProgress] {
        let err = ensure_resumable(state, false).expect_err("active");
        assert!(err.to_string().contains("--force"), "{err}");
        ensure_resumable(state, true).expect("forced");
    }
}

#[test]
fn resume_force_flag_parses() {
    let cli = Cli::try_parse_from(["tools", "--data-dir", "/srv/ec", "resume", "--force"])
        .expect("parse");
    assert_eq!(cli.data_dir, PathBuf::from("/srv/ec"));
    assert!(matches!(cli.command, Command::Resume { force: true, .. }));
}
