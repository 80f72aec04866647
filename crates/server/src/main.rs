use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::MigrationStatus,
    error::{ApiError, ErrorCode},
    protocol::{InstallationConfigResponse, StartMigrationRequest, StartMigrationResponse},
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::load_settings;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let state = AppState::from_settings(&settings).map_err(|error| {
        error!(
            data_dir = %settings.data_dir.display(),
            %error,
            "failed to prepare migration state directory; verify permissions"
        );
        error
    })?;

    if state.controller.resume_interrupted().await?.is_some() {
        info!("interrupted migration relaunched");
    }

    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.server_bind))?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/migration/config", get(http_installation_config))
        .route("/api/migration/start", post(http_start_migration))
        .route("/api/migration/status", get(http_migration_status))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_installation_config(
    State(state): State<Arc<AppState>>,
) -> ApiResult<InstallationConfigResponse> {
    state
        .controller
        .installation_config()
        .await
        .map(Json)
        .map_err(error_response)
}

async fn http_start_migration(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StartMigrationRequest>, JsonRejection>,
) -> ApiResult<StartMigrationResponse> {
    let Json(req) = body.map_err(|rejection| {
        error_response(ApiError::validation(format!(
            "invalid request body: {}",
            rejection.body_text()
        )))
    })?;

    let migration_id = state
        .controller
        .start_migration(&req.transfer_mode, req.config)
        .await
        .map_err(error_response)?;

    Ok(Json(StartMigrationResponse {
        migration_id,
        message: "migration started successfully".to_string(),
    }))
}

async fn http_migration_status(State(state): State<Arc<AppState>>) -> ApiResult<MigrationStatus> {
    state
        .controller
        .migration_status()
        .await
        .map(Json)
        .map_err(error_response)
}

fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => {
            error!(message = %err.message, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
