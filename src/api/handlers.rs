//! Handlers for the management API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::response::{ApiError, Messages};
use crate::healthcheck::{
    CheckBundle, CheckConfig, CheckResult, CommandCheckConfig, DnsCheckConfig, HttpCheckConfig,
    Source, TcpCheckConfig, TlsCheckConfig,
};
use crate::memorystore::MemoryStore;
use crate::metrics::Metrics;
use crate::registry::{execute_with_deadline, Registry};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<Metrics>,
}

/// Install a check with `source=api`, or, for a one-off descriptor, run it
/// once synchronously and answer with the single result.
async fn install_or_run(state: &AppState, mut config: CheckConfig) -> Result<Response, ApiError> {
    config.base_mut().source = Source::Api;
    config.validate()?;
    if config.base().one_off {
        let timeout = config.base().timeout;
        let mut check = config.build();
        check.initialize().await?;
        let start = tokio::time::Instant::now();
        let outcome = execute_with_deadline(&check, timeout).await;
        let result = CheckResult::from_attempt(&check, &outcome, start.elapsed());
        return Ok((StatusCode::CREATED, Json(result)).into_response());
    }
    let name = config.name().to_string();
    state.registry.add(config.build()).await?;
    Ok((
        StatusCode::CREATED,
        Json(Messages::one(format!("healthcheck {} added", name))),
    )
        .into_response())
}

pub async fn add_dns_check(
    State(state): State<AppState>,
    Json(config): Json<DnsCheckConfig>,
) -> Result<Response, ApiError> {
    install_or_run(&state, CheckConfig::Dns(config)).await
}

pub async fn add_tcp_check(
    State(state): State<AppState>,
    Json(config): Json<TcpCheckConfig>,
) -> Result<Response, ApiError> {
    install_or_run(&state, CheckConfig::Tcp(config)).await
}

pub async fn add_tls_check(
    State(state): State<AppState>,
    Json(config): Json<TlsCheckConfig>,
) -> Result<Response, ApiError> {
    install_or_run(&state, CheckConfig::Tls(config)).await
}

pub async fn add_http_check(
    State(state): State<AppState>,
    Json(config): Json<HttpCheckConfig>,
) -> Result<Response, ApiError> {
    install_or_run(&state, CheckConfig::Http(config)).await
}

pub async fn add_command_check(
    State(state): State<AppState>,
    Json(config): Json<CommandCheckConfig>,
) -> Result<Response, ApiError> {
    install_or_run(&state, CheckConfig::Command(config)).await
}

/// Install a batch of checks. The whole payload is validated first; one-off
/// descriptors are rejected.
pub async fn add_bulk_checks(
    State(state): State<AppState>,
    Json(bundle): Json<CheckBundle>,
) -> Result<Response, ApiError> {
    if bundle.has_one_off() {
        return Err(ApiError::bad_request(
            "one-off healthchecks are not supported in bulk payloads",
        ));
    }
    let mut configs = bundle.into_configs();
    for config in &mut configs {
        config.base_mut().source = Source::Api;
        config.validate()?;
    }
    let count = configs.len();
    for config in configs {
        state.registry.add(config.build()).await?;
    }
    Ok((
        StatusCode::CREATED,
        Json(Messages::one(format!("{} healthchecks added", count))),
    )
        .into_response())
}

pub async fn list_checks(State(state): State<AppState>) -> Json<Vec<CheckConfig>> {
    Json(state.registry.list().await)
}

pub async fn get_check(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CheckConfig>, ApiError> {
    state
        .registry
        .get(&name)
        .await
        .map(Json)
        .ok_or_else(ApiError::not_found)
}

/// Idempotent: deleting an absent check still answers 200.
pub async fn delete_check(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<Messages> {
    state.registry.remove(&name).await;
    Json(Messages::one(format!(
        "successfully deleted healthcheck {}",
        name
    )))
}

pub async fn list_results(State(state): State<AppState>) -> Json<Vec<CheckResult>> {
    Json(state.store.list().await)
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CheckResult>, ApiError> {
    state
        .store
        .get(&name)
        .await
        .map(Json)
        .ok_or_else(ApiError::not_found)
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn not_found() -> ApiError {
    ApiError::not_found()
}

pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state
        .metrics
        .export()
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
