// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Readiness response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    /// Individual checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// "ok" while serving, "shutting_down" once shutdown has begun.
    pub service: String,
    /// Permission backend connection ("ok" or "disconnected").
    /// Only present when a permission backend is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

/// Simple health check response for liveness checks.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Upper bound on a redial attempted by a readiness check.
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Report the permission backend connection, redialing it if it was lost.
async fn check_permissions(state: &AppState) -> Option<String> {
    let checker = state.issuer.permissions()?;
    let connected = checker.is_connected()
        || tokio::time::timeout(RECONNECT_TIMEOUT, checker.reconnect())
            .await
            .unwrap_or(false);
    let status = if connected { "ok" } else { "disconnected" };
    Some(status.to_string())
}

/// Liveness handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness handler.
///
/// Returns 503 while shutting down or when the permission backend cannot be
/// reached. A lost backend connection is redialed here, so readiness recovers
/// without waiting for a login request.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let shutting_down = state.shutdown.is_cancelled();
    let permissions = check_permissions(&state).await;

    let permissions_ok = permissions.as_deref().map(|s| s == "ok").unwrap_or(true);
    let all_ok = !shutting_down && permissions_ok;

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: if shutting_down { "shutting_down" } else { "ok" }.to_string(),
            permissions,
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
