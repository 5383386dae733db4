// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login pipeline errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Every way a login request can fail after the request has been accepted.
///
/// The `Display` text is what the caller receives. Upstream details are kept
/// in the variant payloads for logging and are never sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The `id_token` form field was empty or absent
    #[error("id_token login param missing")]
    MissingToken,
    /// The request deadline passed while waiting on an outbound call
    #[error("The deadline was exceeded")]
    Timeout,
    /// The server began shutting down while the request was in flight
    #[error("The server is shutting down")]
    Canceled,
    /// The identity provider could not be reached
    #[error("Upstream request failed")]
    UpstreamUnreachable(String),
    /// The identity provider answered with something we could not accept
    #[error("Error decoding upstream response")]
    UpstreamInvalid(String),
    /// The permission backend refused the assertion or could not be asked
    #[error("Permission check failed")]
    PermissionDenied,
    /// Serializing or signing the assertion failed
    #[error("Error encoding JWS")]
    Signing(String),
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::Timeout => "timeout",
            AuthError::Canceled => "canceled",
            AuthError::UpstreamUnreachable(_) => "upstream_unreachable",
            AuthError::UpstreamInvalid(_) => "upstream_invalid",
            AuthError::PermissionDenied => "permission_denied",
            AuthError::Signing(_) => "signing_failed",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingToken => StatusCode::BAD_REQUEST,
            AuthError::PermissionDenied => StatusCode::UNAUTHORIZED,
            AuthError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AuthError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            AuthError::Canceled => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::UpstreamInvalid(_) | AuthError::Signing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Detail for logs. Empty for variants without one.
    pub fn detail(&self) -> &str {
        match self {
            AuthError::UpstreamUnreachable(d)
            | AuthError::UpstreamInvalid(d)
            | AuthError::Signing(d) => d,
            _ => "",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
