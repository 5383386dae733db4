// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AssertionClaims, AuthError, SignedAssertion};
use crate::context::RequestContext;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Login form, accepted in the query string, a URL-encoded body, or both.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenLoginForm {
    /// Google ID token obtained by the client
    #[serde(default)]
    pub id_token: String,
    /// Conference room to carry into the assertion
    #[serde(default)]
    pub room: Option<String>,
}

impl TokenLoginForm {
    /// Fill fields missing from the body with those from the query string.
    /// Body values win when both are present.
    fn or_query(self, query: TokenLoginForm) -> Self {
        Self {
            id_token: if self.id_token.is_empty() {
                query.id_token
            } else {
                self.id_token
            },
            room: self.room.filter(|r| !r.is_empty()).or(query.room),
        }
    }
}

/// Exchange a Google ID token for a signed assertion.
///
/// The response body is the bare compact JWS on success and a short
/// plain-text reason otherwise.
#[utoipa::path(
    method(get, post),
    path = "/googlelogin",
    tag = "Login",
    request_body(content = TokenLoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Signed assertion", body = String, content_type = "text/plain"),
        (status = 400, description = "id_token missing", body = String),
        (status = 401, description = "Permission backend refused the assertion", body = String),
        (status = 408, description = "Request deadline exceeded", body = String),
        (status = 500, description = "Upstream response rejected or signing failed", body = String),
        (status = 502, description = "Identity provider unreachable", body = String),
        (status = 503, description = "Server shutting down", body = String)
    )
)]
pub async fn google_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<TokenLoginForm>, QueryRejection>,
    body: Result<Form<TokenLoginForm>, FormRejection>,
) -> Response {
    // Unreadable query strings and bodies count as empty ones.
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let form = match body {
        Ok(Form(body)) => body.or_query(query),
        Err(_) => query,
    };

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = RequestContext::new(
        request_id,
        state.config.client_id.clone(),
        state.config.request_timeout,
        state.shutdown.child_token(),
    );

    match login(&state, &ctx, &form).await {
        Ok(token) => {
            ctx.trace("Issued assertion");
            token.into_string().into_response()
        }
        Err(e) => {
            ctx.record_error(&e);
            e.into_response()
        }
    }
}

/// Run the whole pipeline for one request.
pub async fn login(
    state: &AppState,
    ctx: &RequestContext,
    form: &TokenLoginForm,
) -> Result<SignedAssertion, AuthError> {
    let upstream = state.verifier.verify(ctx, &form.id_token).await?;
    ctx.ensure_live()?;

    let claims = AssertionClaims::for_identity(
        &upstream,
        form.room.as_deref(),
        chrono::Utc::now().timestamp(),
        state.issuer.ttl(),
    );
    state.issuer.issue(ctx, claims).await
}
