// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::Request, http::StatusCode, routing::get, Router};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

pub mod health;
pub mod login;

pub fn router(state: AppState) -> Router {
    let public_dir = state.config.public_dir.clone();
    let max_conns = state.config.max_conns;

    let app = Router::new()
        .route(
            "/googlelogin",
            get(login::google_login).post(login::google_login),
        )
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()));

    let app = match public_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app.fallback(not_found),
    };

    let app = app
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            let request_id = req
                .headers()
                .get(login::REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!(
                "http",
                method = %req.method(),
                uri = %req.uri(),
                request_id = %request_id,
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive());

    match max_conns {
        Some(limit) => app.layer(GlobalConcurrencyLimitLayer::new(limit)),
        None => app,
    }
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 page not found")
}

#[derive(OpenApi)]
#[openapi(
    paths(
        login::google_login,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            login::TokenLoginForm,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks
        )
    ),
    tags(
        (name = "Login", description = "Google ID token exchange"),
        (name = "Health", description = "Liveness and readiness checks")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, IdentityVerifier, TokenIssuer, UpstreamClaims};
    use crate::auth::signing::tests::test_key;
    use crate::config::{Config, CLIENT_ID_ENV, PRIVATE_KEY_ENV, PUBLIC_DIR_ENV};
    use crate::context::RequestContext;
    use async_trait::async_trait;
    use crate::config::RpcConfig;
    use crate::permissions::{PermissionChecker, RpcPermissionChecker, RpcResponse, ServerCodec, WireCodec};
    use axum::{
        body::{to_bytes, Body},
        http::{self, header},
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;
    use std::{collections::HashMap, sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    /// Accepts every token as a@b.com.
    struct AcceptAll;

    #[async_trait]
    impl IdentityVerifier for AcceptAll {
        async fn verify(
            &self,
            ctx: &RequestContext,
            raw_token: &str,
        ) -> Result<UpstreamClaims, AuthError> {
            if raw_token.is_empty() {
                return Err(AuthError::MissingToken);
            }
            Ok(UpstreamClaims {
                audience: ctx.client_id().to_string(),
                email: "a@b.com".to_string(),
                email_verified: true,
                hosted_domain: String::new(),
                locale: None,
            })
        }
    }

    fn state_with(extra: &[(&'static str, &str)]) -> AppState {
        state_with_issuer(extra, TokenIssuer::new(test_key(), Duration::from_secs(300)))
    }

    fn state_with_issuer(extra: &[(&'static str, &str)], issuer: TokenIssuer) -> AppState {
        let mut vars = HashMap::from([(CLIENT_ID_ENV, "cid"), (PRIVATE_KEY_ENV, "unused.pem")]);
        vars.extend(extra.iter().copied());
        let config = Config::from_vars(&vars).unwrap();
        AppState::new(
            Arc::new(config),
            Arc::new(AcceptAll),
            issuer,
            CancellationToken::new(),
        )
    }

    async fn get_path(app: Router, uri: &str) -> (StatusCode, http::HeaderMap, String) {
        send(app, http::Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(
        app: Router,
        request: http::Request<Body>,
    ) -> (StatusCode, http::HeaderMap, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn liveness_is_ok() {
        let (status, _, body) = get_path(router(state_with(&[])), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn readiness_fails_once_shutdown_begins() {
        let state = state_with(&[]);
        let (status, _, body) = get_path(router(state.clone()), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("permissions"));

        state.shutdown.cancel();
        let (status, _, body) = get_path(router(state), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("shutting_down"));
    }

    #[tokio::test]
    async fn login_over_get_returns_token_and_request_id() {
        let (status, headers, body) =
            get_path(router(state_with(&[])), "/googlelogin?id_token=abc&room=r1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.split('.').count(), 3);
        assert!(headers.contains_key(login::REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn unknown_path_is_plain_404_without_public_dir() {
        let (status, _, body) = get_path(router(state_with(&[])), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "404 page not found");
    }

    #[tokio::test]
    async fn public_dir_is_served_at_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("login.js"), "console.log('hi');").unwrap();
        let path = dir.path().to_str().unwrap().to_string();

        let app = router(state_with(&[(PUBLIC_DIR_ENV, &path)]));
        let (status, _, body) = get_path(app, "/login.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log('hi');");
    }

    #[tokio::test]
    async fn openapi_document_lists_login_for_get_and_post() {
        let (status, _, body) = get_path(router(state_with(&[])), "/api-doc/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        let login = &doc["paths"]["/googlelogin"];
        assert!(login.get("get").is_some());
        assert!(login.get("post").is_some());
    }

    #[tokio::test]
    async fn post_without_content_type_is_missing_token() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/googlelogin")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(router(state_with(&[])), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "id_token login param missing");
    }

    #[tokio::test]
    async fn post_reads_token_from_query_string() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/googlelogin?id_token=abc")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(router(state_with(&[])), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.split('.').count(), 3);
    }

    #[tokio::test]
    async fn post_body_token_is_used_with_form_content_type() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/googlelogin?room=r1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("id_token=abc"))
            .unwrap();
        let (status, _, body) = send(router(state_with(&[])), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.split('.').count(), 3);
    }

    #[tokio::test]
    async fn readiness_recovers_after_backend_connection_loss() {
        // The first connection is dropped after one request; later ones answer.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut first = true;
            while let Ok((socket, _)) = listener.accept().await {
                let mut framed = Framed::new(socket, ServerCodec::new(WireCodec::Binary));
                while let Some(Ok(request)) = framed.next().await {
                    if first {
                        first = false;
                        break;
                    }
                    framed.send(RpcResponse::ok(request.id, true)).await.unwrap();
                }
            }
        });

        let rpc = RpcConfig {
            addr,
            method: "Permissions.Check".to_string(),
            codec: WireCodec::Binary,
            max_attempts: 1,
        };
        let checker = Arc::new(RpcPermissionChecker::connect(&rpc).await.unwrap());
        assert!(checker.check("a.b.c").await.is_err());
        assert!(!checker.is_connected());

        let issuer = TokenIssuer::new(test_key(), Duration::from_secs(300))
            .with_permissions(checker.clone());
        let app = router(state_with_issuer(&[], issuer));
        let (status, _, body) = get_path(app, "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#""permissions":"ok""#));
        assert!(checker.is_connected());
    }

    #[tokio::test]
    async fn router_builds_with_connection_cap() {
        let app = router(state_with(&[(crate::config::MAX_CONNS_ENV, "4")]));
        let (status, _, _) = get_path(app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }
}
