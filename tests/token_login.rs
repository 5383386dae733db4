// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! End-to-end login scenarios against a stubbed identity provider and
//! permission backend.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use futures_util::{SinkExt, StreamExt};
use jap_server::{
    api::router,
    auth::{GoogleVerifier, SigningKey, TokenIssuer},
    config::{
        Config, CLIENT_ID_ENV, PRIVATE_KEY_ENV, REQUEST_TIMEOUT_ENV, TOKENINFO_URL_ENV,
    },
    permissions::{
        PermissionChecker, RpcError, RpcPermissionChecker, RpcResponse, ServerCodec, WireCodec,
    },
    state::AppState,
};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::{codec::Framed, sync::CancellationToken};
use tower::ServiceExt;

const CLIENT_ID: &str = "cid.apps.googleusercontent.com";
const TEST_KEY_PEM: &str = include_str!("fixtures/test_key.pem");

fn config(tokeninfo_url: &str, timeout_secs: &str) -> Config {
    let vars = HashMap::from([
        (CLIENT_ID_ENV, CLIENT_ID),
        (PRIVATE_KEY_ENV, "tests/fixtures/test_key.pem"),
        (TOKENINFO_URL_ENV, tokeninfo_url),
        (REQUEST_TIMEOUT_ENV, timeout_secs),
    ]);
    Config::from_vars(&vars).unwrap()
}

fn state(config: Config, checker: Option<Arc<dyn PermissionChecker>>) -> AppState {
    let key = SigningKey::from_pem(TEST_KEY_PEM.as_bytes(), "fixture").unwrap();
    let mut issuer = TokenIssuer::new(key, config.token_ttl);
    if let Some(checker) = checker {
        issuer = issuer.with_permissions(checker);
    }
    let verifier = GoogleVerifier::new(config.tokeninfo_url.clone()).unwrap();
    AppState::new(
        Arc::new(config),
        Arc::new(verifier),
        issuer,
        CancellationToken::new(),
    )
}

async fn tokeninfo_mock(server: &mut ServerGuard, status: usize, body: &str) -> Mock {
    server
        .mock("POST", "/tokeninfo")
        .match_body(Matcher::UrlEncoded("id_token".into(), "valid".into()))
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(1)
        .create_async()
        .await
}

fn valid_tokeninfo() -> String {
    format!(
        r#"{{"aud":"{CLIENT_ID}","email":"a@b.com","email_verified":"true","hd":"","locale":"en"}}"#
    )
}

async fn post_login(app: Router, form: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/googlelogin")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn payload(token: &str) -> Value {
    let segment = token.split('.').nth(1).unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
}

struct Refuse;

#[async_trait]
impl PermissionChecker for Refuse {
    async fn check(&self, _token: &str) -> Result<bool, RpcError> {
        Ok(false)
    }
}

#[tokio::test]
async fn valid_token_is_exchanged_for_assertion() {
    let mut server = mockito::Server::new_async().await;
    let mock = tokeninfo_mock(&mut server, 200, &valid_tokeninfo()).await;
    let app = router(state(config(&format!("{}/tokeninfo", server.url()), "10"), None));

    let (status, body) = post_login(app, "id_token=valid&room=standup").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.split('.').count(), 3);
    let claims = payload(&body);
    assert_eq!(claims["iss"], "a@b.com");
    assert_eq!(claims["scope"], "login");
    assert_eq!(claims["room"], "standup");
    assert_eq!(claims["locale"], "en");
    assert!(claims.get("domain").is_none());
    assert_eq!(
        claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
        300
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn empty_token_is_rejected_without_upstream_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/tokeninfo")
        .expect(0)
        .create_async()
        .await;
    let app = router(state(config(&format!("{}/tokeninfo", server.url()), "10"), None));

    let (status, body) = post_login(app, "id_token=").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("id_token login param missing"));
    mock.assert_async().await;
}

#[tokio::test]
async fn provider_outage_is_bad_gateway() {
    let mut server = mockito::Server::new_async().await;
    let mock = tokeninfo_mock(&mut server, 503, "").await;
    let app = router(state(config(&format!("{}/tokeninfo", server.url()), "10"), None));

    let (status, _) = post_login(app, "id_token=valid").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    mock.assert_async().await;
}

#[tokio::test]
async fn provider_rejection_is_internal_error_without_detail() {
    let mut server = mockito::Server::new_async().await;
    let mock = tokeninfo_mock(&mut server, 400, r#"{"error":"invalid_token"}"#).await;
    let app = router(state(config(&format!("{}/tokeninfo", server.url()), "10"), None));

    let (status, body) = post_login(app, "id_token=valid").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.contains("invalid_token"));
    mock.assert_async().await;
}

#[tokio::test]
async fn slow_provider_is_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    let app = router(state(config(&format!("http://{addr}/tokeninfo"), "1"), None));

    let (status, body) = post_login(app, "id_token=valid").await;

    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body, "The deadline was exceeded");
}

#[tokio::test]
async fn refused_permission_is_unauthorized_and_hides_token() {
    let mut server = mockito::Server::new_async().await;
    let _mock = tokeninfo_mock(&mut server, 200, &valid_tokeninfo()).await;
    let app = router(state(
        config(&format!("{}/tokeninfo", server.url()), "10"),
        Some(Arc::new(Refuse)),
    ));

    let (status, body) = post_login(app, "id_token=valid").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "Permission check failed");
    assert!(!body.contains('.'));
}

#[tokio::test]
async fn shutdown_fails_in_flight_logins() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/tokeninfo")
        .expect(0)
        .create_async()
        .await;
    let state = state(config(&format!("{}/tokeninfo", server.url()), "10"), None);
    state.shutdown.cancel();

    let (status, _) = post_login(router(state), "id_token=valid").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    mock.assert_async().await;
}

#[tokio::test]
async fn permission_backend_reconnects_and_grants() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = listener.local_addr().unwrap().to_string();
    let requests = Arc::new(AtomicU32::new(0));
    let counter = requests.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let mut framed = Framed::new(socket, ServerCodec::new(WireCodec::Binary));
            while let Some(Ok(request)) = framed.next().await {
                // Hang up on the first two calls.
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    break;
                }
                let granted = request.params[0].split('.').count() == 3;
                framed
                    .send(RpcResponse::ok(request.id, granted))
                    .await
                    .unwrap();
            }
        }
    });

    let rpc = jap_server::config::RpcConfig {
        addr: backend_addr,
        method: "Permissions.Check".to_string(),
        codec: WireCodec::Binary,
        max_attempts: 3,
    };
    let checker = RpcPermissionChecker::connect(&rpc).await.unwrap();

    let mut server = mockito::Server::new_async().await;
    let _mock = tokeninfo_mock(&mut server, 200, &valid_tokeninfo()).await;
    let app = router(state(
        config(&format!("{}/tokeninfo", server.url()), "10"),
        Some(Arc::new(checker)),
    ));

    let (status, body) = post_login(app, "id_token=valid").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload(&body)["iss"], "a@b.com");
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}
