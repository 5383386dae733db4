// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Startup and shutdown.
//!
//! Every dependency is built before the listener is bound. Any failure here
//! is fatal: the process logs it and exits non-zero instead of serving
//! requests it cannot complete.

use std::{io, path::PathBuf, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::router;
use crate::auth::{GoogleVerifier, SigningKey, SigningKeyError, TokenIssuer};
use crate::config::{Config, ConfigError};
use crate::permissions::{RpcError, RpcPermissionChecker};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot load signing key: {0}")]
    SigningKey(#[from] SigningKeyError),

    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("cannot reach permission backend: {0}")]
    Permissions(#[from] RpcError),

    #[error("public directory {} does not exist", .0.display())]
    PublicDir(PathBuf),

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Build the shared application state from `config`.
pub async fn build_state(
    config: Config,
    shutdown: CancellationToken,
) -> Result<AppState, StartupError> {
    let key = SigningKey::from_pem_file(&config.private_key_path)?;
    info!(path = %config.private_key_path.display(), "Loaded signing key");

    if let Some(dir) = &config.public_dir {
        if !dir.is_dir() {
            return Err(StartupError::PublicDir(dir.clone()));
        }
    }

    let verifier = GoogleVerifier::new(config.tokeninfo_url.clone())?;

    let mut issuer = TokenIssuer::new(key, config.token_ttl);
    if let Some(rpc) = &config.rpc {
        let checker = RpcPermissionChecker::connect(rpc).await?;
        info!(
            addr = %rpc.addr,
            method = %rpc.method,
            codec = %rpc.codec,
            max_attempts = rpc.max_attempts,
            "Permission checks enabled"
        );
        issuer = issuer.with_permissions(Arc::new(checker));
    }

    Ok(AppState::new(
        Arc::new(config),
        Arc::new(verifier),
        issuer,
        shutdown,
    ))
}

/// Serve until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<(), StartupError> {
    let shutdown = CancellationToken::new();
    let (host, port) = (config.host.clone(), config.port);
    let state = build_state(config, shutdown.clone()).await?;
    let app = router(state);

    let bind_error = |source| StartupError::Bind {
        addr: format!("{host}:{port}"),
        source,
    };
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    info!(addr = %local_addr, "JAP server listening (docs at /docs)");

    tokio::spawn(watch_signals(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(StartupError::Serve)?;

    info!("JAP server stopped");
    Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received; cancelling in-flight requests");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::signing::tests::TEST_KEY_PEM;
    use crate::config::{CLIENT_ID_ENV, PRIVATE_KEY_ENV, PUBLIC_DIR_ENV, RPC_ADDR_ENV};
    use std::collections::HashMap;
    use std::io::Write;

    fn key_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEST_KEY_PEM.as_bytes()).unwrap();
        file
    }

    fn config(key_path: &str, extra: &[(&'static str, &str)]) -> Config {
        let mut vars = HashMap::from([(CLIENT_ID_ENV, "cid"), (PRIVATE_KEY_ENV, key_path)]);
        vars.extend(extra.iter().copied());
        Config::from_vars(&vars).unwrap()
    }

    #[tokio::test]
    async fn builds_state_without_permission_backend() {
        let key = key_file();
        let config = config(key.path().to_str().unwrap(), &[]);
        let state = build_state(config, CancellationToken::new()).await.unwrap();
        assert!(state.issuer.permissions().is_none());
    }

    #[tokio::test]
    async fn missing_key_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.pem");
        let config = config(path.to_str().unwrap(), &[]);
        let result = build_state(config, CancellationToken::new()).await;
        assert!(matches!(result, Err(StartupError::SigningKey(_))));
    }

    #[tokio::test]
    async fn key_file_without_rsa_block_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a key").unwrap();
        let config = config(file.path().to_str().unwrap(), &[]);
        let result = build_state(config, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(StartupError::SigningKey(SigningKeyError::NoRsaKey(_)))
        ));
    }

    #[tokio::test]
    async fn missing_public_dir_is_fatal() {
        let key = key_file();
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        let config = config(
            key.path().to_str().unwrap(),
            &[(PUBLIC_DIR_ENV, public.to_str().unwrap())],
        );
        let result = build_state(config, CancellationToken::new()).await;
        assert!(matches!(result, Err(StartupError::PublicDir(_))));
    }

    #[tokio::test]
    async fn unreachable_permission_backend_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let key = key_file();
        let config = config(key.path().to_str().unwrap(), &[(RPC_ADDR_ENV, &addr)]);
        let result = build_state(config, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(StartupError::Permissions(RpcError::Dial { .. }))
        ));
    }
}
