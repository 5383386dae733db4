// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{IdentityVerifier, TokenIssuer};
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub issuer: Arc<TokenIssuer>,
    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        verifier: Arc<dyn IdentityVerifier>,
        issuer: TokenIssuer,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            verifier,
            issuer: Arc::new(issuer),
            shutdown,
        }
    }
}
