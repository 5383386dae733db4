// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-request context threaded through the issuance pipeline.
//!
//! A [`RequestContext`] carries everything a pipeline stage needs to know
//! about the request it serves: the deadline, a cancellation signal tied to
//! server shutdown, the client ID tokens must be issued for, and the tracing
//! span that acts as the request's diagnostic sink.

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::config::ClientId;

#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    client_id: ClientId,
    deadline: Instant,
    cancel: CancellationToken,
    span: Span,
}

impl RequestContext {
    /// Create a context that expires `timeout` from now.
    ///
    /// `cancel` is normally a child of the server's shutdown token.
    pub fn new(
        request_id: impl Into<String>,
        client_id: ClientId,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let request_id = request_id.into();
        let span = tracing::info_span!(
            "login",
            request_id = %request_id,
            client_id = %client_id,
        );
        Self {
            request_id,
            client_id,
            deadline: Instant::now() + timeout,
            cancel,
            span,
        }
    }

    /// Context with a random request id and no shutdown link. Used by tests
    /// and tooling that drive the pipeline directly.
    pub fn detached(client_id: ClientId, timeout: Duration) -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            client_id,
            timeout,
            CancellationToken::new(),
        )
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Cancel the request. Pending and future [`run`](Self::run) calls fail
    /// with [`AuthError::Canceled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast if the request is already cancelled or past its deadline.
    pub fn ensure_live(&self) -> Result<(), AuthError> {
        if self.cancel.is_cancelled() {
            return Err(AuthError::Canceled);
        }
        if Instant::now() >= self.deadline {
            return Err(AuthError::Timeout);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the request is cancelled or its
    /// deadline passes first. The future is dropped in either case.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, AuthError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AuthError::Canceled),
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.map_err(|_| AuthError::Timeout)
            }
        }
    }

    /// Record a pipeline milestone.
    pub fn trace(&self, message: &str) {
        tracing::debug!(parent: &self.span, "{message}");
    }

    /// Record a failure that is about to be returned to the caller.
    pub fn record_error(&self, err: &AuthError) {
        tracing::warn!(
            parent: &self.span,
            error_code = err.error_code(),
            status = err.status_code().as_u16(),
            "{err}"
        );
    }
}
