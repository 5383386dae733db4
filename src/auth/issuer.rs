// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing and authorizing login assertions.

use std::{fmt, sync::Arc, time::Duration};

use tracing::warn;

use super::claims::AssertionClaims;
use super::error::AuthError;
use super::signing::SigningKey;
use crate::context::RequestContext;
use crate::permissions::PermissionChecker;

/// A signed compact JWS, handed to the caller verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedAssertion(String);

impl SignedAssertion {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignedAssertion(..)")
    }
}

/// Signs assertions and, when a permission backend is configured, asks it
/// to approve each one before release.
pub struct TokenIssuer {
    key: SigningKey,
    ttl: Duration,
    permissions: Option<Arc<dyn PermissionChecker>>,
}

impl TokenIssuer {
    pub fn new(key: SigningKey, ttl: Duration) -> Self {
        Self {
            key,
            ttl,
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(checker);
        self
    }

    /// Lifetime stamped on new assertions.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn permissions(&self) -> Option<&Arc<dyn PermissionChecker>> {
        self.permissions.as_ref()
    }

    /// Sign `claims` and, if configured, have the permission backend approve
    /// the signed token.
    ///
    /// The token is only returned when every check passed.
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        claims: AssertionClaims,
    ) -> Result<SignedAssertion, AuthError> {
        ctx.ensure_live()?;

        let token = self
            .key
            .sign(&claims)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        ctx.trace("Signed assertion");

        let Some(checker) = &self.permissions else {
            return Ok(SignedAssertion(token));
        };

        ctx.trace("Checking permissions");
        match ctx.run(checker.check(&token)).await? {
            Ok(true) => {
                ctx.trace("Permission granted");
                Ok(SignedAssertion(token))
            }
            Ok(false) => {
                warn!(
                    parent: ctx.span(),
                    iss = %claims.iss,
                    "Permission backend refused assertion"
                );
                Err(AuthError::PermissionDenied)
            }
            Err(e) => {
                warn!(parent: ctx.span(), error = %e, "Permission check failed");
                Err(AuthError::PermissionDenied)
            }
        }
    }
}
