// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Google ID token verification via the tokeninfo endpoint.
//!
//! The raw token is posted to Google, which validates the signature and
//! expiry and answers with the token's claims. We then check that the token
//! was minted for our client ID and that it identifies someone: either a
//! verified email address or a G Suite hosted domain.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::error::AuthError;
use crate::config::ClientId;
use crate::context::RequestContext;

/// Validates an opaque upstream token and returns the identity it asserts.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(
        &self,
        ctx: &RequestContext,
        raw_token: &str,
    ) -> Result<UpstreamClaims, AuthError>;
}

/// Claims returned by the identity provider for a single token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamClaims {
    pub audience: String,
    pub email: String,
    pub email_verified: bool,
    /// Empty when the account is not part of a hosted domain.
    pub hosted_domain: String,
    pub locale: Option<String>,
}

impl UpstreamClaims {
    /// Whether the claims name a usable identity.
    pub fn identifies_user(&self) -> bool {
        (!self.email.is_empty() && self.email_verified) || !self.hosted_domain.is_empty()
    }

    /// Reject tokens minted for another client or naming no one.
    pub fn validate(&self, client_id: &ClientId) -> Result<(), AuthError> {
        if self.audience != client_id.as_str() {
            return Err(AuthError::UpstreamInvalid(format!(
                "token audience {:?} does not match client id",
                self.audience
            )));
        }
        if !self.identifies_user() {
            return Err(AuthError::UpstreamInvalid(
                "token carries neither a verified email nor a hosted domain".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wire format of the tokeninfo response. Google encodes `email_verified`
/// as a string.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    aud: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: String,
    #[serde(default)]
    hd: String,
    #[serde(default)]
    locale: String,
}

impl From<TokenInfo> for UpstreamClaims {
    fn from(info: TokenInfo) -> Self {
        Self {
            audience: info.aud,
            email: info.email,
            email_verified: info.email_verified == "true",
            hosted_domain: info.hd,
            locale: Some(info.locale).filter(|l| !l.is_empty()),
        }
    }
}

/// [`IdentityVerifier`] backed by Google's tokeninfo endpoint.
///
/// Makes exactly one upstream call per verification; nothing is cached or
/// retried.
#[derive(Debug, Clone)]
pub struct GoogleVerifier {
    tokeninfo_url: String,
    http: Client,
}

impl GoogleVerifier {
    pub fn new(tokeninfo_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            tokeninfo_url: tokeninfo_url.into(),
            http: Client::builder().build()?,
        })
    }

    pub fn tokeninfo_url(&self) -> &str {
        &self.tokeninfo_url
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(
        &self,
        ctx: &RequestContext,
        raw_token: &str,
    ) -> Result<UpstreamClaims, AuthError> {
        if raw_token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        ctx.trace("Starting Google token validation");
        let request = self
            .http
            .post(&self.tokeninfo_url)
            .form(&[("id_token", raw_token)])
            .send();
        let response = ctx.run(request).await?.map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthError::UpstreamUnreachable(format!(
                "tokeninfo returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AuthError::UpstreamInvalid(format!(
                "tokeninfo returned {status}"
            )));
        }

        ctx.trace("Decoding claims from Google");
        let info = ctx
            .run(response.json::<TokenInfo>())
            .await?
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Timeout
                } else {
                    AuthError::UpstreamInvalid(format!("invalid tokeninfo body: {e}"))
                }
            })?;

        let claims = UpstreamClaims::from(info);
        claims.validate(ctx.client_id())?;
        ctx.trace("Decoded claims from Google");
        Ok(claims)
    }
}

fn transport_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::UpstreamUnreachable(e.to_string())
    }
}
