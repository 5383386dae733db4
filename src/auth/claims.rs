// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Claims carried by issued login assertions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::google::UpstreamClaims;

/// Scope stamped on every assertion.
pub const LOGIN_SCOPE: &str = "login";

/// Payload of an issued assertion.
///
/// Optional private claims are omitted from the token when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub scope: String,
    /// Verified email of the user
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Hosted (G Suite) domain of the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Conference room the caller asked to join
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl AssertionClaims {
    /// Claims for `email` valid from `issued_at` for `ttl`.
    ///
    /// `ttl` is rounded up to whole seconds so `exp` is always after `iat`.
    pub fn new(email: impl Into<String>, issued_at: i64, ttl: Duration) -> Self {
        let ttl_secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        let ttl_secs = i64::try_from(ttl_secs.max(1)).unwrap_or(i64::MAX);
        Self {
            scope: LOGIN_SCOPE.to_string(),
            iss: email.into(),
            iat: issued_at,
            exp: issued_at.saturating_add(ttl_secs),
            locale: None,
            domain: None,
            room: None,
        }
    }

    /// Build the claim set for a verified upstream identity.
    pub fn for_identity(
        upstream: &UpstreamClaims,
        room: Option<&str>,
        issued_at: i64,
        ttl: Duration,
    ) -> Self {
        Self::new(upstream.email.clone(), issued_at, ttl)
            .with_locale(upstream.locale.as_deref().unwrap_or_default())
            .with_domain(&upstream.hosted_domain)
            .with_room(room.unwrap_or_default())
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = non_empty(locale);
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = non_empty(domain);
        self
    }

    pub fn with_room(mut self, room: &str) -> Self {
        self.room = non_empty(room);
        self
    }
}

fn non_empty(value: &str) -> Option<String> {
    Some(value).filter(|v| !v.is_empty()).map(str::to_string)
}
