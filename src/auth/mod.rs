// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Exchanges a Google ID token for a short-lived RS256 assertion.
//!
//! ## Login Flow
//!
//! 1. The caller posts `id_token` (and optionally `room`) to `/googlelogin`
//! 2. The server:
//!    - Validates the token against Google's tokeninfo endpoint
//!    - Checks the audience against our OAuth client ID
//!    - Requires a verified email or a hosted domain
//!    - Builds claims (`scope`, `iss`, `iat`, `exp`, `locale`, `domain`, `room`)
//!    - Signs them with the configured RSA key
//!    - Asks the permission backend to approve the signed token, if one is configured
//! 3. The bare token is returned as the response body
//!
//! ## Security
//!
//! - A token is only released when every step succeeded
//! - Upstream failure details are logged, never returned
//! - The signing key is loaded once at startup; the server does not start without it

pub mod claims;
pub mod error;
pub mod google;
pub mod issuer;
pub mod signing;

pub use claims::{AssertionClaims, LOGIN_SCOPE};
pub use error::AuthError;
pub use google::{GoogleVerifier, IdentityVerifier, UpstreamClaims};
pub use issuer::{SignedAssertion, TokenIssuer};
pub use signing::{SigningKey, SigningKeyError, ASSERTION_ALGORITHM};
