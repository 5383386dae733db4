// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RSA signing key for issued assertions.
//!
//! The key is read once at startup from a PEM file. The file may hold several
//! blocks; the first `RSA PRIVATE KEY` (PKCS#1) block is used. A key that
//! cannot produce a signature is rejected at load time rather than on the
//! first login.

use std::{fmt, fs, path::Path};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

/// Algorithm used for every issued assertion.
pub const ASSERTION_ALGORITHM: Algorithm = Algorithm::RS256;

const RSA_PRIVATE_KEY_TAG: &str = "RSA PRIVATE KEY";

#[derive(Debug, thiserror::Error)]
pub enum SigningKeyError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM in {0}: {1}")]
    Pem(String, String),

    #[error("no RSA private key found in pem file {0}")]
    NoRsaKey(String),

    #[error("RSA private key in {0} cannot sign: {1}")]
    Unusable(String, String),
}

/// Private key used to sign assertions. Immutable once loaded.
#[derive(Clone)]
pub struct SigningKey {
    encoding: EncodingKey,
}

impl SigningKey {
    /// Load the key from a PEM file on disk.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, SigningKeyError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| SigningKeyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&bytes, &path.display().to_string())
    }

    /// Load the key from PEM bytes. `origin` names the source in errors.
    pub fn from_pem(bytes: &[u8], origin: &str) -> Result<Self, SigningKeyError> {
        let blocks = pem::parse_many(bytes)
            .map_err(|e| SigningKeyError::Pem(origin.to_string(), e.to_string()))?;

        let block = blocks
            .iter()
            .find(|b| b.tag() == RSA_PRIVATE_KEY_TAG)
            .ok_or_else(|| SigningKeyError::NoRsaKey(origin.to_string()))?;

        let key = Self {
            encoding: EncodingKey::from_rsa_der(block.contents()),
        };

        // The DER is only parsed when signing, so sign once now.
        key.sign(&serde_json::json!({}))
            .map_err(|e| SigningKeyError::Unusable(origin.to_string(), e.to_string()))?;

        Ok(key)
    }

    /// Sign `claims` into a compact JWS.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(ASSERTION_ALGORITHM), claims, &self.encoding)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &ASSERTION_ALGORITHM)
            .finish_non_exhaustive()
    }
}
