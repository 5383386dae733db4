// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Permission Checks
//!
//! After an assertion has been signed, a permission backend may be asked
//! whether that exact token should be handed out. The backend is optional;
//! without one every signed assertion is granted.
//!
//! - `codec` - wire encodings for the backend connection
//! - `rpc` - [`RpcPermissionChecker`], the TCP-backed implementation

use async_trait::async_trait;

pub mod codec;
pub mod rpc;

pub use codec::{ClientCodec, RpcRequest, RpcResponse, ServerCodec, WireCodec};
pub use rpc::{RpcError, RpcPermissionChecker};

/// Decides whether a signed assertion may be issued.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// `Ok(true)` grants the token, `Ok(false)` refuses it.
    async fn check(&self, token: &str) -> Result<bool, RpcError>;

    /// Whether the checker currently holds a live backend connection.
    fn is_connected(&self) -> bool {
        true
    }

    /// Try to bring a lost backend connection back. Returns whether the
    /// checker is connected afterwards.
    async fn reconnect(&self) -> bool {
        true
    }
}
