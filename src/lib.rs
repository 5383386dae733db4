// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JAP - JWS Assertion Provider
//!
//! Exchanges a verified Google identity for a short-lived RS256 assertion
//! that other services can check offline with our public key.
//!
//! ## Modules
//!
//! - `api` - HTTP handlers (Axum)
//! - `auth` - Google token verification, claims and signing
//! - `permissions` - optional remote permission backend
//! - `context` - per-request deadline, cancellation and trace span
//! - `server` - startup and graceful shutdown

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod permissions;
pub mod server;
pub mod state;
pub mod telemetry;
