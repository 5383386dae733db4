// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! All configuration is read from the environment once at startup and frozen
//! into a [`Config`] value that is passed by reference into every component
//! constructor.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `GOOGLE_CLIENT_ID` | Expected `aud` of incoming Google ID tokens | Required |
//! | `JAP_PRIVATE_KEY` | Path to a PEM file holding an `RSA PRIVATE KEY` block | Required |
//! | `JAP_TOKENINFO_URL` | Google token introspection endpoint | `https://www.googleapis.com/oauth2/v3/tokeninfo` |
//! | `JAP_TOKEN_TTL_SECS` | Lifetime of issued assertions | `300` |
//! | `JAP_REQUEST_TIMEOUT_SECS` | Deadline for a single login request | `10` |
//! | `JAP_RPC_ADDR` | Permission backend address; enables permission checks | Optional |
//! | `JAP_RPC_METHOD` | Remote method taking a token and replying with a boolean | `Permissions.Check` |
//! | `JAP_RPC_CODEC` | Permission backend wire encoding (`binary` or `json`) | `binary` |
//! | `JAP_RPC_ATTEMPTS` | Attempts per permission check before giving up | `3` |
//! | `JAP_MAX_CONNS` | Maximum in-flight requests (`0` = unlimited) | `0` |
//! | `JAP_PUBLIC_DIR` | Directory of static files served at `/` | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::{collections::HashMap, fmt, net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use crate::permissions::WireCodec;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const CLIENT_ID_ENV: &str = "GOOGLE_CLIENT_ID";
pub const PRIVATE_KEY_ENV: &str = "JAP_PRIVATE_KEY";
pub const TOKENINFO_URL_ENV: &str = "JAP_TOKENINFO_URL";
pub const TOKEN_TTL_ENV: &str = "JAP_TOKEN_TTL_SECS";
pub const REQUEST_TIMEOUT_ENV: &str = "JAP_REQUEST_TIMEOUT_SECS";
pub const RPC_ADDR_ENV: &str = "JAP_RPC_ADDR";
pub const RPC_METHOD_ENV: &str = "JAP_RPC_METHOD";
pub const RPC_CODEC_ENV: &str = "JAP_RPC_CODEC";
pub const RPC_ATTEMPTS_ENV: &str = "JAP_RPC_ATTEMPTS";
pub const MAX_CONNS_ENV: &str = "JAP_MAX_CONNS";
pub const PUBLIC_DIR_ENV: &str = "JAP_PUBLIC_DIR";

/// Google's token introspection endpoint.
pub const DEFAULT_TOKENINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/tokeninfo";
pub const DEFAULT_RPC_METHOD: &str = "Permissions.Check";
pub const DEFAULT_RPC_ATTEMPTS: u32 = 3;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Text printed for `--help`.
pub const HELP: &str = "\
jap-server launches an HTTP service that exchanges a Google ID token for a
short-lived JSON Web Signature (JWS) proving the user's identity to other
services.

Configuration is read from the environment:

  GOOGLE_CLIENT_ID          OAuth client ID that incoming ID tokens must target (required)
  JAP_PRIVATE_KEY           Path to a PEM encoded RSA private key used for signing (required)
  HOST, PORT                Address to listen on (default 0.0.0.0:8080)
  JAP_TOKENINFO_URL         Token introspection endpoint
  JAP_TOKEN_TTL_SECS        Lifetime of issued tokens in seconds (default 300)
  JAP_REQUEST_TIMEOUT_SECS  Deadline for a login request in seconds (default 10)
  JAP_RPC_ADDR              Permission backend address; enables permission checks
  JAP_RPC_METHOD            Remote method to call (default Permissions.Check)
  JAP_RPC_CODEC             binary or json (default binary)
  JAP_RPC_ATTEMPTS          Attempts per permission check (default 3)
  JAP_MAX_CONNS             Maximum concurrent requests, 0 for unlimited
  JAP_PUBLIC_DIR            Directory of static files to serve at /
  LOG_FORMAT                json or pretty

TLS is not supported. Put the service behind a reverse proxy such as nginx.";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// The OAuth client ID incoming tokens must be issued for.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientId(Arc<str>);

impl ClientId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientId").field(&&*self.0).finish()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission backend settings. Present only when `JAP_RPC_ADDR` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub addr: String,
    pub method: String,
    pub codec: WireCodec,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// IP literal (without brackets) or hostname to listen on.
    pub host: String,
    pub port: u16,
    pub client_id: ClientId,
    pub private_key_path: PathBuf,
    pub tokeninfo_url: String,
    pub token_ttl: Duration,
    pub request_timeout: Duration,
    pub rpc: Option<RpcConfig>,
    /// `None` means unlimited.
    pub max_conns: Option<usize>,
    pub public_dir: Option<PathBuf>,
}

impl Config {
    /// Address to bind, resolved by the listener.
    pub fn bind_target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars(vars: &HashMap<&str, &str>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let client_id = get(CLIENT_ID_ENV).ok_or(ConfigError::Missing(CLIENT_ID_ENV))?;
        let private_key_path = get(PRIVATE_KEY_ENV).ok_or(ConfigError::Missing(PRIVATE_KEY_ENV))?;

        let host = parse_host(&get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()))?;
        let port = match get(PORT_ENV) {
            Some(raw) => parse_number::<u16>(PORT_ENV, &raw)?,
            None => DEFAULT_PORT,
        };
        let tokeninfo_url =
            get(TOKENINFO_URL_ENV).unwrap_or_else(|| DEFAULT_TOKENINFO_URL.to_string());
        url::Url::parse(&tokeninfo_url).map_err(|e| ConfigError::Invalid {
            name: TOKENINFO_URL_ENV,
            value: tokeninfo_url.clone(),
            reason: e.to_string(),
        })?;

        let token_ttl = seconds(TOKEN_TTL_ENV, get(TOKEN_TTL_ENV), DEFAULT_TOKEN_TTL)?;
        let request_timeout = seconds(
            REQUEST_TIMEOUT_ENV,
            get(REQUEST_TIMEOUT_ENV),
            DEFAULT_REQUEST_TIMEOUT,
        )?;

        let rpc = match get(RPC_ADDR_ENV) {
            Some(addr) => {
                let codec = match get(RPC_CODEC_ENV) {
                    Some(raw) => raw.parse::<WireCodec>().map_err(|reason| ConfigError::Invalid {
                        name: RPC_CODEC_ENV,
                        value: raw.clone(),
                        reason,
                    })?,
                    None => WireCodec::default(),
                };
                let max_attempts = match get(RPC_ATTEMPTS_ENV) {
                    Some(raw) => match parse_number::<u32>(RPC_ATTEMPTS_ENV, &raw)? {
                        0 => return Err(invalid(RPC_ATTEMPTS_ENV, &raw, "must be at least 1")),
                        n => n,
                    },
                    None => DEFAULT_RPC_ATTEMPTS,
                };
                Some(RpcConfig {
                    addr,
                    method: get(RPC_METHOD_ENV).unwrap_or_else(|| DEFAULT_RPC_METHOD.to_string()),
                    codec,
                    max_attempts,
                })
            }
            None => None,
        };

        let max_conns = match get(MAX_CONNS_ENV) {
            Some(raw) => match parse_number::<usize>(MAX_CONNS_ENV, &raw)? {
                0 => None,
                n => Some(n),
            },
            None => None,
        };

        Ok(Self {
            host,
            port,
            client_id: ClientId::new(client_id),
            private_key_path: PathBuf::from(private_key_path),
            tokeninfo_url,
            token_ttl,
            request_timeout,
            rpc,
            max_conns,
            public_dir: get(PUBLIC_DIR_ENV).map(PathBuf::from),
        })
    }
}

/// Accept IP literals (IPv6 optionally bracketed) and DNS hostnames.
fn parse_host(raw: &str) -> Result<String, ConfigError> {
    let unbracketed = raw
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(raw);
    if unbracketed.parse::<IpAddr>().is_ok() {
        return Ok(unbracketed.to_string());
    }
    let is_hostname = unbracketed.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if is_hostname {
        Ok(unbracketed.to_string())
    } else {
        Err(invalid(HOST_ENV, raw, "not an IP address or hostname"))
    }
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>().map_err(|e| invalid(name, raw, e.to_string()))
}

/// Parse a strictly positive number of seconds.
fn seconds(
    name: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match parse_number::<u64>(name, &raw)? {
        0 => Err(invalid(name, &raw, "must be greater than zero")),
        secs => Ok(Duration::from_secs(secs)),
    }
}
