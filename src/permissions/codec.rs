// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wire encodings for the permission backend.
//!
//! Two encodings are supported:
//!
//! - `json`: newline-delimited JSON-RPC 1.0 objects, one per line
//!   (`{"method":..,"params":[..],"id":..}` / `{"id":..,"result":..,"error":..}`).
//! - `binary`: frames prefixed with a 4-byte big-endian length, each holding a
//!   bincode-encoded [`RpcRequest`] or [`RpcResponse`].
//!
//! The same codec type serves both ends of the connection; [`ClientCodec`]
//! writes requests and reads responses, [`ServerCodec`] does the opposite.

use std::{fmt, io, marker::PhantomData, str::FromStr};

use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec, LinesCodec, LinesCodecError};

/// Largest frame either side may send.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireCodec {
    #[default]
    Binary,
    Json,
}

impl FromStr for WireCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(WireCodec::Binary),
            "json" => Ok(WireCodec::Json),
            other => Err(format!("no such RPC codec {other} (expected binary or json)")),
        }
    }
}

impl fmt::Display for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireCodec::Binary => f.write_str("binary"),
            WireCodec::Json => f.write_str("json"),
        }
    }
}

/// A call of a single-argument remote method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: [String; 1],
    pub id: u64,
}

/// Reply to an [`RpcRequest`] with the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: bool) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("frame exceeds the maximum frame length")]
    FrameTooLong,

    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid binary frame: {0}")]
    Binary(#[from] bincode::Error),
}

impl From<LinesCodecError> for CodecError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => CodecError::FrameTooLong,
            LinesCodecError::Io(e) => CodecError::Io(e),
        }
    }
}

enum Framing {
    Lines(LinesCodec),
    Length(LengthDelimitedCodec),
}

/// Frames `Out` values onto the wire and reads `In` values off it.
pub struct RpcCodec<Out, In> {
    framing: Framing,
    _marker: PhantomData<fn(Out) -> In>,
}

pub type ClientCodec = RpcCodec<RpcRequest, RpcResponse>;
pub type ServerCodec = RpcCodec<RpcResponse, RpcRequest>;

impl<Out, In> RpcCodec<Out, In> {
    pub fn new(codec: WireCodec) -> Self {
        let framing = match codec {
            WireCodec::Json => Framing::Lines(LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
            WireCodec::Binary => Framing::Length(
                LengthDelimitedCodec::builder()
                    .length_field_length(4)
                    .max_frame_length(MAX_FRAME_LEN)
                    .new_codec(),
            ),
        };
        Self {
            framing,
            _marker: PhantomData,
        }
    }
}

impl<Out: Serialize, In> Encoder<Out> for RpcCodec<Out, In> {
    type Error = CodecError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.framing {
            Framing::Lines(lines) => {
                let line = serde_json::to_string(&item)?;
                lines.encode(line, dst)?;
            }
            Framing::Length(length) => {
                let frame = bincode::serialize(&item)?;
                length
                    .encode(Bytes::from(frame), dst)
                    .map_err(|e| match e.kind() {
                        io::ErrorKind::InvalidInput => CodecError::FrameTooLong,
                        _ => CodecError::Io(e),
                    })?;
            }
        }
        Ok(())
    }
}

impl<Out, In: DeserializeOwned> Decoder for RpcCodec<Out, In> {
    type Item = In;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.framing {
            Framing::Lines(lines) => match lines.decode(src)? {
                Some(line) => Ok(Some(serde_json::from_str(&line)?)),
                None => Ok(None),
            },
            Framing::Length(length) => match length.decode(src)? {
                Some(frame) => Ok(Some(bincode::deserialize(&frame)?)),
                None => Ok(None),
            },
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Framing::Lines(lines) = &mut self.framing {
            return match lines.decode_eof(src)? {
                Some(line) if !line.trim().is_empty() => Ok(Some(serde_json::from_str(&line)?)),
                _ => Ok(None),
            };
        }
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => Err(CodecError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            ))),
        }
    }
}
