// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Permission checks over a persistent RPC connection.
//!
//! ## Multiplexing
//!
//! All checks share one connection. Each call gets a fresh request id and
//! waits on its own reply channel. A reader task owns the receiving half of
//! the socket and routes every reply to the call with the matching id, so any
//! number of checks can be in flight at once. A caller that gives up (for
//! example because its request deadline passed) simply stops waiting; the
//! late reply is discarded when it arrives.
//!
//! ## Retry policy
//!
//! When the connection turns out to be dead (the peer closed it, the reply
//! stream ended early, or redialing failed) the checker reconnects and tries
//! again, up to `max_attempts` calls in total. Every other failure is returned
//! immediately. There is no backoff between attempts.
//!
//! Dialing and swapping the connection happen under one async mutex, so
//! concurrent callers that all see a dead connection redial only once.

use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as SyncMutex,
    },
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{oneshot, Mutex},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use super::codec::{ClientCodec, CodecError, RpcRequest, RpcResponse, WireCodec};
use super::PermissionChecker;
use crate::config::RpcConfig;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("failed to dial permission backend at {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection is shut down")]
    Shutdown,

    #[error("unexpected EOF")]
    UnexpectedEof,

    #[error("permission backend I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("permission backend sent an invalid frame: {0}")]
    Codec(String),

    #[error("permission backend returned an error: {0}")]
    Remote(String),

    #[error("permission backend replied without a result")]
    MissingResult,
}

impl RpcError {
    /// Whether the error means the connection is gone and a fresh one
    /// might succeed.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            RpcError::Shutdown | RpcError::UnexpectedEof | RpcError::Dial { .. }
        )
    }

    /// Copy of the error handed to every call pending on a dead connection.
    fn for_pending(&self) -> RpcError {
        match self {
            RpcError::Dial { addr, source } => RpcError::Dial {
                addr: addr.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
            RpcError::Shutdown => RpcError::Shutdown,
            RpcError::UnexpectedEof => RpcError::UnexpectedEof,
            RpcError::Io(e) => RpcError::Io(io::Error::new(e.kind(), e.to_string())),
            RpcError::Codec(msg) => RpcError::Codec(msg.clone()),
            RpcError::Remote(msg) => RpcError::Remote(msg.clone()),
            RpcError::MissingResult => RpcError::MissingResult,
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => match e.kind() {
                io::ErrorKind::UnexpectedEof => RpcError::UnexpectedEof,
                io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected => RpcError::Shutdown,
                _ => RpcError::Io(e),
            },
            other => RpcError::Codec(other.to_string()),
        }
    }
}

type ReplySender = oneshot::Sender<Result<RpcResponse, RpcError>>;

/// Calls waiting for a reply. Once `closed` is set no call may register.
#[derive(Default)]
struct Pending {
    calls: HashMap<u64, ReplySender>,
    closed: bool,
}

/// One live connection to the backend.
struct Connection {
    writer: Mutex<FramedWrite<OwnedWriteHalf, ClientCodec>>,
    pending: Arc<SyncMutex<Pending>>,
    /// Cancelled when the connection must stop being used.
    closing: CancellationToken,
}

impl Connection {
    fn start(stream: TcpStream, codec: WireCodec) -> Arc<Self> {
        let (read, write) = stream.into_split();
        let pending = Arc::new(SyncMutex::new(Pending::default()));
        let closing = CancellationToken::new();

        tokio::spawn(read_replies(
            FramedRead::new(read, ClientCodec::new(codec)),
            pending.clone(),
            closing.clone(),
        ));

        Arc::new(Self {
            writer: Mutex::new(FramedWrite::new(write, ClientCodec::new(codec))),
            pending,
            closing,
        })
    }

    fn is_closed(&self) -> bool {
        self.closing.is_cancelled() || lock(&self.pending).closed
    }

    fn close(&self) {
        self.closing.cancel();
    }

    /// Send `request` and wait for the reply with the same id.
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, RpcError> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(RpcError::Shutdown);
            }
            pending.calls.insert(id, tx);
        }
        let _registration = Registration {
            id,
            pending: &self.pending,
        };

        let sent = self.writer.lock().await.send(request).await;
        if let Err(e) = sent {
            let err = RpcError::from(e);
            self.close();
            return Err(err);
        }

        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(RpcError::UnexpectedEof),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closing.cancel();
    }
}

/// Removes a call from the pending table when its caller stops waiting.
struct Registration<'a> {
    id: u64,
    pending: &'a SyncMutex<Pending>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        lock(self.pending).calls.remove(&self.id);
    }
}

fn lock(pending: &SyncMutex<Pending>) -> std::sync::MutexGuard<'_, Pending> {
    // The table holds no invariant a panicking holder could break.
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Route replies to their callers until the connection ends, then fail every
/// call still waiting.
async fn read_replies(
    mut replies: FramedRead<OwnedReadHalf, ClientCodec>,
    pending: Arc<SyncMutex<Pending>>,
    closing: CancellationToken,
) {
    let reason = loop {
        let frame = tokio::select! {
            _ = closing.cancelled() => break RpcError::Shutdown,
            frame = replies.next() => frame,
        };
        match frame {
            Some(Ok(reply)) => {
                let caller = lock(&pending).calls.remove(&reply.id);
                match caller {
                    Some(tx) => {
                        let _ = tx.send(Ok(reply));
                    }
                    None => debug!(id = reply.id, "Dropping reply for abandoned call"),
                }
            }
            Some(Err(e)) => break RpcError::from(e),
            None => break RpcError::UnexpectedEof,
        }
    };

    closing.cancel();
    let waiting = {
        let mut pending = lock(&pending);
        pending.closed = true;
        std::mem::take(&mut pending.calls)
    };
    if !waiting.is_empty() {
        debug!(calls = waiting.len(), error = %reason, "Failing calls on closed connection");
    }
    for (_, tx) in waiting {
        let _ = tx.send(Err(reason.for_pending()));
    }
}

/// [`PermissionChecker`] that asks a remote backend over RPC.
pub struct RpcPermissionChecker {
    addr: String,
    method: String,
    codec: WireCodec,
    max_attempts: u32,
    conn: Mutex<Option<Arc<Connection>>>,
    next_id: AtomicU64,
}

impl RpcPermissionChecker {
    /// Dial the backend. Fails if the first connection cannot be made.
    pub async fn connect(config: &RpcConfig) -> Result<Self, RpcError> {
        let checker = Self {
            addr: config.addr.clone(),
            method: config.method.clone(),
            codec: config.codec,
            max_attempts: config.max_attempts.max(1),
            conn: Mutex::new(None),
            next_id: AtomicU64::new(0),
        };
        checker.connection().await?;
        Ok(checker)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn dial(&self) -> Result<Arc<Connection>, RpcError> {
        info!(addr = %self.addr, codec = %self.codec, "Dialing permission backend");
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| RpcError::Dial {
                addr: self.addr.clone(),
                source,
            })?;
        // Best effort; small request/reply frames.
        let _ = stream.set_nodelay(true);
        Ok(Connection::start(stream, self.codec))
    }

    /// The live connection, redialing if there is none.
    async fn connection(&self) -> Result<Arc<Connection>, RpcError> {
        let mut current = self.conn.lock().await;
        if let Some(conn) = current.as_ref().filter(|c| !c.is_closed()) {
            return Ok(conn.clone());
        }
        *current = None;
        let conn = self.dial().await?;
        *current = Some(conn.clone());
        Ok(conn)
    }

    /// Forget `conn` unless another caller already replaced it.
    async fn discard(&self, conn: &Arc<Connection>) {
        conn.close();
        let mut current = self.conn.lock().await;
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            *current = None;
        }
    }
}

#[async_trait]
impl PermissionChecker for RpcPermissionChecker {
    async fn check(&self, token: &str) -> Result<bool, RpcError> {
        let mut last_error = RpcError::Shutdown;

        for attempt in 1..=self.max_attempts {
            let conn = match self.connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Permission backend redial failed"
                    );
                    last_error = e;
                    continue;
                }
            };

            let request = RpcRequest {
                method: self.method.clone(),
                params: [token.to_string()],
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
            };

            match conn.call(request).await {
                Ok(reply) => {
                    if let Some(error) = reply.error.filter(|e| !e.is_empty()) {
                        return Err(RpcError::Remote(error));
                    }
                    let granted = reply.result.ok_or(RpcError::MissingResult)?;
                    debug!(attempt, granted, "Permission backend replied");
                    return Ok(granted);
                }
                Err(e) if e.is_connection_lost() => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Permission backend connection lost; reconnecting"
                    );
                    self.discard(&conn).await;
                    last_error = e;
                }
                Err(e) => {
                    self.discard(&conn).await;
                    return Err(e);
                }
            }
        }

        Err(last_error)
    }

    fn is_connected(&self) -> bool {
        match self.conn.try_lock() {
            Ok(current) => current.as_ref().is_some_and(|c| !c.is_closed()),
            // Someone is redialing right now.
            Err(_) => false,
        }
    }

    async fn reconnect(&self) -> bool {
        match self.connection().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Permission backend still unreachable");
                false
            }
        }
    }
}
