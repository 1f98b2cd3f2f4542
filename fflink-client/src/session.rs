//! Command execution with one-command-in-flight serialization.

use crate::connection::Connection;
use crate::error::ClientError;
use fflink_protocol::codec::encode;
use fflink_protocol::parse::{parse_reply, Reply};
use fflink_protocol::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-call execution options. Unset fields fall back to the connection's
/// configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Override for the exchange deadline.
    pub timeout: Option<Duration>,
    /// Override for the number of automatic re-sends after a timeout.
    pub retries: Option<u32>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// The single entry point for issuing commands.
///
/// The printer accepts exactly one command at a time, so the connection sits
/// behind a mutex: concurrent [`execute`](Session::execute) calls wait their
/// turn rather than interleaving frames.
pub struct Session {
    conn: Arc<Mutex<Connection>>,
}

impl Session {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Takes exclusive ownership of the connection for a multi-exchange
    /// window, such as a file transfer. Every other call on this session
    /// waits until the returned guard drops.
    pub(crate) async fn lock_owned(&self) -> OwnedMutexGuard<Connection> {
        self.conn.clone().lock_owned().await
    }

    /// Opens the TCP socket.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.lock().await.connect().await
    }

    /// Performs the control-mode handshake.
    pub async fn handshake(&self) -> Result<(), ClientError> {
        self.conn.lock().await.handshake().await
    }

    /// Returns whether commands are currently accepted.
    pub async fn is_ready(&self) -> bool {
        self.conn.lock().await.is_ready()
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        self.conn.lock().await.close().await;
    }

    /// Executes one command and parses its reply.
    ///
    /// Rejects with [`ClientError::NotReady`] before any wire traffic if the
    /// handshake has not completed. A timed-out exchange is re-sent up to the
    /// retry budget; since the protocol has no sequence numbers, a retry
    /// assumes the device either never received or fully consumed the prior
    /// frame (known protocol limitation). Every attempt re-sends the same
    /// frame, so a reply arriving during a later attempt still settles this
    /// call; only when the whole call gives up are its unanswered sends
    /// registered as stale, to be discarded ahead of the next call's reply.
    /// A lost connection surfaces immediately; the caller reconnects and
    /// re-handshakes.
    pub async fn execute(
        &self,
        command: &Command,
        opts: ExecOptions,
    ) -> Result<Reply, ClientError> {
        // Encode first: malformed parameters never reach the wire or the lock
        let frame = encode(command)?;

        let mut conn = self.conn.lock().await;
        if !conn.is_ready() {
            return Err(ClientError::NotReady);
        }

        let timeout = opts.timeout.unwrap_or(conn.config().request_timeout);
        let retries = opts.retries.unwrap_or(conn.config().retries);

        let mut attempt = 0u32;
        let unit = loop {
            tracing::debug!(
                "executing {} (attempt {}/{})",
                command,
                attempt + 1,
                retries + 1
            );
            match conn.exchange(&frame, timeout).await {
                Ok(unit) => break unit,
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    tracing::debug!("{} timed out, re-sending", command);
                }
                Err(e) => {
                    if matches!(e, ClientError::Timeout) {
                        // Each send of this call may still be answered late
                        conn.abandon_replies(attempt as usize + 1);
                    }
                    return Err(e);
                }
            }
        };

        parse_reply(command, &unit).map_err(|source| {
            tracing::warn!("unparseable {} reply: {}", command, source);
            ClientError::Parse {
                command: command.keyword(),
                source,
            }
        })
    }
}
