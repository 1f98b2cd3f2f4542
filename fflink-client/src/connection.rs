//! Connection lifecycle and deadline-bounded socket I/O.

use crate::error::ClientError;
use fflink_protocol::codec::{encode, Decoder, ResponseUnit};
use fflink_protocol::{Command, DEFAULT_PORT};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default read buffer size (1 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// One printer on the network. Immutable once a connection is built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// An endpoint on the firmware's standard port (8899).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Printer address.
    pub endpoint: Endpoint,
    /// TCP dial timeout.
    pub connect_timeout: Duration,
    /// Default deadline for one command exchange.
    pub request_timeout: Duration,
    /// Deadline for one upload chunk exchange (transfers run slower).
    pub upload_timeout: Duration,
    /// Default number of automatic re-sends after a timeout.
    ///
    /// Zero by default: the protocol has no sequence numbers, so a retried
    /// frame may execute twice if the device consumed the first one. Callers
    /// opt in per call or via this setting.
    pub retries: u32,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(30),
            retries: 0,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(64);
        self
    }
}

/// Lifecycle states of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket yet.
    Disconnected,
    /// TCP established, handshake not yet acknowledged.
    Connected,
    /// Control mode granted; commands are accepted.
    Handshaken,
    /// Socket released or lost. A closed connection is never reopened;
    /// construct a new one.
    Closed,
}

/// One TCP connection to a printer.
///
/// Exclusively owned by one [`crate::Session`]; all methods take `&mut self`
/// so the one-command-in-flight invariant is enforced by the borrow rules
/// plus the session's mutex.
pub struct Connection {
    config: ConnectionConfig,
    stream: Option<TcpStream>,
    decoder: Decoder,
    state: ConnectionState,
    /// Response units owed to calls that already gave up waiting. Later
    /// exchanges discard this many units before accepting their reply.
    stale_units: usize,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            stream: None,
            decoder: Decoder::new(),
            state: ConnectionState::Disconnected,
            stale_units: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns whether the handshake has completed and commands are accepted.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Handshaken
    }

    /// Opens the TCP socket.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected | ConnectionState::Handshaken => return Ok(()),
            ConnectionState::Closed => return Err(ClientError::ConnectionLost),
        }

        let endpoint = self.config.endpoint.clone();
        tracing::debug!("connecting to {}", endpoint);
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| {
            ClientError::Connect(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("dial {} timed out", endpoint),
            ))
        })?
        .map_err(ClientError::Connect)?;

        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        tracing::debug!("tcp connected to {}", endpoint);
        Ok(())
    }

    /// Sends the control-mode command and waits for its acknowledgement.
    ///
    /// The firmware ignores every other frame until this succeeds. Transitions
    /// to `Handshaken` only on acknowledgement.
    pub async fn handshake(&mut self) -> Result<(), ClientError> {
        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::Handshaken => return Ok(()),
            _ => return Err(ClientError::Handshake("socket is not connected".to_string())),
        }

        let frame = encode(&Command::Handshake)?;
        let timeout = self.config.request_timeout;
        tracing::debug!("sending handshake");
        match self.raw_exchange(&frame, timeout).await {
            Ok(_) => {
                self.state = ConnectionState::Handshaken;
                tracing::debug!("handshake acknowledged, control mode active");
                Ok(())
            }
            Err(ClientError::Timeout) => Err(ClientError::Handshake(
                "no acknowledgement within the deadline".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Writes one frame and reads until one response unit decodes or the
    /// deadline elapses. Requires a completed handshake.
    ///
    /// A timeout does not by itself mark the reply as stale: the caller may
    /// re-send the same frame and keep waiting, in which case whichever reply
    /// arrives still answers that frame. Callers that give up for good must
    /// register their outstanding sends via [`Connection::abandon_replies`].
    pub async fn exchange(
        &mut self,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<ResponseUnit, ClientError> {
        if self.state != ConnectionState::Handshaken {
            return Err(ClientError::NotReady);
        }
        self.raw_exchange(frame, timeout).await
    }

    /// Registers `count` sent frames whose replies no caller will wait for
    /// anymore. Later exchanges discard that many response units before
    /// accepting one as their own reply.
    pub fn abandon_replies(&mut self, count: usize) {
        self.stale_units += count;
        if count > 0 {
            tracing::debug!("{} stale response units now owed", self.stale_units);
        }
    }

    /// Deadline-bounded write-then-read. Discards units owed to abandoned
    /// exchanges before accepting a reply.
    async fn raw_exchange(
        &mut self,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<ResponseUnit, ClientError> {
        let buffer_size = self.config.read_buffer_size;
        let deadline = tokio::time::Instant::now() + timeout;

        // The write shares the deadline but is never resumed once cancelled:
        // a partially written frame is malformed input, which the firmware
        // answers by terminating the interaction, so the socket is poisoned.
        let stream = self.stream.as_mut().ok_or(ClientError::ConnectionLost)?;
        let written = tokio::time::timeout_at(deadline, stream.write_all(frame)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!("connection lost: {}", e);
                self.state = ConnectionState::Closed;
                self.stream = None;
                return Err(ClientError::ConnectionLost);
            }
            Err(_) => {
                tracing::debug!("frame write cancelled by the deadline");
                self.state = ConnectionState::Closed;
                self.stream = None;
                return Err(ClientError::ConnectionLost);
            }
        }

        let stream = self.stream.as_mut().ok_or(ClientError::ConnectionLost)?;
        let decoder = &mut self.decoder;
        let stale_units = &mut self.stale_units;

        let result = tokio::time::timeout_at(deadline, async {
            let mut buf = vec![0u8; buffer_size];
            loop {
                // Buffered bytes first: a stray late reply may already be here
                while let Some(unit) = decoder.decode_unit() {
                    if *stale_units > 0 {
                        *stale_units -= 1;
                        tracing::debug!(
                            "discarding stale response unit ({} still owed)",
                            stale_units
                        );
                        continue;
                    }
                    return Ok(unit);
                }

                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "peer closed",
                    ));
                }
                decoder.extend(&buf[..n]);
            }
        })
        .await;

        match result {
            Ok(Ok(unit)) => Ok(unit),
            Ok(Err(e)) => {
                // Closed or reset mid-exchange; this socket is done
                tracing::debug!("connection lost: {}", e);
                self.state = ConnectionState::Closed;
                self.stream = None;
                Err(ClientError::ConnectionLost)
            }
            Err(_) => {
                tracing::debug!("exchange timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Releases the socket. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.decoder.clear();
        self.state = ConnectionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let endpoint = Endpoint::new("10.0.0.96");
        assert_eq!(endpoint.port, DEFAULT_PORT);
        assert_eq!(endpoint.to_string(), "10.0.0.96:8899");

        let endpoint = Endpoint::new("printer.local").with_port(9100);
        assert_eq!(endpoint.port, 9100);
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new(Endpoint::new("10.0.0.96"));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.upload_timeout, Duration::from_secs(30));
        assert_eq!(config.retries, 0);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut conn = Connection::new(ConnectionConfig::new(Endpoint::new("127.0.0.1")));
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_connection_is_not_reopened() {
        let mut conn = Connection::new(ConnectionConfig::new(Endpoint::new("127.0.0.1")));
        conn.close().await;
        assert!(matches!(
            conn.connect().await,
            Err(ClientError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_exchange_before_handshake_is_not_ready() {
        let mut conn = Connection::new(ConnectionConfig::new(Endpoint::new("127.0.0.1")));
        let result = conn.exchange(b"~M105\r\n", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ClientError::NotReady)));
    }
}
