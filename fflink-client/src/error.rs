//! Client error types.

use fflink_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to printer: {0}")]
    Connect(#[source] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("not ready: connection has not completed the handshake")]
    NotReady,

    #[error("no response within the deadline")]
    Timeout,

    #[error("connection lost")]
    ConnectionLost,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unparseable {command} response: {source}")]
    Parse {
        /// Keyword of the command whose reply did not match.
        command: &'static str,
        #[source]
        source: ProtocolError,
    },

    #[error("device rejected chunk integrity at offset {offset}")]
    Checksum { offset: u64 },

    #[error("upload sequence error: {0}")]
    UploadState(&'static str),
}

impl ClientError {
    /// Returns whether re-sending the same frame may succeed.
    ///
    /// Only timeouts qualify: the protocol has no sequence numbers, so a
    /// retry assumes the device either never saw or fully consumed the prior
    /// attempt. A lost connection needs a reconnect and re-handshake first; a
    /// checksum rejection needs the transfer restarted from offset zero.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout)
    }
}
