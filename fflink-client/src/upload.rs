//! Chunked file upload with per-chunk integrity checking.

use crate::connection::Connection;
use crate::error::ClientError;
use crate::session::Session;
use fflink_protocol::codec::{encode, ResponseUnit};
use fflink_protocol::command::validate_filename;
use fflink_protocol::packet::DataPacket;
use fflink_protocol::Command;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Upload state machine.
///
/// `Idle -> Begun -> Transferring -> Completing -> Idle` on success;
/// any failure lands in `Aborted`, which only [`Uploader::reset`] leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Begun,
    Transferring,
    Completing,
    Aborted,
}

/// Bookkeeping for one in-progress transfer.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Target filename on the printer.
    pub filename: String,
    /// Declared total byte length.
    pub total_len: u64,
    /// Bytes acknowledged so far. Monotonically non-decreasing, never
    /// exceeds `total_len`, and advances only after the device acks a chunk.
    pub offset: u64,
    /// Sequence number of the next data packet.
    counter: u32,
}

/// Orchestrates the begin/transfer/end upload sequence over a [`Session`].
///
/// Chunks go out strictly sequentially: packet N's counter and the device's
/// offset bookkeeping depend on N-1 having been acknowledged. The session's
/// connection is held exclusively from [`begin`](Uploader::begin) until the
/// transfer ends, so no other command can reach the wire while the firmware
/// is in file-write mode; concurrent `execute` calls queue behind the whole
/// transfer window.
pub struct Uploader {
    session: Arc<Session>,
    guard: Option<OwnedMutexGuard<Connection>>,
    state: UploadState,
    current: Option<UploadSession>,
}

impl Uploader {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            guard: None,
            state: UploadState::Idle,
            current: None,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// The in-progress transfer, if any. Survives an abort so the caller can
    /// read the last acknowledged offset.
    pub fn session(&self) -> Option<&UploadSession> {
        self.current.as_ref()
    }

    /// Opens `0:/user/<filename>` for write on the printer.
    ///
    /// Issues `M650` (announce transfer) then `M28 <len> <path>`; the upload
    /// session exists only once both are acknowledged. On success the
    /// connection stays locked to this uploader until the transfer ends.
    pub async fn begin(&mut self, filename: &str, total_len: u64) -> Result<(), ClientError> {
        if self.state != UploadState::Idle {
            return Err(ClientError::UploadState("begin requires an idle uploader"));
        }
        validate_filename(filename)?;

        let mut conn = self.session.lock_owned().await;
        if !conn.is_ready() {
            return Err(ClientError::NotReady);
        }

        command_exchange(&mut conn, &Command::PrepareUpload).await?;
        command_exchange(
            &mut conn,
            &Command::FileOpen {
                size: total_len,
                name: filename.to_string(),
            },
        )
        .await?;

        tracing::info!("upload of {} ({} bytes) begun", filename, total_len);
        self.guard = Some(conn);
        self.current = Some(UploadSession {
            filename: filename.to_string(),
            total_len,
            offset: 0,
            counter: 0,
        });
        self.state = UploadState::Begun;
        Ok(())
    }

    /// Sends one chunk and waits for its acknowledgement.
    ///
    /// The checksum is computed over exactly this chunk's unpadded payload.
    /// The offset advances only after acknowledgement. A device integrity
    /// rejection aborts the transfer without resend; a shifted byte offset
    /// cannot be corrected by blindly re-sending, so recovery is to restart
    /// the whole transfer from offset zero. An abort releases the connection
    /// back to the session.
    pub async fn transfer_chunk(&mut self, data: &[u8]) -> Result<(), ClientError> {
        if !matches!(self.state, UploadState::Begun | UploadState::Transferring) {
            return Err(ClientError::UploadState("no transfer in progress"));
        }
        let sess = self
            .current
            .as_mut()
            .ok_or(ClientError::UploadState("no transfer in progress"))?;
        if sess.offset + data.len() as u64 > sess.total_len {
            return Err(ClientError::UploadState(
                "chunk exceeds the declared file length",
            ));
        }

        let packet = DataPacket::new(sess.counter, data)?.encode();
        let conn = self
            .guard
            .as_mut()
            .ok_or(ClientError::UploadState("no transfer in progress"))?;
        let reply = match packet_exchange(conn, &packet).await {
            Ok(reply) => reply,
            Err(e) => {
                self.state = UploadState::Aborted;
                self.guard = None;
                return Err(e);
            }
        };

        if reply_rejects_integrity(&reply) {
            let offset = sess.offset;
            tracing::warn!(
                "device rejected chunk {} of {}; last good offset {}",
                sess.counter,
                sess.filename,
                offset
            );
            self.state = UploadState::Aborted;
            self.guard = None;
            return Err(ClientError::Checksum { offset });
        }

        sess.offset += data.len() as u64;
        sess.counter += 1;
        self.state = UploadState::Transferring;
        tracing::debug!(
            "chunk {} acknowledged, offset {}/{}",
            sess.counter - 1,
            sess.offset,
            sess.total_len
        );
        Ok(())
    }

    /// Closes the file on the printer. Returns to `Idle` and releases the
    /// connection only on ack.
    pub async fn complete(&mut self) -> Result<(), ClientError> {
        if !matches!(self.state, UploadState::Begun | UploadState::Transferring) {
            return Err(ClientError::UploadState("no transfer in progress"));
        }
        let sess = self
            .current
            .as_ref()
            .ok_or(ClientError::UploadState("no transfer in progress"))?;
        if sess.offset != sess.total_len {
            return Err(ClientError::UploadState(
                "declared length not fully transferred",
            ));
        }

        self.state = UploadState::Completing;
        let conn = self
            .guard
            .as_mut()
            .ok_or(ClientError::UploadState("no transfer in progress"))?;
        match command_exchange(conn, &Command::FileClose).await {
            Ok(_) => {
                if let Some(sess) = self.current.take() {
                    tracing::info!("upload of {} complete", sess.filename);
                }
                self.guard = None;
                self.state = UploadState::Idle;
                Ok(())
            }
            Err(e) => {
                self.state = UploadState::Aborted;
                self.guard = None;
                Err(e)
            }
        }
    }

    /// Discards any aborted or in-progress transfer, releases the connection,
    /// and returns to `Idle`.
    pub fn reset(&mut self) {
        self.current = None;
        self.guard = None;
        self.state = UploadState::Idle;
    }
}

/// One control-command exchange under the locked connection.
async fn command_exchange(
    conn: &mut Connection,
    command: &Command,
) -> Result<ResponseUnit, ClientError> {
    let frame = encode(command)?;
    let timeout = conn.config().request_timeout;
    match conn.exchange(&frame, timeout).await {
        Err(ClientError::Timeout) => {
            conn.abandon_replies(1);
            Err(ClientError::Timeout)
        }
        other => other,
    }
}

/// One data-packet exchange under the locked connection and deadline.
///
/// Never retried: a chunk timeout leaves the transfer's byte offset
/// ambiguous, which a blind resend cannot fix.
async fn packet_exchange(conn: &mut Connection, packet: &[u8]) -> Result<ResponseUnit, ClientError> {
    let timeout = conn.config().upload_timeout;
    match conn.exchange(packet, timeout).await {
        Err(ClientError::Timeout) => {
            conn.abandon_replies(1);
            Err(ClientError::Timeout)
        }
        other => other,
    }
}

/// Whether a chunk acknowledgement actually reports an integrity failure.
///
/// The firmware's rejection text is not documented; anything mentioning an
/// error, failure, or CRC before the completion marker is treated as one.
fn reply_rejects_integrity(reply: &ResponseUnit) -> bool {
    let payload = reply.payload().to_ascii_lowercase();
    payload.contains("error") || payload.contains("fail") || payload.contains("crc")
}
