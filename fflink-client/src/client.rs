//! High-level client API: one typed method per printer operation.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::session::{ExecOptions, Session};
use crate::upload::Uploader;
use fflink_protocol::parse::{
    EndstopReport, HeadPosition, PrinterInfo, ProgressReport, Reply, TemperatureReport,
};
use fflink_protocol::{Axis, Command, CHUNK_SIZE};
use std::sync::Arc;

/// Default move feedrate in mm/min.
pub const DEFAULT_FEEDRATE: u32 = 3000;

/// High-level client for one printer.
pub struct Client {
    session: Arc<Session>,
}

impl Client {
    /// Creates a new client with the given configuration (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            session: Arc::new(Session::new(Connection::new(config))),
        }
    }

    /// Dials the printer and performs the control-mode handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.session.connect().await?;
        self.session.handshake().await
    }

    /// Returns whether commands are currently accepted.
    pub async fn is_ready(&self) -> bool {
        self.session.is_ready().await
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// The underlying session, for callers that need raw `execute` access.
    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    /// A fresh uploader bound to this client's session.
    pub fn uploader(&self) -> Uploader {
        Uploader::new(self.session.clone())
    }

    // =========================================================================
    // Status queries
    // =========================================================================

    /// `M115`: firmware and model information.
    pub async fn info(&self) -> Result<PrinterInfo, ClientError> {
        match self.session.execute(&Command::Info, ExecOptions::new()).await? {
            Reply::Info(info) => Ok(info),
            reply => Err(unexpected_reply(&Command::Info, reply)),
        }
    }

    /// `M105`: extruder and bed temperatures.
    pub async fn temperature(&self) -> Result<TemperatureReport, ClientError> {
        match self
            .session
            .execute(&Command::Temperature, ExecOptions::new())
            .await?
        {
            Reply::Temperature(report) => Ok(report),
            reply => Err(unexpected_reply(&Command::Temperature, reply)),
        }
    }

    /// `M114`: current head position.
    pub async fn position(&self) -> Result<HeadPosition, ClientError> {
        match self
            .session
            .execute(&Command::Position, ExecOptions::new())
            .await?
        {
            Reply::Position(position) => Ok(position),
            reply => Err(unexpected_reply(&Command::Position, reply)),
        }
    }

    /// `M119`: endstop switch states.
    pub async fn endstops(&self) -> Result<EndstopReport, ClientError> {
        match self
            .session
            .execute(&Command::Endstops, ExecOptions::new())
            .await?
        {
            Reply::Endstops(report) => Ok(report),
            reply => Err(unexpected_reply(&Command::Endstops, reply)),
        }
    }

    /// `M27`: print progress in bytes.
    pub async fn progress(&self) -> Result<ProgressReport, ClientError> {
        match self
            .session
            .execute(&Command::Progress, ExecOptions::new())
            .await?
        {
            Reply::Progress(report) => Ok(report),
            reply => Err(unexpected_reply(&Command::Progress, reply)),
        }
    }

    // =========================================================================
    // Motion and control
    // =========================================================================

    /// `G28`: home one axis, or all axes when `axis` is `None`.
    pub async fn home(&self, axis: Option<Axis>) -> Result<(), ClientError> {
        self.session
            .execute(&Command::Home { axis }, ExecOptions::new())
            .await?;
        Ok(())
    }

    /// `G1`: move the head. Omitted coordinates keep their current value;
    /// `feedrate` defaults to [`DEFAULT_FEEDRATE`].
    pub async fn move_to(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feedrate: Option<u32>,
    ) -> Result<(), ClientError> {
        self.session
            .execute(
                &Command::Move {
                    x,
                    y,
                    z,
                    feedrate: feedrate.unwrap_or(DEFAULT_FEEDRATE),
                },
                ExecOptions::new(),
            )
            .await?;
        Ok(())
    }

    /// `M146`: set the chamber LED color.
    pub async fn set_led(&self, r: u8, g: u8, b: u8) -> Result<(), ClientError> {
        self.session
            .execute(&Command::Led { r, g, b }, ExecOptions::new())
            .await?;
        Ok(())
    }

    /// `M25`: pause the running print.
    pub async fn pause(&self) -> Result<(), ClientError> {
        self.session
            .execute(&Command::Pause, ExecOptions::new())
            .await?;
        Ok(())
    }

    /// `M24`: resume a paused print.
    pub async fn resume(&self) -> Result<(), ClientError> {
        self.session
            .execute(&Command::Resume, ExecOptions::new())
            .await?;
        Ok(())
    }

    /// `M26`: cancel the running print.
    pub async fn stop(&self) -> Result<(), ClientError> {
        self.session
            .execute(&Command::Stop, ExecOptions::new())
            .await?;
        Ok(())
    }

    // =========================================================================
    // File transfer
    // =========================================================================

    /// Uploads a whole file, driving the begin/transfer/complete sequence in
    /// 4 KiB chunks.
    pub async fn upload_file(&self, filename: &str, content: &[u8]) -> Result<(), ClientError> {
        let mut uploader = self.uploader();
        uploader.begin(filename, content.len() as u64).await?;
        for chunk in content.chunks(CHUNK_SIZE) {
            uploader.transfer_chunk(chunk).await?;
        }
        uploader.complete().await
    }
}

fn unexpected_reply(command: &Command, reply: Reply) -> ClientError {
    ClientError::Parse {
        command: command.keyword(),
        source: fflink_protocol::ProtocolError::malformed(
            "structured reply",
            format!("{:?}", reply),
        ),
    }
}
