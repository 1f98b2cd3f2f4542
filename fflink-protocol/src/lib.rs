//! # fflink-protocol
//!
//! Wire protocol implementation for FlashForge Finder printers.
//!
//! This crate provides:
//! - Command framing (`~CMD PARAM...\r\n`) and response-unit decoding
//! - A closed, typed set of supported commands
//! - Typed parsers for temperature, position, endstop, progress, and info replies
//! - Binary data-packet framing for the file upload sub-protocol
//!
//! No I/O lives here; everything is pure functions over byte buffers, so the
//! transport layer in `fflink-client` can be tested against it in isolation.

pub mod codec;
pub mod command;
pub mod error;
pub mod packet;
pub mod parse;

pub use codec::{Decoder, ResponseUnit};
pub use command::{Axis, Command};
pub use error::ProtocolError;
pub use packet::{DataPacket, CHUNK_SIZE, PACKET_MAGIC};
pub use parse::{
    EndstopReport, HeadPosition, HeaterReading, PrinterInfo, ProgressReport, Reply,
    TemperatureReport,
};

/// TCP port the Finder firmware listens on.
pub const DEFAULT_PORT: u16 = 8899;

/// Prefix marker every command frame starts with.
pub const FRAME_PREFIX: u8 = b'~';

/// Line terminator for command frames.
pub const FRAME_TERMINATOR: &str = "\r\n";

/// Completion token closing every response unit (matched case-insensitively
/// on its own line).
pub const ACK_TOKEN: &str = "ok";

/// Longest filename the firmware accepts for uploads, in bytes.
pub const MAX_FILENAME_LEN: usize = 36;
