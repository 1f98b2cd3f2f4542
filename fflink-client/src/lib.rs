//! # fflink-client
//!
//! Async TCP client for FlashForge Finder printers.
//!
//! This crate provides:
//! - [`Connection`]: socket lifecycle, handshake, deadline-bounded exchange
//! - [`Session`]: one-command-in-flight execution with timeout and retry
//! - [`Uploader`]: chunked file transfer with per-chunk integrity checking
//! - [`Client`]: one typed method per printer operation
//!
//! The firmware accepts exactly one command at a time and terminates the
//! interaction on malformed input, so everything funnels through a single
//! serialized [`Session`] per connection.

pub mod client;
pub mod connection;
pub mod error;
pub mod session;
pub mod upload;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, ConnectionState, Endpoint};
pub use error::ClientError;
pub use session::{ExecOptions, Session};
pub use upload::{UploadState, Uploader};
