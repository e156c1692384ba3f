#![forbid(unsafe_code)]
//! Asynchronous PCLink file server library for Rust.
//!
//! This crate serves a directory of the host to an IDE64 equipped C64 (or an
//! emulator) over the PCLink protocol. The client sees sixteen CBM style
//! channels, up to 255 partitions and a command channel that speaks a small
//! DOS dialect, while the server maps all of it onto ordinary host files.
//!
//! # Overview
//!
//! Two command families share one wire:
//!
//! - The **Normal** family moves whole 512 byte sectors, reports a file
//!   length on open and can checksum every frame with CRC-8.
//! - The **Compat** family moves bytes in small blocks with a per block
//!   status and never truncates on close.
//!
//! Names travel in PETSCII. Host names are converted, shortened to sixteen
//! symbols when needed and split into a name and a three letter type
//! according to a [`name::NameConversion`] policy.
//!
//! # Getting Started
//!
//! 1. Pick a transport: [`TcpTransport`] for an emulator, [`UdpTransport`]
//!    for the ETH64 cartridge or [`SerialTransport`] for an RS-232 cable
//! 2. Build a [`Session`] with a [`Config`] naming the served root
//! 3. Initialize the transport and call [`Session::serve`]
//!
//! # Example
//!
//! ```no_run
//! use pclink::{Config, Session, TcpTransport, Transport, name::NameConversion};
//!
//! # async fn run() -> pclink::Result<()> {
//! let config = Config {
//!     root: "/srv/c64".into(),
//!     conversion: NameConversion::ForceDot,
//! };
//! let mut session = Session::new(TcpTransport::new(None, None), config);
//! session.transport_mut().initialize().await?;
//! session.serve().await
//! # }
//! ```
//!
//! # Error Handling
//!
//! Host failures surface as [`Error`], which always carries an errno. The
//! engine translates them into CBM DOS error codes on the status line (see
//! [`status`]) so that the client can read them from channel 15. An `Err`
//! only leaves [`Session::serve`] when the transport stops delivering opcodes.

#[macro_use]
pub mod utils;

pub mod channel;
pub mod command;
pub mod crc;
pub mod directory;
pub mod error;
pub mod fcall;
pub mod listing;
pub mod name;
pub mod partition;
pub mod path;
pub mod petscii;
pub mod serialize;
pub mod shorten;
pub mod srv;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use crate::error::Error;
pub use crate::error::errno;
pub use crate::fcall::*;
pub use crate::srv::{Config, Session};
pub use crate::transport::*;
pub use crate::utils::Result;
