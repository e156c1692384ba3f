//! Physical links between the server and the client machine.
//!
//! A [`Transport`] moves raw bytes. It latches the first failure of a command
//! so that handlers can issue a whole frame worth of `getb`/`sendb` calls and
//! check [`Transport::done`] once. [`Wire`] sits on top of a transport and keeps
//! the running frame checksum.

use {
    crate::{crc::Crc8, utils::Result},
    async_trait::async_trait,
};

pub mod serial;
pub mod tcp;
pub mod udp;

pub use {serial::SerialTransport, tcp::TcpTransport, udp::UdpTransport};

/// How frames are delimited on a link.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// Reliable byte stream: trailers and optional CRC, replies batched.
    Stream,
    /// Serial line: like `Stream`, with a go-ahead before every read sector
    /// and a flushed reply after every written sector.
    Serial,
    /// One packet per request and reply: no trailers, no CRC, and single
    /// byte replies are doubled.
    Datagram,
}

#[async_trait]
/// Byte transport consumed by the protocol engine.
///
/// Reads return `None` and writes are dropped once an error is latched; the
/// latched error is reported by [`done`](Self::done) and cleared by the next
/// [`wait`](Self::wait).
pub trait Transport: Send {
    /// Short driver name for log messages.
    fn name(&self) -> &'static str;

    /// Framing rules of the link.
    fn flavor(&self) -> Flavor;

    /// Open the link. Called again after a failure or a shutdown.
    async fn initialize(&mut self) -> Result<()>;

    /// Block until the next opcode arrives.
    ///
    /// `event` is the trailer of the previous command, which some links echo
    /// before the next request.
    async fn wait(&mut self, event: u8) -> Result<u8>;

    /// Receive one byte.
    async fn getb(&mut self, use_timeout: bool) -> Option<u8>;

    /// Receive exactly `buf.len()` bytes or latch an error.
    async fn getbytes(&mut self, buf: &mut [u8]);

    async fn sendb(&mut self, byte: u8);

    async fn sendbytes(&mut self, data: &[u8]);

    /// Push buffered output to the peer.
    async fn flush(&mut self) -> Result<()>;

    /// Report the latched error, if any.
    fn done(&self) -> Result<()>;

    /// Switch the direction of a half duplex link.
    fn turn(&mut self) {}

    /// Drop pending input and output after an aborted command.
    ///
    /// Returns `true` when the abort was caused by a timeout.
    async fn clean(&mut self) -> bool;

    async fn shutdown(&mut self);
}

/// A transport with the running frame checksum.
///
/// Every byte that passes through is added to the checksum, in both directions.
pub struct Wire<T> {
    transport: T,
    crc: Crc8,
}

impl<T: Transport> Wire<T> {
    pub fn new(transport: T) -> Wire<T> {
        Wire {
            transport,
            crc: Crc8::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn flavor(&self) -> Flavor {
        self.transport.flavor()
    }

    pub fn crc_clear(&mut self, seed: u8) {
        self.crc.clear(seed);
    }

    pub fn crc(&self) -> u8 {
        self.crc.get()
    }

    pub async fn wait(&mut self, event: u8) -> Result<u8> {
        let opcode = self.transport.wait(event).await?;
        self.crc.add_byte(opcode);
        Ok(opcode)
    }

    pub async fn getb(&mut self, use_timeout: bool) -> Option<u8> {
        let byte = self.transport.getb(use_timeout).await;
        if let Some(b) = byte {
            self.crc.add_byte(b);
        }
        byte
    }

    pub async fn getbytes(&mut self, buf: &mut [u8]) {
        self.transport.getbytes(buf).await;
        self.crc.add_block(buf);
    }

    pub async fn sendb(&mut self, byte: u8) {
        self.crc.add_byte(byte);
        self.transport.sendb(byte).await;
    }

    pub async fn sendbytes(&mut self, data: &[u8]) {
        self.crc.add_block(data);
        self.transport.sendbytes(data).await;
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.transport.flush().await
    }

    pub fn done(&self) -> Result<()> {
        self.transport.done()
    }

    pub fn turn(&mut self) {
        self.transport.turn();
    }

    pub async fn clean(&mut self) -> bool {
        self.transport.clean().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryTransport;

    #[tokio::test]
    async fn checksum_covers_both_directions() {
        let mut wire = Wire::new(MemoryTransport::new(Flavor::Stream, &[b'N', 1, 2]));
        wire.crc_clear(0);
        assert_eq!(wire.wait(0x5a).await.unwrap(), b'N');
        assert_eq!(wire.getb(false).await, Some(1));
        let mut buf = [0u8; 1];
        wire.getbytes(&mut buf).await;
        wire.sendb(3).await;

        let mut expected = Crc8::new();
        expected.add_block(&[b'N', 1, 2, 3]);
        assert_eq!(wire.crc(), expected.get());
        assert_eq!(wire.transport().output(), &[3]);
    }

    #[tokio::test]
    async fn exhausted_input_latches() {
        let mut wire = Wire::new(MemoryTransport::new(Flavor::Serial, &[7]));
        assert_eq!(wire.getb(false).await, Some(7));
        assert!(wire.done().is_ok());
        assert_eq!(wire.getb(false).await, None);
        assert!(wire.done().is_err());
    }
}
