//! The PCLink session engine.
//!
//! # Protocol
//! The client drives everything: the server waits for an opcode, reads the rest
//! of the request, acts on the host filesystem and replies. A request that
//! breaks framing aborts with an `Err`; the session cleans the transport and
//! waits for the next opcode with channel and partition state untouched.

use {
    crate::{
        channel::{Channel, ChannelMode},
        error::errno::*,
        fcall::*,
        name::NameConversion,
        partition::PartitionTable,
        res,
        status::{ErrorCode, StatusLine},
        transport::{Flavor, Transport, Wire},
        utils::Result,
    },
    enum_primitive::FromPrimitive,
    log::{debug, info, warn},
    std::{borrow::Cow, path::PathBuf},
};

mod compat;
mod normal;
mod open;

/// What a session serves and how names are translated.
#[derive(Clone, Debug)]
pub struct Config {
    /// Host directory that partition paths are relative to
    pub root: PathBuf,
    pub conversion: NameConversion,
}

/// A client connection: sixteen channels, the partition table and channel 15.
pub struct Session<T> {
    pub(crate) wire: Wire<T>,
    pub(crate) channels: [Channel; CHANNELS],
    pub(crate) partitions: PartitionTable,
    pub(crate) status: StatusLine,
    pub(crate) config: Config,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: Config) -> Session<T> {
        let mut channels: [Channel; CHANNELS] = std::array::from_fn(|_| Channel::default());
        channels[COMMAND_CHANNEL as usize].mode = ChannelMode::Error;
        Session {
            wire: Wire::new(transport),
            channels,
            partitions: PartitionTable::new(),
            status: StatusLine::new(),
            config,
        }
    }

    pub fn transport(&self) -> &T {
        self.wire.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.wire.transport_mut()
    }

    pub fn partitions(&self) -> &PartitionTable {
        &self.partitions
    }

    pub fn partitions_mut(&mut self) -> &mut PartitionTable {
        &mut self.partitions
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn channel(&self, channel: u8) -> &Channel {
        &self.channels[(channel & 0x0f) as usize]
    }

    /// Serve requests until the transport fails to deliver an opcode.
    pub async fn serve(&mut self) -> Result<()> {
        let mut event = NORMAL_TRAILER;
        loop {
            event = self.step(event).await?;
        }
    }

    /// Wait for one request and handle it.
    ///
    /// Returns the event byte for the next wait. Only a failing wait is an error;
    /// an aborted request is cleaned up here.
    pub async fn step(&mut self, event: u8) -> Result<u8> {
        self.wire.crc_clear(0);
        let byte = self.wire.wait(event).await?;

        let Some(opcode) = Opcode::from_u8(byte) else {
            warn!("Unknown command {:02X}", byte);
            self.resync().await;
            return Ok(event);
        };
        if opcode == Opcode::Idle {
            return Ok(event);
        }
        if !opcode.uses_crc() {
            self.wire.crc_clear(0xff);
        }

        if let Err(e) = self.dispatch(opcode).await {
            debug!("{:?}: aborted: {}", opcode, e);
            self.resync().await;
        }
        Ok(opcode.event())
    }

    async fn dispatch(&mut self, opcode: Opcode) -> Result<()> {
        use crate::fcall::Opcode::*;

        let crc = opcode.uses_crc();
        match opcode {
            Open | OpenCrc => self.open(crc).await,
            Read | ReadCrc => self.read(crc).await,
            Write | WriteCrc => self.write(crc, false).await,
            WritePadded => self.write(false, true).await,
            Close | CloseCrc => self.close(crc).await,
            Status | StatusCrc => self.status_request(crc).await,
            CompatOpen | CompatOpenCrc => self.compat_open(crc).await,
            CompatRead | CompatReadCrc => self.compat_read(crc).await,
            CompatWrite | CompatWriteCrc => self.compat_write(crc).await,
            CompatClose | CompatCloseCrc => self.compat_close(crc).await,
            Idle => Ok(()),
        }
    }

    async fn resync(&mut self) {
        if self.wire.clean().await {
            info!("Timeout");
        }
    }

    fn is_datagram(&self) -> bool {
        self.wire.flavor() == Flavor::Datagram
    }

    /// Read a NUL terminated request string.
    ///
    /// The flag is false when the string was cut short by the transport or by
    /// the length limit.
    async fn read_request(&mut self) -> (Vec<u8>, bool) {
        let mut request = Vec::with_capacity(MAX_REQUEST);
        while request.len() < MAX_REQUEST {
            match self.wire.getb(false).await {
                Some(0) => return (request, true),
                Some(c) => request.push(c),
                None => break,
            }
        }
        (request, false)
    }

    /// Consume the CRC byte and trailer that end a request.
    async fn expect_trailer(&mut self, what: &str, crc: bool, trailer: u8) -> Result<()> {
        let mut checksum = 0;
        if crc {
            self.wire.getb(false).await;
            checksum = self.wire.crc();
        }
        let frame = self.wire.getb(false).await;
        self.check_frame(what, frame, trailer, checksum)
    }

    /// Validate a received trailer and the checksum accumulated before it.
    fn check_frame(&mut self, what: &str, frame: Option<u8>, trailer: u8, checksum: u8) -> Result<()> {
        self.wire.done()?;
        if frame != Some(trailer) {
            return self.frame_error(what);
        }
        if checksum != 0 {
            self.status.set(ErrorCode::CrcError, 1);
            warn!("{}: CRC error", what);
            return res!(EBADMSG);
        }
        Ok(())
    }

    fn frame_error(&mut self, what: &str) -> Result<()> {
        self.status.set(ErrorCode::FrameError, 1);
        warn!("{}: Frame error", what);
        res!(EPROTO)
    }

    /// End of a Normal request carrying a string.
    async fn request_end(&mut self, what: &str, crc: bool, terminated: bool) -> Result<()> {
        if self.is_datagram() {
            return self.wire.done();
        }
        self.expect_trailer(what, crc, NORMAL_TRAILER).await?;
        if !terminated {
            return self.frame_error(what);
        }
        Ok(())
    }

    /// End of a fixed size Normal request.
    async fn header_end(&mut self, what: &str, crc: bool) -> Result<()> {
        if self.is_datagram() {
            return self.wire.done();
        }
        self.expect_trailer(what, crc, NORMAL_TRAILER).await
    }

    /// Send a complete one byte Normal reply.
    async fn status_reply(&mut self, code: ErrorCode, crc: bool) -> Result<()> {
        self.wire.crc_clear(0);
        self.wire.reply(0x80 | code as u8).await;
        self.wire.end_reply(crc).await
    }

    /// Write the first `len` staged bytes of a channel through to its file.
    async fn commit(&mut self, slot: usize, len: usize) -> Result<()> {
        let channel = &mut self.channels[slot];
        channel.write_staged(0..len).await?;
        channel.flush().await?;
        Ok(())
    }

    /// Where the next read of a listing or of the status line starts.
    fn read_pointer(&self, slot: usize) -> usize {
        match self.channels[slot].mode {
            ChannelMode::Error => self.status.pointer(),
            _ => self.channels[slot].pointer(),
        }
    }

    /// Length of what a listing or status read serves.
    fn readable_len(&self, slot: usize) -> usize {
        match self.channels[slot].mode {
            ChannelMode::Error => self.status.as_bytes().len() + 1,
            _ => self.channels[slot].len(),
        }
    }

    fn advance(&mut self, slot: usize, n: usize) {
        match self.channels[slot].mode {
            ChannelMode::Error => self.status.advance(n),
            _ => self.channels[slot].advance(n),
        }
    }
}

impl<T: Transport> Wire<T> {
    /// Send a one byte reply, twice on datagram links.
    pub(crate) async fn reply(&mut self, byte: u8) {
        self.sendb(byte).await;
        if self.flavor() == Flavor::Datagram {
            self.sendb(byte).await;
        }
    }

    /// Append the CRC byte, when asked, and the Normal trailer.
    pub(crate) async fn trailer(&mut self, crc: bool) {
        if crc {
            let checksum = self.crc();
            self.sendb(checksum).await;
        }
        self.sendb(NORMAL_TRAILER).await;
    }

    /// Finish a Normal reply and flush it.
    pub(crate) async fn end_reply(&mut self, crc: bool) -> Result<()> {
        if self.flavor() != Flavor::Datagram {
            self.trailer(crc).await;
        }
        self.flush().await
    }
}

/// `len` bytes of what a read of `channel` serves from `offset`.
///
/// File modes serve the staging area, `Error` serves the status readout and
/// `Directory` the listing.
pub(crate) fn chunk<'a>(channel: &'a Channel, status: &StatusLine, offset: usize, len: usize) -> Cow<'a, [u8]> {
    match channel.mode {
        ChannelMode::File | ChannelMode::CompatFile => Cow::Borrowed(channel.staged(len)),
        ChannelMode::Error => Cow::Owned(window(&status.readout(), offset, len).into_owned()),
        _ => window(channel.data(), offset, len),
    }
}

/// `len` bytes of `data` from `offset`, zero filled past its end.
pub(crate) fn window(data: &[u8], offset: usize, len: usize) -> Cow<'_, [u8]> {
    match data.get(offset..offset + len) {
        Some(slice) => Cow::Borrowed(slice),
        None => {
            let mut out = vec![0u8; len];
            if let Some(rest) = data.get(offset..) {
                out[..rest.len()].copy_from_slice(rest);
            }
            Cow::Owned(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crc::Crc8, testutil::MemoryTransport};
    use tempfile::TempDir;

    pub(super) fn session(flavor: Flavor, root: &std::path::Path) -> Session<MemoryTransport> {
        Session::new(
            MemoryTransport::new(flavor, &[]),
            Config {
                root: root.to_path_buf(),
                conversion: NameConversion::ForceDot,
            },
        )
    }

    /// Run one request and return what was sent back.
    pub(super) async fn exchange(session: &mut Session<MemoryTransport>, event: u8, request: &[u8]) -> Vec<u8> {
        session.transport_mut().push(request);
        session.step(event).await.unwrap();
        assert_eq!(session.transport().remaining(), 0, "request not fully consumed");
        session.transport_mut().take_output()
    }

    #[test]
    fn windows() {
        assert_eq!(&*window(b"abcdef", 1, 3), b"bcd");
        assert_eq!(&*window(b"abc", 2, 3), &[b'c', 0, 0]);
        assert_eq!(&*window(b"abc", 5, 2), &[0, 0]);
    }

    #[tokio::test]
    async fn starts_with_identification() {
        let tmp = TempDir::new().unwrap();
        let session = session(Flavor::Stream, tmp.path());
        assert!(session.status().as_bytes().starts_with(b"73, PCLINK "));
        assert_eq!(session.channel(COMMAND_CHANNEL).mode, ChannelMode::Error);
        assert_eq!(session.channel(2).mode, ChannelMode::Closed);
    }

    #[tokio::test]
    async fn idle_and_unknown_opcodes() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        assert!(exchange(&mut session, 0x5a, &[0x00]).await.is_empty());
        session.transport_mut().push(&[0x99, 1, 2, 3]);
        assert_eq!(session.step(0).await.unwrap(), 0);
        // The unknown opcode drained the rest
        assert_eq!(session.transport().remaining(), 0);
        assert!(session.transport().output().is_empty());
    }

    #[tokio::test]
    async fn failing_wait_ends_serving() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        assert_eq!(session.serve().await.unwrap_err().errno(), ENODEV);
    }

    #[tokio::test]
    async fn checksummed_status_request() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let mut request = vec![0xc9, 0x0f];
        request.extend_from_slice(b"I\0");
        let mut crc = Crc8::new();
        crc.add_block(&request);
        request.push(crc.get());
        request.push(NORMAL_TRAILER);

        let reply = exchange(&mut session, 0x5a, &request).await;
        let text = b"00, OK,000,000,000,000";
        assert_eq!(reply[0] as usize, text.len());
        assert_eq!(&reply[1..1 + text.len()], text);
        let mut crc = Crc8::new();
        crc.add_block(&reply[..1 + text.len()]);
        assert_eq!(&reply[1 + text.len()..], &[crc.get(), NORMAL_TRAILER]);
    }

    #[tokio::test]
    async fn empty_status_request_keeps_status() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        session.command(b"XYZ").await;

        let reply = exchange(&mut session, 0x5a, &[0x49, 0x0f, 0, NORMAL_TRAILER]).await;
        let text = b"31, UNKNOWN COMMAND,000,000,000,000";
        assert_eq!(reply[0] as usize, text.len());
        assert_eq!(&reply[1..1 + text.len()], text);
    }

    #[tokio::test]
    async fn bad_checksum_is_reported() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        let reply = exchange(&mut session, 0x5a, &[0xc9, 0x0f, b'I', 0, 0x00, NORMAL_TRAILER]).await;
        assert!(reply.is_empty());
        assert!(session.status().as_bytes().starts_with(b"42, CRC ERROR,001"));
    }
}
