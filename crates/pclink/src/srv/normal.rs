//! Normal command family: sector based transfers with explicit status replies.

use {
    super::{Session, chunk, open::Family},
    crate::{
        channel::ChannelMode,
        error::Error,
        fcall::*,
        serialize::{Decoder, Encodable, Encoder},
        status::ErrorCode,
        transport::{Flavor, Transport},
        utils::Result,
    },
    log::{debug, info, warn},
    std::time::Instant,
};

fn valid_count(sectors: u8, datagram: bool) -> bool {
    let limit = if datagram { MAX_DATAGRAM_SECTORS } else { MAX_SECTORS };
    (1..=limit).contains(&sectors)
}

fn advance_position(position: Option<u32>, units: u32) -> Option<u32> {
    position.map(|p| p.wrapping_add(units))
}

impl<T: Transport> Session<T> {
    pub(super) async fn open(&mut self, crc: bool) -> Result<()> {
        let ch = self.wire.getb(true).await.unwrap_or(0) & 0x0f;
        let (request, terminated) = self.read_request().await;
        self.request_end("Open", crc, terminated).await?;
        debug!("Open: {:?}", String::from_utf8_lossy(&request));

        let start = Instant::now();
        let slot = ch as usize;
        self.channels[slot].reset();

        let (code, open_mode, length) = if ch == COMMAND_CHANNEL {
            self.channels[slot].mode = ChannelMode::Error;
            (ErrorCode::Ok, mode::READ, 0)
        } else if let Some(filter) = request.strip_prefix(b"$") {
            let code = self.open_listing(ch, filter, Family::Normal).await;
            let length = u32::try_from(self.channels[slot].len()).unwrap_or(u32::MAX);
            (code, mode::READ, length)
        } else {
            self.open_file(ch, &request, Family::Normal).await
        };
        debug!("Open: Took {:?}", start.elapsed());

        let status = 0x80 | code as u8;
        let mut reply = Vec::with_capacity(6);
        if self.is_datagram() {
            (Encoder::new(&mut reply) << &length << &open_mode << &status).bytes_written()?;
        } else {
            OpenReply {
                status,
                mode: open_mode,
                length,
            }
            .encode(&mut reply)?;
        }
        self.wire.crc_clear(0);
        self.wire.sendbytes(&reply).await;
        self.wire.end_reply(crc).await
    }

    pub(super) async fn read(&mut self, crc: bool) -> Result<()> {
        let mut header = [0u8; 5];
        self.wire.getbytes(&mut header).await;
        self.header_end("Read", crc).await?;
        let SectorRequest {
            channel: ch,
            address,
            sectors,
        } = Decoder::new(&header[..]).decode::<SectorRequest>()?;
        debug!("Read #{}: {:06x} {} sector(s)", ch, address, sectors);

        let datagram = self.is_datagram();
        let slot = ch as usize;
        if !valid_count(sectors, datagram) {
            warn!("Read: Invalid sector count");
            return self.status_reply(ErrorCode::ReadError, crc).await;
        }
        if !self.channels[slot].is_sector_readable() {
            if self.channels[slot].mode == ChannelMode::Closed {
                warn!("Read: Channel not open");
            } else {
                warn!("Read: Not readable");
            }
            return self.status_reply(ErrorCode::NoChannel, crc).await;
        }

        if self.channels[slot].mode == ChannelMode::File {
            let staging = if datagram {
                sectors as usize * SECTOR_SIZE
            } else {
                SECTOR_SIZE
            };
            let channel = &mut self.channels[slot];
            if let Err(e) = channel.reserve(staging) {
                warn!("Read: {}", e);
                return self.status_reply(ErrorCode::ReadError, crc).await;
            }
            if channel.file_position != Some(address) {
                if let Err(e) = channel.seek(u64::from(address) << 8).await {
                    channel.file_position = None;
                    warn!("Read: Couldn't seek: {}", e);
                    return self.status_reply(ErrorCode::ReadError, crc).await;
                }
            }
            channel.file_position = Some(address);
        }

        if datagram {
            let len = sectors as usize * SECTOR_SIZE;
            let code = if self.fill(slot, len).await {
                ErrorCode::Ok
            } else {
                ErrorCode::ReadError
            };
            let offset = self.read_pointer(slot);
            let data = chunk(&self.channels[slot], &self.status, offset, len);
            self.wire.sendbytes(&data).await;
            self.wire.reply(0x80 | code as u8).await;
            self.advance(slot, len);
            return self.wire.end_reply(crc).await;
        }

        let serial = self.wire.flavor() == Flavor::Serial;
        self.wire.crc_clear(0);
        self.wire.sendb(0x80 | ErrorCode::Ok as u8).await;
        if serial {
            self.wire.end_reply(crc).await?;
        } else {
            self.wire.trailer(crc).await;
        }

        let start = Instant::now();
        let mut sent = 0;
        for _ in 0..sectors {
            let ok = self.fill(slot, SECTOR_SIZE).await;
            if serial {
                let go = self.wire.getb(true).await;
                self.check_frame("Read", go, NORMAL_TRAILER, 0)?;
            }

            self.wire.crc_clear(0);
            let offset = self.read_pointer(slot);
            let data = chunk(&self.channels[slot], &self.status, offset, SECTOR_SIZE);
            self.wire.sendbytes(&data).await;
            let code = if ok { ErrorCode::Ok } else { ErrorCode::ReadError };
            self.wire.sendb(0x80 | code as u8).await;
            if serial {
                self.wire.end_reply(crc).await?;
            } else {
                self.wire.trailer(crc).await;
            }
            if !ok {
                break;
            }
            self.advance(slot, SECTOR_SIZE);
            sent += SECTOR_SIZE;
        }
        if !serial {
            self.wire.flush().await?;
        }
        debug!("Read: Sent {} bytes in {:?}", sent, start.elapsed());
        Ok(())
    }

    /// Load the next `len` bytes of a file channel into its staging area.
    ///
    /// Other modes serve from memory and always succeed.
    async fn fill(&mut self, slot: usize, len: usize) -> bool {
        let channel = &mut self.channels[slot];
        if channel.mode != ChannelMode::File {
            return true;
        }
        match channel.read_staged(len).await {
            Ok(n) => {
                let units = n.div_ceil(SECTOR_SIZE) * 2;
                channel.file_position = advance_position(channel.file_position, units as u32);
                true
            }
            Err(e) => {
                channel.file_position = None;
                warn!("Read: Couldn't read: {}", e);
                false
            }
        }
    }

    /// `S` and `P` requests. Padded sectors carry an extra byte before the trailer.
    pub(super) async fn write(&mut self, crc: bool, padded: bool) -> Result<()> {
        let mut header = [0u8; 5];
        self.wire.getbytes(&mut header).await;
        self.header_end("Write", crc).await?;
        let SectorRequest {
            channel: ch,
            address,
            sectors,
        } = Decoder::new(&header[..]).decode::<SectorRequest>()?;
        debug!("Write #{}: {:06x} {} sector(s)", ch, address, sectors);

        let datagram = self.is_datagram();
        let slot = ch as usize;
        if !valid_count(sectors, datagram) {
            warn!("Write: Invalid sector count");
            return self.status_reply(ErrorCode::WriteError, crc).await;
        }
        if self.channels[slot].mode != ChannelMode::File || !self.channels[slot].has_file() {
            warn!("Write: Not writeable");
            return self.status_reply(ErrorCode::WriteError, crc).await;
        }

        let frame = if padded { SECTOR_SIZE + 2 } else { SECTOR_SIZE + 1 };
        let staging = if datagram {
            sectors as usize * SECTOR_SIZE
        } else {
            SECTOR_SIZE + 2
        };
        let channel = &mut self.channels[slot];
        if let Err(e) = channel.reserve(staging) {
            warn!("Write: {}", e);
            return self.status_reply(ErrorCode::WriteError, crc).await;
        }
        if channel.file_position != Some(address) {
            if let Err(e) = channel.seek(u64::from(address) << 8).await {
                channel.file_position = None;
                warn!("Write: Couldn't seek: {}", e);
                return self.status_reply(ErrorCode::WriteError, crc).await;
            }
        }
        channel.file_position = Some(address);

        if datagram {
            let len = sectors as usize * SECTOR_SIZE;
            let buf = self.channels[slot].staging(len)?;
            self.wire.getbytes(buf).await;
            self.wire.done()?;
            let code = match self.commit(slot, len).await {
                Ok(()) => {
                    let channel = &mut self.channels[slot];
                    channel.file_position = advance_position(channel.file_position, sectors as u32 * 2);
                    ErrorCode::Ok
                }
                Err(e) => self.write_failed(slot, &e),
            };
            return self.status_reply(code, crc).await;
        }

        let serial = self.wire.flavor() == Flavor::Serial;
        self.wire.crc_clear(0);
        self.wire.turn();
        self.wire.sendb(0x80 | ErrorCode::Ok as u8).await;
        self.wire.end_reply(crc).await?;

        let start = Instant::now();
        let mut failure: Option<Error> = None;
        for remaining in (0..sectors).rev() {
            self.wire.crc_clear(0);
            let buf = self.channels[slot].staging(frame)?;
            self.wire.getbytes(buf).await;
            let (trailer, checksum) = if crc {
                let checksum = self.wire.crc();
                (self.wire.getb(true).await, checksum)
            } else {
                (self.channels[slot].staged(frame).last().copied(), 0)
            };
            self.check_frame("Write", trailer, NORMAL_TRAILER, checksum)?;

            if failure.is_none() {
                if let Err(e) = self.channels[slot].write_staged(0..SECTOR_SIZE).await {
                    failure = Some(e.into());
                }
            }
            let channel = &mut self.channels[slot];
            channel.file_position = advance_position(channel.file_position, 2);

            if remaining == 0 || serial {
                if failure.is_none() {
                    if let Err(e) = self.channels[slot].flush().await {
                        failure = Some(e.into());
                    }
                }
                let code = match &failure {
                    None => ErrorCode::Ok,
                    Some(e) => self.write_failed(slot, e),
                };
                self.status_reply(code, crc).await?;
                if failure.is_some() {
                    break;
                }
            }
        }
        debug!("Write: Received {} sector(s) in {:?}", sectors, start.elapsed());
        Ok(())
    }

    fn write_failed(&mut self, slot: usize, e: &Error) -> ErrorCode {
        self.channels[slot].file_position = None;
        warn!("Write: Couldn't write: {}", e);
        self.status.set_error(e)
    }

    pub(super) async fn close(&mut self, crc: bool) -> Result<()> {
        let mut header = [0u8; 5];
        self.wire.getbytes(&mut header).await;
        self.header_end("Close", crc).await?;
        let CloseRequest { channel: ch, length } = Decoder::new(&header[..]).decode::<CloseRequest>()?;
        info!("Close #{}: {} byte(s)", ch, length);

        let channel = &mut self.channels[ch as usize];
        if ch == COMMAND_CHANNEL {
            channel.mode = ChannelMode::Error;
        } else {
            if channel.has_file() {
                if channel.mode == ChannelMode::File && u64::from(length) >= channel.file_size {
                    if let Err(e) = channel.set_len(u64::from(length)).await {
                        warn!("Close: Couldn't truncate: {}", e);
                    }
                }
                if let Err(e) = channel.flush().await {
                    warn!("Close: {}", e);
                }
            }
            channel.release();
        }
        self.status_reply(ErrorCode::Ok, crc).await
    }

    /// `I` requests: run a command and return the status line.
    pub(super) async fn status_request(&mut self, crc: bool) -> Result<()> {
        self.wire.getb(true).await;
        let (command, terminated) = self.read_request().await;
        self.request_end("Status", crc, terminated).await?;
        debug!("Status: {:?}", String::from_utf8_lossy(&command));

        let start = Instant::now();
        // an empty request only reads the status line
        if !command.is_empty() {
            self.command(&command).await;
        }
        debug!("Status: Took {:?}", start.elapsed());

        self.wire.crc_clear(0);
        let len = self.status.as_bytes().len().min(u8::MAX as usize);
        self.wire.reply(len as u8).await;
        self.wire.sendbytes(&self.status.as_bytes()[..len]).await;
        self.wire.end_reply(crc).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{exchange, session};
    use super::*;
    use crate::crc::Crc8;
    use tempfile::TempDir;

    fn open_request(ch: u8, name: &[u8]) -> Vec<u8> {
        let mut request = vec![b'N', ch];
        request.extend_from_slice(name);
        request.extend_from_slice(&[0, NORMAL_TRAILER]);
        request
    }

    fn sector_request(opcode: u8, ch: u8, address: u32, sectors: u8) -> Vec<u8> {
        let a = address.to_le_bytes();
        vec![opcode, ch, a[0], a[1], a[2], sectors, NORMAL_TRAILER]
    }

    fn close_request(ch: u8, length: u32) -> Vec<u8> {
        let mut request = vec![b'D', ch];
        request.extend_from_slice(&length.to_le_bytes());
        request.push(NORMAL_TRAILER);
        request
    }

    #[tokio::test]
    async fn open_and_read_a_file() {
        let tmp = TempDir::new().unwrap();
        let content: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        std::fs::write(tmp.path().join("game.prg"), &content).unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0x5a, &open_request(2, b"GAME")).await;
        assert_eq!(reply, [0x80, b'R', 0x58, 0x02, 0, 0, NORMAL_TRAILER]);
        assert_eq!(session.channel(2).mode, ChannelMode::File);
        assert!(session.status().as_bytes().starts_with(b"00, OK"));

        let reply = exchange(&mut session, 0x5a, &sector_request(b'G', 2, 0, 2)).await;
        assert_eq!(&reply[..2], &[0x80, NORMAL_TRAILER]);
        let first = &reply[2..2 + SECTOR_SIZE + 2];
        assert_eq!(&first[..SECTOR_SIZE], &content[..SECTOR_SIZE]);
        assert_eq!(&first[SECTOR_SIZE..], &[0x80, NORMAL_TRAILER]);
        let second = &reply[4 + SECTOR_SIZE..];
        assert_eq!(second.len(), SECTOR_SIZE + 2);
        assert_eq!(&second[..88], &content[SECTOR_SIZE..]);
        assert!(second[88..SECTOR_SIZE].iter().all(|&b| b == 0));
        assert_eq!(session.channel(2).file_position, Some(4));
        assert_eq!(session.transport().flushes(), 2);
    }

    #[tokio::test]
    async fn missing_file_leaves_channel_closed() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0x5a, &open_request(2, b"NOPE")).await;
        assert_eq!(reply[0], 0x80 | ErrorCode::FileNotFound as u8);
        assert_eq!(session.channel(2).mode, ChannelMode::Closed);
        assert_eq!(session.status().as_bytes(), b"62, FILE NOT FOUND,000,000,000,000");

        let reply = exchange(&mut session, 0x5a, &sector_request(b'G', 2, 0, 1)).await;
        assert_eq!(reply, [0x80 | ErrorCode::NoChannel as u8, NORMAL_TRAILER]);
    }

    #[tokio::test]
    async fn write_then_close_truncates() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0x5a, &open_request(3, b"OUT,S,W")).await;
        assert_eq!(reply, [0x80, b'W', 0, 0, 0, 0, NORMAL_TRAILER]);

        let mut request = sector_request(b'S', 3, 0, 2);
        for fill in [0x11u8, 0x22] {
            request.extend_from_slice(&[fill; SECTOR_SIZE]);
            request.push(NORMAL_TRAILER);
        }
        let reply = exchange(&mut session, 0x5a, &request).await;
        assert_eq!(reply, [0x80, NORMAL_TRAILER, 0x80, NORMAL_TRAILER]);

        let reply = exchange(&mut session, 0x5a, &close_request(3, 700)).await;
        assert_eq!(reply, [0x80, NORMAL_TRAILER]);
        assert_eq!(session.channel(3).mode, ChannelMode::Closed);
        assert_eq!(session.channel(3).capacity(), 0);

        let written = std::fs::read(tmp.path().join("out.seq")).unwrap();
        assert_eq!(written.len(), 700);
        assert!(written[..SECTOR_SIZE].iter().all(|&b| b == 0x11));
        assert!(written[SECTOR_SIZE..].iter().all(|&b| b == 0x22));
    }

    #[tokio::test]
    async fn existing_file_is_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("keep.prg"), b"data").unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0x5a, &open_request(1, b"KEEP")).await;
        assert_eq!(reply[0], 0x80 | ErrorCode::FileExists as u8);
        let reply = exchange(&mut session, 0x5a, &open_request(1, b"@:KEEP")).await;
        assert_eq!(reply[..2], [0x80, b'W']);
        assert_eq!(std::fs::read(tmp.path().join("keep.prg")).unwrap(), b"");
    }

    #[tokio::test]
    async fn wildcards_are_rejected_for_new_files() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        let reply = exchange(&mut session, 0x5a, &open_request(1, b"A*B")).await;
        assert_eq!(reply[0], 0x80 | ErrorCode::InvalidFilename as u8);
        assert_eq!(session.status().code(), ErrorCode::InvalidFilename);
    }

    #[tokio::test]
    async fn empty_directory_listing() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0x5a, &open_request(0, b"$")).await;
        assert_eq!(reply, [0x80, b'R', 0x00, 0x02, 0, 0, NORMAL_TRAILER]);
        let channel = session.channel(0);
        assert_eq!(channel.mode, ChannelMode::Directory);
        assert_eq!(channel.len(), SECTOR_SIZE);
        // header, trailer with a zero count, then padding
        assert_eq!(&channel.data()[32..36], &[1, 1, 0, 0]);
        assert!(channel.data()[64..].iter().all(|&b| b == 0));

        let reply = exchange(&mut session, 0x5a, &sector_request(b'G', 0, 0x1234, 1)).await;
        assert_eq!(&reply[2..2 + SECTOR_SIZE], &session.channel(0).data()[..]);
    }

    #[tokio::test]
    async fn listing_on_channel_one_is_refused() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        let reply = exchange(&mut session, 0x5a, &open_request(1, b"$")).await;
        assert_eq!(reply[0], 0x80 | ErrorCode::NoChannel as u8);
        assert_eq!(session.channel(1).mode, ChannelMode::Closed);
    }

    #[tokio::test]
    async fn status_channel_reads_the_status_line() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0x5a, &open_request(15, b"")).await;
        assert_eq!(reply, [0x80, b'R', 0, 0, 0, 0, NORMAL_TRAILER]);
        let reply = exchange(&mut session, 0x5a, &sector_request(b'G', 15, 0, 1)).await;
        let readout = session.status().readout();
        assert_eq!(&reply[2..2 + readout.len()], &readout[..]);
    }

    #[tokio::test]
    async fn bad_trailer_is_a_frame_error() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        let reply = exchange(&mut session, 0x5a, &[b'N', 2, b'X', 0, 0x00]).await;
        assert!(reply.is_empty());
        assert_eq!(session.status().as_bytes(), b"41, FRAME ERROR,001,000,000,000");
        assert_eq!(session.channel(2).mode, ChannelMode::Closed);
    }

    #[tokio::test]
    async fn checksummed_open() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.prg"), b"xyz").unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let mut request = vec![0xce, 2, b'A', 0];
        let mut crc = Crc8::new();
        crc.add_block(&request);
        request.push(crc.get());
        request.push(NORMAL_TRAILER);

        let reply = exchange(&mut session, 0x5a, &request).await;
        let body = [0x80, b'R', 3, 0, 0, 0];
        assert_eq!(&reply[..6], &body);
        let mut crc = Crc8::new();
        crc.add_block(&body);
        assert_eq!(&reply[6..], &[crc.get(), NORMAL_TRAILER]);
    }

    #[tokio::test]
    async fn invalid_sector_counts() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        let reply = exchange(&mut session, 0x5a, &sector_request(b'G', 0, 0, 0)).await;
        assert_eq!(reply, [0x80 | ErrorCode::ReadError as u8, NORMAL_TRAILER]);
        let reply = exchange(&mut session, 0x5a, &sector_request(b'S', 0, 0, 129)).await;
        assert_eq!(reply, [0x80 | ErrorCode::WriteError as u8, NORMAL_TRAILER]);
    }

    #[tokio::test]
    async fn datagram_open_reply_layout() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.prg"), vec![0u8; 300]).unwrap();
        let mut session = session(Flavor::Datagram, tmp.path());

        let reply = exchange(&mut session, 0x5a, &[b'N', 2, b'A', 0]).await;
        assert_eq!(reply, [0x2c, 0x01, 0, 0, b'R', 0x80]);

        let reply = exchange(&mut session, 0x5a, &[b'G', 2, 0, 0, 0, 3]).await;
        assert_eq!(reply, [0x80 | ErrorCode::ReadError as u8; 2]);

        let reply = exchange(&mut session, 0x5a, &[b'G', 2, 0, 0, 0, 1]).await;
        assert_eq!(reply.len(), SECTOR_SIZE + 2);
        assert_eq!(&reply[SECTOR_SIZE..], &[0x80, 0x80]);
    }

    #[tokio::test]
    async fn serial_read_waits_for_go_ahead() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.prg"), b"hello").unwrap();
        let mut session = session(Flavor::Serial, tmp.path());
        exchange(&mut session, 0x5a, &open_request(2, b"A")).await;

        let mut request = sector_request(b'G', 2, 0, 1);
        request.push(NORMAL_TRAILER);
        let reply = exchange(&mut session, 0x5a, &request).await;
        assert_eq!(&reply[..2], &[0x80, NORMAL_TRAILER]);
        assert_eq!(&reply[2..7], b"hello");
        assert_eq!(&reply[2 + SECTOR_SIZE..], &[0x80, NORMAL_TRAILER]);
    }

    #[tokio::test]
    async fn close_of_status_channel_keeps_it() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        exchange(&mut session, 0x5a, &close_request(15, 0)).await;
        assert_eq!(session.channel(15).mode, ChannelMode::Error);
    }
}
