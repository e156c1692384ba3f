//! Compat command family: byte streams with single status bytes.

use {
    super::{Session, chunk, open::Family},
    crate::{
        channel::ChannelMode,
        fcall::{COMMAND_CHANNEL, COMPAT_TRAILER, MAX_REQUEST, compat, mode},
        status::ErrorCode,
        transport::Transport,
        utils::Result,
    },
    log::{debug, info, warn},
    std::time::Instant,
};

impl<T: Transport> Session<T> {
    pub(super) async fn compat_open(&mut self, crc: bool) -> Result<()> {
        let ch = self.wire.getb(true).await.unwrap_or(0) & 0x0f;
        let (request, terminated) = self.read_request().await;
        let datagram = self.is_datagram();
        if crc && !datagram {
            self.expect_trailer("Open", crc, COMPAT_TRAILER).await?;
        } else {
            self.wire.done()?;
        }
        if !datagram && !terminated {
            return self.frame_error("Open");
        }
        debug!("Open: {:?}", String::from_utf8_lossy(&request));

        let slot = ch as usize;
        self.channels[slot].reset();

        let status = if ch == COMMAND_CHANNEL {
            self.channels[slot].mode = ChannelMode::Error;
            if !request.is_empty() {
                self.command(&request).await;
            }
            compat::STATUS
        } else if let Some(filter) = request.strip_prefix(b"$") {
            self.open_listing(ch, filter, Family::Compat).await;
            if self.channels[slot].mode == ChannelMode::Directory {
                compat::READ_ONLY
            } else {
                compat::ERROR
            }
        } else if request.is_empty() {
            compat::ERROR
        } else {
            let (_, open_mode, _) = self.open_file(ch, &request, Family::Compat).await;
            match (self.channels[slot].has_file(), open_mode) {
                (false, _) => compat::ERROR,
                (true, mode::READ) => compat::READ_ONLY,
                (true, _) => compat::WRITE_ONLY,
            }
        };

        self.wire.reply(status).await;
        self.wire.flush().await
    }

    pub(super) async fn compat_read(&mut self, crc: bool) -> Result<()> {
        let ch = self.wire.getb(true).await.unwrap_or(0) & 0x0f;
        let datagram = self.is_datagram();
        let count = if datagram {
            let r = self.wire.getb(false).await;
            self.wire.done()?;
            match r {
                Some(0) => 256,
                Some(n) => n as usize,
                None => return self.frame_error("Read"),
            }
        } else {
            let lo = self.wire.getb(false).await.unwrap_or(0);
            let hi = self.wire.getb(false).await.unwrap_or(0);
            self.expect_trailer("Read", crc, COMPAT_TRAILER).await?;
            match u16::from_le_bytes([lo, hi]) {
                0 => 0x10000,
                n => n as usize,
            }
        };
        debug!("Read #{}: {} bytes", ch, count);

        if !datagram {
            self.wire.sendb(0).await;
        }
        let slot = ch as usize;
        if !self.channels[slot].is_stream_readable() {
            if self.channels[slot].mode == ChannelMode::Closed {
                warn!("Read: Channel not open");
            } else {
                warn!("Read: Not readable");
            }
            return self.compat_read_failed(crc).await;
        }

        let (start, bytes, status) = if self.channels[slot].mode == ChannelMode::CompatFile {
            let channel = &mut self.channels[slot];
            let n = match channel.read_staged(count).await {
                Ok(n) => n,
                Err(e) => {
                    warn!("Read: {}", e);
                    return self.compat_read_failed(crc).await;
                }
            };
            let status = if n < count {
                compat::EOF
            } else if channel.at_eof().await.unwrap_or(false) {
                compat::LAST
            } else {
                compat::MORE
            };
            (0, n, status)
        } else {
            let start = self.read_pointer(slot);
            let left = self.readable_len(slot).saturating_sub(start);
            let (bytes, status) = if count == left {
                (count, compat::LAST)
            } else if count > left {
                (left, compat::EOF)
            } else {
                (count, compat::MORE)
            };
            self.advance(slot, bytes);
            (start, bytes, status)
        };

        let data = chunk(&self.channels[slot], &self.status, start, bytes);
        if datagram {
            self.wire.sendb(u8::from(bytes > 0)).await;
            self.wire.sendb(bytes as u8).await;
            let reversed: Vec<u8> = data.iter().rev().copied().collect();
            self.wire.sendbytes(&reversed).await;
            if bytes & 1 == 1 {
                self.wire.sendb(status).await;
            }
            self.wire.sendb(status).await;
            self.wire.sendb(status).await;
            self.wire.flush().await?;
        } else {
            let sending = Instant::now();
            self.wire.crc_clear(0);
            self.wire.sendbytes(&(!(bytes as u16)).to_le_bytes()).await;
            self.wire.sendbytes(&data).await;
            if crc {
                let checksum = self.wire.crc();
                self.wire.sendb(checksum).await;
            }
            self.wire.sendb(status).await;
            self.wire.flush().await?;
            debug!("Read: Sent {} bytes in {:?}", bytes, sending.elapsed());
        }

        if self.channels[slot].mode == ChannelMode::Error && self.status.pointer() >= self.readable_len(slot) {
            self.status.set(ErrorCode::Ok, 0);
        }
        Ok(())
    }

    async fn compat_read_failed(&mut self, crc: bool) -> Result<()> {
        self.wire.crc_clear(0);
        self.wire.sendb(0).await;
        self.wire.sendb(0).await;
        if !self.is_datagram() {
            if crc {
                let checksum = self.wire.crc();
                self.wire.sendb(checksum).await;
            }
            self.wire.sendb(0).await;
        }
        self.wire.flush().await
    }

    pub(super) async fn compat_write(&mut self, crc: bool) -> Result<()> {
        let ch = self.wire.getb(true).await.unwrap_or(0) & 0x0f;
        let lo = self.wire.getb(false).await.unwrap_or(0);
        let datagram = self.is_datagram();
        let count = if datagram {
            self.wire.getb(false).await;
            lo as usize
        } else {
            let hi = self.wire.getb(false).await.unwrap_or(0);
            self.expect_trailer("Write", crc, COMPAT_TRAILER).await?;
            u16::from_le_bytes([lo, hi]) as usize
        };
        debug!("Write #{}: {} bytes", ch, count);
        let slot = ch as usize;

        if self.channels[slot].mode == ChannelMode::Error {
            let mut command = vec![0u8; count];
            if datagram {
                self.wire.getbytes(&mut command).await;
                self.wire.done()?;
                self.wire.reply(0).await;
            } else {
                self.wire.sendb(0).await;
                self.wire.flush().await?;
                self.wire.crc_clear(0);
                self.wire.getbytes(&mut command).await;
                self.expect_trailer("Write", crc, COMPAT_TRAILER).await?;
                self.wire.sendb(0).await;
            }
            self.wire.flush().await?;

            if command.last() == Some(&b'\r') {
                command.pop();
            }
            if let Some(end) = command.iter().position(|&c| c == 0) {
                command.truncate(end);
            }
            command.truncate(MAX_REQUEST);
            if !command.is_empty() {
                self.command(&command).await;
            }
            return Ok(());
        }

        if self.channels[slot].mode != ChannelMode::CompatFile || !self.channels[slot].has_file() {
            warn!("Write: Not writeable");
            return self.compat_write_failed().await;
        }
        if let Err(e) = self.channels[slot].reserve(count) {
            warn!("Write: {}", e);
            return self.compat_write_failed().await;
        }

        if datagram {
            let buf = self.channels[slot].staging(count)?;
            self.wire.getbytes(buf).await;
            self.wire.done()?;
            let status = self.compat_commit(slot, count).await;
            self.wire.reply(status).await;
            return self.wire.flush().await;
        }

        self.wire.turn();
        self.wire.sendb(0).await;
        self.wire.flush().await?;
        self.wire.crc_clear(0);

        let receiving = Instant::now();
        let buf = self.channels[slot].staging(count)?;
        self.wire.getbytes(buf).await;
        self.expect_trailer("Write", crc, COMPAT_TRAILER).await?;
        let status = self.compat_commit(slot, count).await;
        self.wire.sendb(status).await;
        self.wire.flush().await?;
        debug!("Write: Received {} bytes in {:?}", count, receiving.elapsed());
        Ok(())
    }

    async fn compat_commit(&mut self, slot: usize, count: usize) -> u8 {
        match self.commit(slot, count).await {
            Ok(()) => 0,
            Err(e) => {
                warn!("Write: Couldn't write: {}", e);
                self.status.set_error(&e);
                compat::WRITE_FAILED
            }
        }
    }

    async fn compat_write_failed(&mut self) -> Result<()> {
        self.wire.reply(compat::WRITE_FAILED).await;
        self.wire.flush().await
    }

    pub(super) async fn compat_close(&mut self, crc: bool) -> Result<()> {
        let r = self.wire.getb(true).await;
        if self.is_datagram() {
            self.wire.done()?;
            if r.is_none() {
                return self.frame_error("Close");
            }
        } else {
            self.expect_trailer("Close", crc, COMPAT_TRAILER).await?;
        }
        let ch = r.unwrap_or(0) & 0x0f;
        info!("Close #{}", ch);

        let channel = &mut self.channels[ch as usize];
        if channel.mode == ChannelMode::CompatFile {
            if channel.has_file() {
                if let Err(e) = channel.flush().await {
                    warn!("Close: {}", e);
                }
            }
            if ch == COMMAND_CHANNEL {
                drop(channel.close_file());
                channel.mode = ChannelMode::Error;
            } else {
                channel.release();
            }
        }

        self.wire.reply(0).await;
        self.wire.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{exchange, session};
    use super::*;
    use crate::transport::Flavor;
    use tempfile::TempDir;

    fn open_request(ch: u8, name: &[u8]) -> Vec<u8> {
        let mut request = vec![b'O', ch];
        request.extend_from_slice(name);
        request.push(0);
        request
    }

    #[tokio::test]
    async fn open_read_and_close() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("note.seq"), b"abcdef").unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0, &open_request(2, b"NOTE,S")).await;
        assert_eq!(reply, [compat::READ_ONLY]);
        assert_eq!(session.channel(2).mode, ChannelMode::CompatFile);

        let reply = exchange(&mut session, 0, &[b'R', 2, 4, 0, COMPAT_TRAILER]).await;
        assert_eq!(reply, [0, !4u8, 0xff, b'a', b'b', b'c', b'd', compat::MORE]);

        let reply = exchange(&mut session, 0, &[b'R', 2, 2, 0, COMPAT_TRAILER]).await;
        assert_eq!(reply, [0, !2u8, 0xff, b'e', b'f', compat::LAST]);

        let reply = exchange(&mut session, 0, &[b'R', 2, 8, 0, COMPAT_TRAILER]).await;
        assert_eq!(reply, [0, 0xff, 0xff, compat::EOF]);

        let reply = exchange(&mut session, 0, &[b'C', 2, COMPAT_TRAILER]).await;
        assert_eq!(reply, [0]);
        assert_eq!(session.channel(2).mode, ChannelMode::Closed);
    }

    #[tokio::test]
    async fn write_and_close_never_truncates() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0, &open_request(4, b"LOG,S,W")).await;
        assert_eq!(reply, [compat::WRITE_ONLY]);

        let mut request = vec![b'W', 4, 5, 0, COMPAT_TRAILER];
        request.extend_from_slice(b"hello");
        request.push(COMPAT_TRAILER);
        let reply = exchange(&mut session, 0, &request).await;
        assert_eq!(reply, [0, 0]);

        exchange(&mut session, 0, &[b'C', 4, COMPAT_TRAILER]).await;
        assert_eq!(std::fs::read(tmp.path().join("log.seq")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn write_to_unopened_channel_fails() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        let reply = exchange(&mut session, 0, &[b'W', 4, 0, 0, COMPAT_TRAILER]).await;
        assert_eq!(reply, [compat::WRITE_FAILED]);
    }

    #[tokio::test]
    async fn status_channel_takes_commands() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());

        let reply = exchange(&mut session, 0, &open_request(15, b"MD:SUB")).await;
        assert_eq!(reply, [compat::STATUS]);
        assert!(tmp.path().join("sub").is_dir());

        let mut request = vec![b'W', 15, 3, 0, COMPAT_TRAILER];
        request.extend_from_slice(b"XY\r");
        request.push(COMPAT_TRAILER);
        let reply = exchange(&mut session, 0, &request).await;
        assert_eq!(reply, [0, 0]);
        assert_eq!(session.status().code(), ErrorCode::UnknownCommand);

        // a status read returns the line and a carriage return, then resets it
        let line = session.status().readout();
        let reply = exchange(&mut session, 0, &[b'R', 15, 0xff, 0, COMPAT_TRAILER]).await;
        let len = line.len() as u16;
        assert_eq!(&reply[1..3], &(!len).to_le_bytes());
        assert_eq!(&reply[3..3 + line.len()], &line[..]);
        assert_eq!(reply.last(), Some(&compat::EOF));
        assert_eq!(session.status().code(), ErrorCode::Ok);
    }

    #[tokio::test]
    async fn missing_file_and_empty_request() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        let reply = exchange(&mut session, 0, &open_request(2, b"GONE")).await;
        assert_eq!(reply, [compat::ERROR]);
        assert_eq!(session.status().code(), ErrorCode::FileNotFound);
        let reply = exchange(&mut session, 0, &open_request(2, b"")).await;
        assert_eq!(reply, [compat::ERROR]);
    }

    #[tokio::test]
    async fn directory_listing_is_read_only() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(Flavor::Stream, tmp.path());
        let reply = exchange(&mut session, 0, &open_request(0, b"$")).await;
        assert_eq!(reply, [compat::READ_ONLY]);
        // no sector padding for stream readers
        assert_eq!(session.channel(0).len(), 64);
    }

    #[tokio::test]
    async fn datagram_read_is_reversed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("x.prg"), b"abc").unwrap();
        let mut session = session(Flavor::Datagram, tmp.path());

        let reply = exchange(&mut session, 0, &open_request(2, b"X")).await;
        assert_eq!(reply, [compat::READ_ONLY; 2]);

        let reply = exchange(&mut session, 0, &[b'R', 2, 3]).await;
        assert_eq!(reply, [1, 3, b'c', b'b', b'a', compat::LAST, compat::LAST, compat::LAST]);
    }
}
