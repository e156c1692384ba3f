//! Logical channels: their mode, buffered listing content and host file.

use {
    crate::io_err,
    std::{collections::TryReserveError, io::SeekFrom},
    tokio::{
        fs::File,
        io::{self, AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    },
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ChannelMode {
    #[default]
    Closed,
    /// Serving a prepared listing
    Directory,
    /// Sector access to a host file
    File,
    /// Byte stream access to a host file
    CompatFile,
    /// Serving the status line
    Error,
}

/// One of the sixteen channels.
///
/// The buffer holds a listing in `Directory` mode and stages sector data in the
/// file modes. It only grows while the channel is open; closing releases it.
#[derive(Debug, Default)]
pub struct Channel {
    pub mode: ChannelMode,
    data: Vec<u8>,
    pointer: usize,
    file: Option<File>,
    /// Position of the host file in 256 byte units, `None` when unknown
    pub file_position: Option<u32>,
    /// File length when it was opened
    pub file_size: u64,
}

fn out_of_memory(_: TryReserveError) -> io::Error {
    io_err!(OutOfMemory, "Buffer allocation failed")
}

impl Channel {
    /// Forget the previous use of the channel ahead of a new open.
    pub fn reset(&mut self) {
        self.file = None;
        self.mode = ChannelMode::Closed;
        self.file_position = Some(0);
        self.file_size = 0;
        self.data.clear();
        self.pointer = 0;
    }

    /// Close the channel and free its buffer.
    pub fn release(&mut self) {
        self.file = None;
        self.mode = ChannelMode::Closed;
        self.file_size = 0;
        self.data = Vec::new();
        self.pointer = 0;
    }

    pub fn attach(&mut self, file: File, mode: ChannelMode, size: u64) {
        self.file = Some(file);
        self.mode = mode;
        self.file_size = size;
    }

    pub fn close_file(&mut self) -> Option<File> {
        self.file.take()
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// If a Normal read may be served from this channel
    pub fn is_sector_readable(&self) -> bool {
        match self.mode {
            ChannelMode::Directory | ChannelMode::Error => true,
            ChannelMode::File => self.has_file(),
            _ => false,
        }
    }

    /// If a Compat read may be served from this channel
    pub fn is_stream_readable(&self) -> bool {
        match self.mode {
            ChannelMode::Directory | ChannelMode::Error => true,
            ChannelMode::CompatFile => self.has_file(),
            _ => false,
        }
    }

    /* Listing content */

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), TryReserveError> {
        self.data.try_reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Zero fill the content up to a multiple of `unit`.
    pub fn pad_to(&mut self, unit: usize) -> Result<(), TryReserveError> {
        let padded = self.data.len().div_ceil(unit) * unit;
        self.data.try_reserve(padded - self.data.len())?;
        self.data.resize(padded, 0);
        Ok(())
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn advance(&mut self, n: usize) {
        self.pointer += n;
    }

    /* Sector staging */

    /// Make room for `len` bytes of staged data.
    pub fn reserve(&mut self, len: usize) -> io::Result<()> {
        if self.data.len() < len {
            self.data
                .try_reserve(len - self.data.len())
                .map_err(out_of_memory)?;
            self.data.resize(len, 0);
        }
        Ok(())
    }

    /// Staging area for data received from the client.
    pub fn staging(&mut self, len: usize) -> io::Result<&mut [u8]> {
        self.reserve(len)?;
        Ok(&mut self.data[..len])
    }

    pub fn staged(&self, len: usize) -> &[u8] {
        &self.data[..len]
    }

    /* Host file access */

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::from_raw_os_error(nix::libc::EBADF))
    }

    pub async fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file()?.seek(SeekFrom::Start(offset)).await.map(|_| ())
    }

    /// Read up to `len` bytes into the staging area, zero filling a short read.
    pub async fn read_staged(&mut self, len: usize) -> io::Result<usize> {
        self.reserve(len)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::from_raw_os_error(nix::libc::EBADF))?;
        let buf = &mut self.data[..len];
        let mut done = 0;
        while done < len {
            match file.read(&mut buf[done..]).await? {
                0 => break,
                n => done += n,
            }
        }
        buf[done..].fill(0);
        Ok(done)
    }

    /// Write a range of the staging area to the host file.
    pub async fn write_staged(&mut self, range: std::ops::Range<usize>) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::from_raw_os_error(nix::libc::EBADF))?;
        file.write_all(&self.data[range]).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush().await
    }

    /// If the file position sits at the end of the file.
    pub async fn at_eof(&mut self) -> io::Result<bool> {
        let file = self.file()?;
        let mut byte = [0u8; 1];
        if file.read(&mut byte).await? == 0 {
            return Ok(true);
        }
        file.seek(SeekFrom::Current(-1)).await?;
        Ok(false)
    }

    /// Flush and cut the host file to `len` bytes.
    pub async fn set_len(&mut self, len: u64) -> io::Result<()> {
        let file = self.file()?;
        file.flush().await?;
        file.set_len(len).await
    }
}
