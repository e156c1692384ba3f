//! RS-232 link at 115200 (or 38400) baud with RTS/CTS handshake.
//!
//! The line is raw 8N1. Reads give up after one second of silence, which is
//! reported as `EBUSY` so that [`Transport::wait`] can keep polling while an
//! aborted command turns into a timeout.

use {
    super::{Flavor, Transport},
    crate::{
        error::{Errno, errno::*},
        res,
        utils::Result,
    },
    async_trait::async_trait,
    log::{info, warn},
    nix::{
        fcntl::{FcntlArg, OFlag, fcntl},
        sys::termios::{
            BaudRate, ControlFlags, FlushArg, InputFlags, LocalFlags, OutputFlags, SetArg,
            SpecialCharacterIndices, cfsetspeed, tcdrain, tcflush, tcgetattr, tcsetattr,
        },
    },
    std::{fs::OpenOptions, os::unix::fs::OpenOptionsExt, path::PathBuf},
    tokio::{
        fs::File,
        io::{AsyncReadExt, AsyncWriteExt},
    },
};

pub const DEFAULT_DEVICE: &str = "/dev/ttyS0";

pub struct SerialTransport {
    device: PathBuf,
    baud_low: bool,
    file: Option<File>,
    latched: Option<Errno>,
}

impl SerialTransport {
    pub fn new(device: Option<&str>, baud_low: bool) -> SerialTransport {
        let device = PathBuf::from(device.unwrap_or(DEFAULT_DEVICE));
        info!("Using RS232 driver on device {:?}", device);
        SerialTransport {
            device,
            baud_low,
            file: None,
            latched: None,
        }
    }

    fn configure(&self) -> Result<std::fs::File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(&self.device)?;

        let mut options = tcgetattr(&file)?;
        let speed = match self.baud_low {
            true => BaudRate::B38400,
            false => BaudRate::B115200,
        };
        cfsetspeed(&mut options, speed)?;

        options.input_flags = InputFlags::empty();
        options.output_flags = OutputFlags::empty();
        options.control_flags &= !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CSIZE);
        options.control_flags |= ControlFlags::CS8 | ControlFlags::CRTSCTS;
        options.local_flags &= !(LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ECHOE
            | LocalFlags::ECHOK
            | LocalFlags::ISIG);
        options.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        options.control_chars[SpecialCharacterIndices::VTIME as usize] = 10;
        tcsetattr(&file, SetArg::TCSANOW, &options)?;

        // Blocking from here on, the carrier state no longer matters
        let flags = OFlag::from_bits_truncate(fcntl(&file, FcntlArg::F_GETFL)?);
        fcntl(&file, FcntlArg::F_SETFL(flags & !OFlag::O_NONBLOCK))?;
        Ok(file)
    }

    fn latch(&mut self, errno: Errno) {
        self.latched.get_or_insert(errno);
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &'static str {
        "RS232"
    }

    fn flavor(&self) -> Flavor {
        Flavor::Serial
    }

    async fn initialize(&mut self) -> Result<()> {
        self.file = None;
        let file = self.configure()?;
        self.file = Some(File::from_std(file));
        self.latched = None;
        Ok(())
    }

    async fn wait(&mut self, _event: u8) -> Result<u8> {
        if self.file.is_none() {
            return res!(ENODEV);
        }
        loop {
            self.latched = None;
            if let Some(b) = self.getb(true).await {
                return Ok(b);
            }
            match self.latched {
                Some(EBUSY) => continue,
                Some(e) => return res!(e),
                None => return res!(EIO),
            }
        }
    }

    async fn getb(&mut self, _use_timeout: bool) -> Option<u8> {
        if self.latched.is_some() {
            return None;
        }
        let file = self.file.as_mut()?;
        let mut byte = [0u8; 1];
        match file.read(&mut byte).await {
            Ok(1) => Some(byte[0]),
            Ok(_) => {
                self.latch(EBUSY);
                None
            }
            Err(_) => {
                self.latch(EIO);
                None
            }
        }
    }

    async fn getbytes(&mut self, buf: &mut [u8]) {
        if self.latched.is_some() {
            return;
        }
        let Some(file) = self.file.as_mut() else {
            self.latch(ENODEV);
            return;
        };
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]).await {
                Ok(n) if n > 0 => filled += n,
                _ => {
                    self.latch(EIO);
                    return;
                }
            }
        }
    }

    async fn sendb(&mut self, byte: u8) {
        self.sendbytes(&[byte]).await;
    }

    async fn sendbytes(&mut self, data: &[u8]) {
        if self.latched.is_some() {
            return;
        }
        let Some(file) = self.file.as_mut() else {
            self.latch(ENODEV);
            return;
        };
        if file.write_all(data).await.is_err() {
            self.latch(EIO);
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if self.latched.is_none() {
            let Some(file) = self.file.as_mut() else {
                return res!(ENODEV);
            };
            if file.flush().await.is_err() || tcdrain(&*file).is_err() {
                return res!(EIO);
            }
        }
        self.done()
    }

    fn done(&self) -> Result<()> {
        match self.latched {
            Some(e) => res!(e),
            None => Ok(()),
        }
    }

    async fn clean(&mut self) -> bool {
        if let Some(file) = self.file.as_ref()
            && let Err(e) = tcflush(file, FlushArg::TCIOFLUSH)
        {
            warn!("Couldn't flush {:?}: {}", self.device, e);
        }
        false
    }

    async fn shutdown(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = tcflush(&file, FlushArg::TCIOFLUSH);
        }
    }
}
