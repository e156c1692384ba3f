//! Legacy DOS error codes and the channel 15 status line.

use crate::error::{Errno, Error};
use enum_primitive::*;

/// Identification reported by the `73` status message.
pub const IDENTIFY: &str = concat!("PCLINK ", env!("CARGO_PKG_VERSION"), " SERVER");

enum_from_primitive! {
    #[doc = "Error codes of the legacy DOS"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum ErrorCode {
        Ok                          = 0,
        FilesScratched              = 1,
        PartitionSelected           = 2,
        ReadError                   = 23,
        WriteError                  = 25,
        WriteProtectOn              = 26,
        AccessDenied                = 27,
        SyntaxError                 = 30,
        UnknownCommand              = 31,
        InvalidFilename             = 33,
        MissingFilename             = 34,
        PathNotFound                = 39,
        FrameError                  = 41,
        CrcError                    = 42,
        FileNotFound                = 62,
        FileExists                  = 63,
        FileTypeMismatch            = 64,
        NoChannel                   = 70,
        PartitionFull               = 72,
        DosVersion                  = 73,
        SelectedPartitionIllegal    = 77,
        UnknownError                = 80,
    }
}

impl ErrorCode {
    /// Status message text for the code.
    pub fn message(&self) -> &'static str {
        use crate::status::ErrorCode::*;

        match *self {
            Ok => "OK",
            FilesScratched => "FILES SCRATCHED",
            PartitionSelected => "PARTITION SELECTED",
            ReadError => "READ ERROR",
            WriteProtectOn => "WRITE PROTECT ON",
            AccessDenied => "ACCESS DENIED",
            UnknownCommand => "UNKNOWN COMMAND",
            SyntaxError | InvalidFilename | MissingFilename => "SYNTAX ERROR",
            PathNotFound => "PATH NOT FOUND",
            FrameError => "FRAME ERROR",
            CrcError => "CRC ERROR",
            FileNotFound => "FILE NOT FOUND",
            FileExists => "FILE EXISTS",
            FileTypeMismatch => "FILE TYPE MISMATCH",
            NoChannel => "NO CHANNEL",
            PartitionFull => "PARTITION FULL",
            DosVersion => IDENTIFY,
            SelectedPartitionIllegal => "SELECTED PARTITION ILLEGAL",
            WriteError | UnknownError => "UNKNOWN ERROR",
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == ErrorCode::Ok
    }
}

/// Render a status line, `"62, FILE NOT FOUND,000,000,000,000"`.
///
/// A read error with a non-zero detail reads as a CRC error with a zero detail.
pub fn render(code: ErrorCode, extra: u32) -> String {
    let (message, extra) = match (code, extra) {
        (ErrorCode::ReadError, 0) => (code.message(), 0),
        (ErrorCode::ReadError, _) => ("CRC ERROR", 0),
        _ => (code.message(), extra),
    };
    format!("{:02}, {},{:03},000,000,000", code as u8, message, extra)
}

/// Map a host errno to the status message it produces.
pub fn from_errno(errno: Errno) -> (ErrorCode, u32) {
    match errno {
        Errno::ENOENT | Errno::ENOTDIR | Errno::EISDIR => (ErrorCode::FileNotFound, 0),
        Errno::EEXIST => (ErrorCode::FileExists, 0),
        Errno::EPERM | Errno::EACCES => (ErrorCode::AccessDenied, 0),
        Errno::ENOTEMPTY => (ErrorCode::FilesScratched, 0),
        Errno::ENOSPC => (ErrorCode::PartitionFull, 0),
        Errno::EROFS => (ErrorCode::WriteProtectOn, 0),
        Errno::EIO => (ErrorCode::ReadError, 0),
        e => (ErrorCode::UnknownError, e as u32),
    }
}

/// Map a host errno to the code reported back to the requester.
///
/// Missing files report a type mismatch here while the status line says
/// `FILE NOT FOUND`.
pub fn reply_code(errno: Errno) -> ErrorCode {
    match from_errno(errno).0 {
        ErrorCode::FileNotFound => ErrorCode::FileTypeMismatch,
        code => code,
    }
}

/// Contents of channel 15: the last status message and a read pointer.
#[derive(Clone, Debug)]
pub struct StatusLine {
    text: Vec<u8>,
    code: ErrorCode,
    pointer: usize,
}

impl Default for StatusLine {
    fn default() -> Self {
        StatusLine::new()
    }
}

impl StatusLine {
    pub fn new() -> StatusLine {
        let mut status = StatusLine {
            text: Vec::new(),
            code: ErrorCode::DosVersion,
            pointer: 0,
        };
        status.set(ErrorCode::DosVersion, 0);
        status
    }

    /// Replace the message and rewind the read pointer.
    pub fn set(&mut self, code: ErrorCode, extra: u32) {
        self.text = render(code, extra).into_bytes();
        self.code = code;
        self.pointer = 0;
    }

    /// Record a host failure and return the code for the requester.
    pub fn set_errno(&mut self, errno: Errno) -> ErrorCode {
        let (code, extra) = from_errno(errno);
        self.set(code, extra);
        reply_code(errno)
    }

    pub fn set_error(&mut self, err: &Error) -> ErrorCode {
        self.set_errno(err.errno())
    }

    /// Record the outcome of a host call: OK or the mapped failure.
    pub fn set_result<T>(&mut self, result: &Result<T, Error>) -> ErrorCode {
        match result {
            Ok(_) => {
                self.set(ErrorCode::Ok, 0);
                ErrorCode::Ok
            }
            Err(e) => self.set_error(e),
        }
    }

    /// Replace the readable content with raw bytes.
    pub fn set_raw(&mut self, bytes: Vec<u8>) {
        self.text = bytes;
        self.pointer = 0;
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    /// What a read of channel 15 returns: the message and a carriage return.
    pub fn readout(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.text.len() + 1);
        out.extend_from_slice(&self.text);
        out.push(b'\r');
        out
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn advance(&mut self, n: usize) {
        self.pointer += n;
    }
}
