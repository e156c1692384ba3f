//! Error type shared by the engine, the transports and the host filesystem layer.
//!
//! Host failures are carried as an errno so that the status channel can translate
//! them into the legacy DOS error taxonomy (see [`crate::status`]).

use std::{error as stderror, fmt, io};

pub use nix::errno::Errno;

/// Host errno values, re-exported for `error::errno::ENOENT` style matching.
pub mod errno {
    pub use nix::errno::Errno::*;
}

/// The library's error type.
#[derive(Debug)]
pub enum Error {
    /// A host call failed with an errno.
    No(Errno),
    /// An I/O operation failed.
    Io(io::Error),
}

impl Error {
    /// Collapse the error into an errno.
    ///
    /// I/O errors without an OS error code are reported as `EIO`.
    pub fn errno(&self) -> Errno {
        match *self {
            Error::No(e) => e,
            Error::Io(ref e) => e
                .raw_os_error()
                .map(Errno::from_raw)
                .unwrap_or(Errno::EIO),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::No(ref e) => write!(f, "System error: {}", e.desc()),
            Error::Io(ref e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl stderror::Error for Error {
    fn source(&self) -> Option<&(dyn stderror::Error + 'static)> {
        match *self {
            Error::No(ref e) => Some(e),
            Error::Io(ref e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Error::No(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_keeps_os_code() {
        let e: Error = io::Error::from_raw_os_error(libc_enoent()).into();
        assert_eq!(e.errno(), Errno::ENOENT);
    }

    #[test]
    fn io_error_without_code_is_eio() {
        let e: Error = crate::io_err!(InvalidData, "Frame error").into();
        assert_eq!(e.errno(), Errno::EIO);
    }

    fn libc_enoent() -> i32 {
        Errno::ENOENT as i32
    }
}
