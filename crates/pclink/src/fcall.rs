//! PCLink protocol data types and constants.
//!
//! # Protocol
//! Every request starts with a one byte opcode. The *Normal* family moves whole
//! 512 byte sectors addressed in 256 byte units, the *Compat* family moves byte
//! streams. Each opcode has a variant with the high bit set that protects the
//! request and the reply with a CRC-8 trailer.

use bitflags::bitflags;
use enum_primitive::*;

/// Number of logical channels
pub const CHANNELS: usize = 16;

/// The command/status channel
pub const COMMAND_CHANNEL: u8 = 15;

/// Maximum length of a legacy file name
pub const NAME_LEN: usize = 16;

/// Maximum length of a legacy file type
pub const TYPE_LEN: usize = 3;

/// Size of a sector on the wire
pub const SECTOR_SIZE: usize = 512;

/// Longest request string accepted from the client
pub const MAX_REQUEST: usize = 255;

/// Sector limit of a single Normal read or write
pub const MAX_SECTORS: u8 = 128;

/// Sector limit of a single Normal read or write on datagram links
pub const MAX_DATAGRAM_SECTORS: u8 = 2;

/// Frame trailer of Normal requests and replies
pub const NORMAL_TRAILER: u8 = 0x5a;

/// Frame trailer of Compat requests
pub const COMPAT_TRAILER: u8 = 0x00;

/// Shifted space, pads one letter file types
pub const SHIFTED_SPACE: u8 = 0xa0;

/// Banner returned by the memory read command
pub const MEMORY_BANNER: &[u8; 16] = b"IDE64 CARTRIDGE ";

/// Host system name shown in listing headers
#[cfg(target_os = "freebsd")]
pub const SYSTEM_NAME: &[u8; 5] = b"FRBSD";
/// Host system name shown in listing headers
#[cfg(not(target_os = "freebsd"))]
pub const SYSTEM_NAME: &[u8; 5] = b"LINUX";

/// Compat open status bytes
pub mod compat {
    /// Opened for reading
    pub const READ_ONLY: u8 = 0;
    /// Status channel opened
    pub const STATUS: u8 = 2;
    /// Opened for writing
    pub const WRITE_ONLY: u8 = 4;
    /// Open failed, see channel 15
    pub const ERROR: u8 = 6;

    /// More data follows
    pub const MORE: u8 = 0x00;
    /// The chunk ends exactly at the end of the data
    pub const LAST: u8 = 0x40;
    /// Short chunk, end of data was hit
    pub const EOF: u8 = 0x42;

    /// Generic failure reply of compat writes
    pub const WRITE_FAILED: u8 = 2;
}

enum_from_primitive! {
    #[doc = "Request opcodes"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Opcode {
        Idle            = 0x00,
        // Normal family
        Open            = 0x4e,
        OpenCrc         = 0xce,
        Read            = 0x47,
        ReadCrc         = 0xc7,
        WritePadded     = 0x50,
        Write           = 0x53,
        WriteCrc        = 0xd3,
        Close           = 0x44,
        CloseCrc        = 0xc4,
        Status          = 0x49,
        StatusCrc       = 0xc9,
        // Compat family
        CompatOpen      = 0x4f,
        CompatOpenCrc   = 0xcf,
        CompatRead      = 0x52,
        CompatReadCrc   = 0xd2,
        CompatWrite     = 0x57,
        CompatWriteCrc  = 0xd7,
        CompatClose     = 0x43,
        CompatCloseCrc  = 0xc3,
    }
}

impl Opcode {
    /// If the request and reply carry a CRC byte
    pub fn uses_crc(&self) -> bool {
        (*self as u8) & 0x80 != 0
    }

    /// If the opcode belongs to the Compat family
    pub fn is_compat(&self) -> bool {
        use crate::fcall::Opcode::*;

        matches!(
            *self,
            CompatOpen
                | CompatOpenCrc
                | CompatRead
                | CompatReadCrc
                | CompatWrite
                | CompatWriteCrc
                | CompatClose
                | CompatCloseCrc
        )
    }

    /// Event byte handed to the transport while waiting for the next request
    pub fn event(&self) -> u8 {
        if self.is_compat() {
            COMPAT_TRAILER
        } else {
            NORMAL_TRAILER
        }
    }
}

enum_from_primitive! {
    #[doc = "Legacy file kinds, the low three bits of `Attributes`"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum FileKind {
        Del             = 0,
        Normal          = 1,
        Rel             = 2,
        Dir             = 3,
        Lnk             = 4,
    }
}

bitflags! {
    /// Attribute byte of a directory entry
    ///
    /// The low three bits hold a [`FileKind`].
    #[derive(Copy, Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Attributes: u8 {
        #[doc = "File is closed (not splat)"]
        const CLOSED        = 0x80;
        #[doc = "File may be deleted"]
        const DELETABLE     = 0x40;
        #[doc = "File is readable"]
        const READABLE      = 0x20;
        #[doc = "File is writable"]
        const WRITABLE      = 0x10;
        #[doc = "File is executable"]
        const EXECUTABLE    = 0x08;
        #[doc = "Mask of the file kind"]
        const KIND          = 0x07;
    }
}

impl Attributes {
    pub fn with_kind(kind: FileKind) -> Attributes {
        Attributes::from_bits_retain(kind as u8)
    }

    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_u8(self.bits() & Attributes::KIND.bits())
    }

    /// If the entry is a closed file of `kind`
    pub fn is_closed(&self, kind: FileKind) -> bool {
        self.contains(Attributes::CLOSED) && self.kind() == Some(kind)
    }
}

/// Open mode letters of the Normal family
pub mod mode {
    pub const READ: u8 = b'R';
    pub const WRITE: u8 = b'W';
    pub const APPEND: u8 = b'A';
    pub const MODIFY: u8 = b'M';
}

/// Normal open reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenReply {
    pub status: u8,
    pub mode: u8,
    pub length: u32,
}

/// Normal read/write request header
///
/// size[5] channel[1] address[3] sectors[1]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SectorRequest {
    pub channel: u8,
    /// Position in 256 byte units
    pub address: u32,
    pub sectors: u8,
}

/// Normal close request header
///
/// size[5] channel[1] length[4]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    pub channel: u8,
    pub length: u32,
}

/// One 32 byte line of a cooked (BASIC style) listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CookedLine {
    /// Disk header with the partition number and a 16 byte label
    Header { partition: u8, label: [u8; NAME_LEN] },
    /// File line
    Entry {
        blocks: u16,
        name: Vec<u8>,
        filetype: Vec<u8>,
        attributes: Attributes,
    },
    /// Partition line of a partition listing
    Partition { id: u8, name: Vec<u8> },
    /// Closing line with a counter and a caption
    Trailer { count: u16, caption: &'static [u8] },
}

/// Header of a raw listing
pub struct RawHeader;

/// One 32 byte record of a raw listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub name: Vec<u8>,
    pub size: u32,
    pub attributes: Attributes,
    pub filetype: Vec<u8>,
    /// Packed modification time
    pub time: [u8; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_families() {
        assert_eq!(Opcode::from_u8(b'N'), Some(Opcode::Open));
        assert_eq!(Opcode::from_u8(0xd2), Some(Opcode::CompatReadCrc));
        assert_eq!(Opcode::from_u8(b'X'), None);
        assert!(Opcode::WriteCrc.uses_crc());
        assert!(!Opcode::WritePadded.uses_crc());
        assert_eq!(Opcode::CompatClose.event(), 0x00);
        assert_eq!(Opcode::Status.event(), 0x5a);
    }

    #[test]
    fn attribute_kind() {
        let a = Attributes::with_kind(FileKind::Dir) | Attributes::CLOSED;
        assert!(a.is_closed(FileKind::Dir));
        assert!(!a.is_closed(FileKind::Normal));
        assert_eq!(a.bits(), 0x83);
    }
}
