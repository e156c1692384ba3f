//! Serialize/deserialize PCLink headers and listing records into/from binary.

use crate::fcall::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Result;
use std::mem;
use std::ops::Shl;

/// Size of a cooked listing line
pub const LINE_SIZE: usize = 32;

/// A serializing specific result to overload operators on `Result`
///
/// # Overloaded operators
/// <<, ?
pub struct SResult<T>(::std::io::Result<T>);

/// A wrapper class of WriteBytesExt to provide operator overloads
/// for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Return total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<W> SResult<Encoder<W>> {
    /// Total bytes written by the chain
    pub fn bytes_written(self) -> Result<usize> {
        self.0.map(|enc| enc.bytes)
    }
}

/// A wrapper class of ReadBytesExt for deserializing headers
#[derive(Clone, Debug)]
pub struct Decoder<R> {
    reader: R,
}

impl<R: ReadBytesExt> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder { reader }
    }
    pub fn decode<T: Decodable>(&mut self) -> Result<T> {
        Decodable::decode(&mut self.reader)
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

/// Bytes written as they are, without a length prefix
pub struct Raw<'a>(pub &'a [u8]);

impl Encodable for Raw<'_> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_all(self.0).and(Ok(self.0.len()))
    }
}

/// A fixed width field, truncated or filled up with `fill`
pub struct Padded<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub fill: u8,
}

impl Encodable for Padded<'_> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let used = self.data.len().min(self.width);
        w.write_all(&self.data[..used])?;
        for _ in used..self.width {
            w.write_u8(self.fill)?;
        }
        Ok(self.width)
    }
}

impl Encodable for OpenReply {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w) << &self.status << &self.mode << &self.length).bytes_written()
    }
}

/// Listing header line with a disk label
fn header_line(id: u8, label: &[u8]) -> [u8; LINE_SIZE] {
    let mut line = [b' '; LINE_SIZE];
    line[..8].copy_from_slice(&[1, 4, 1, 1, id, 0, 0x12, 0x22]);
    let used = label.len().min(NAME_LEN);
    line[8..8 + used].copy_from_slice(&label[..used]);
    line[24] = 0x22;
    line[25] = 0x20;
    line[26..31].copy_from_slice(SYSTEM_NAME);
    line[31] = 0;
    line
}

fn entry_line(blocks: u16, name: &[u8], filetype: &[u8], attributes: Attributes) -> [u8; LINE_SIZE] {
    let mut line = [b' '; LINE_SIZE];
    line[0] = 1;
    line[1] = 1;
    line[2..4].copy_from_slice(&blocks.to_le_bytes());
    line[31] = 0;

    let n = 7 - [9, 99, 999].iter().filter(|&&limit| blocks > limit).count();
    let name = &name[..name.len().min(NAME_LEN)];
    line[n] = b'"';
    line[n + 1..n + 1 + name.len()].copy_from_slice(name);
    line[n + 1 + name.len()] = b'"';
    if !attributes.contains(Attributes::CLOSED) {
        line[n + 18] = b'*';
    }
    let filetype = &filetype[..filetype.len().min(TYPE_LEN)];
    line[n + 19..n + 19 + filetype.len()].copy_from_slice(filetype);
    if !attributes.contains(Attributes::DELETABLE | Attributes::WRITABLE) {
        line[n + 22] = b'<';
    }
    line
}

fn partition_line(id: u8, name: &[u8]) -> [u8; LINE_SIZE] {
    let mut line = [0u8; LINE_SIZE];
    line[..4].copy_from_slice(&[1, 1, id, 0]);
    line[4..].copy_from_slice(b"   \"\"                 NET  \0");
    let name = &name[..name.len().min(NAME_LEN)];
    line[8..8 + name.len()].copy_from_slice(name);
    line[8 + name.len()] = b'"';
    line
}

fn trailer_line(count: u16, caption: &[u8]) -> [u8; LINE_SIZE] {
    let mut line = [b' '; LINE_SIZE];
    line[0] = 1;
    line[1] = 1;
    line[2..4].copy_from_slice(&count.to_le_bytes());
    let used = caption.len().min(25);
    line[4..4 + used].copy_from_slice(&caption[..used]);
    line[29..].fill(0);
    line
}

impl Encodable for CookedLine {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let line = match *self {
            CookedLine::Header {
                partition,
                ref label,
            } => header_line(partition, label),
            CookedLine::Entry {
                blocks,
                ref name,
                ref filetype,
                attributes,
            } => entry_line(blocks, name, filetype, attributes),
            CookedLine::Partition { id, ref name } => partition_line(id, name),
            CookedLine::Trailer { count, caption } => trailer_line(count, caption),
        };
        Raw(&line).encode(w)
    }
}

impl Encodable for RawHeader {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &b'I'
            << &Padded { data: b"", width: NAME_LEN, fill: b' ' }
            << &Padded { data: b"", width: 8, fill: 0 }
            << &Attributes::with_kind(FileKind::Dir).bits()
            << &Raw(b"DIR")
            << &0u32)
            .bytes_written()
    }
}

impl Encodable for RawEntry {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        (Encoder::new(w)
            << &Padded { data: &self.name, width: NAME_LEN, fill: 0 }
            << &self.size
            << &0u32
            << &self.attributes.bits()
            << &Padded { data: &self.filetype, width: TYPE_LEN, fill: 0 }
            << &Raw(&self.time))
            .bytes_written()
    }
}

/// Trait representing a type which can be deserialized from binary
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Decodable for SectorRequest {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(SectorRequest {
            channel: r.read_u8()? & 0x0f,
            address: r.read_u24::<LittleEndian>()?,
            sectors: Decodable::decode(r)?,
        })
    }
}

impl Decodable for CloseRequest {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(CloseRequest {
            channel: r.read_u8()? & 0x0f,
            length: Decodable::decode(r)?,
        })
    }
}

#[test]
fn encoder_test1() {
    let expected: Vec<u8> = (0..10).collect();
    let mut encoder = Vec::new();
    for i in 0..10 {
        (&(i as u8)).encode(&mut encoder).unwrap();
    }
    assert_eq!(expected, encoder);
}

#[test]
fn decoder_test1() {
    use std::io::Cursor;

    let expected: Vec<u8> = (0..10).collect();
    let mut decoder = Cursor::new(expected.clone());
    let mut actual: Vec<u8> = Vec::new();
    while let Ok(i) = Decodable::decode(&mut decoder) {
        actual.push(i);
    }
    assert_eq!(expected, actual);
}

#[test]
fn sector_request_decode() {
    use std::io::Cursor;

    let mut decoder = Decoder::new(Cursor::new(vec![0x12, 0x34, 0x02, 0x00, 0x04]));
    let request: SectorRequest = decoder.decode().unwrap();
    assert_eq!(
        request,
        SectorRequest {
            channel: 2,
            address: 0x234,
            sectors: 4
        }
    );

    let mut decoder = Decoder::new(Cursor::new(vec![0x13, 0x00, 0x02, 0, 0]));
    let request: CloseRequest = decoder.decode().unwrap();
    assert_eq!((request.channel, request.length), (3, 512));
}

#[test]
fn open_reply_layout() {
    let mut buf = Vec::new();
    let reply = OpenReply {
        status: 0x80,
        mode: b'R',
        length: 0x0102,
    };
    assert_eq!(reply.encode(&mut buf).unwrap(), 6);
    assert_eq!(buf, [0x80, b'R', 0x02, 0x01, 0, 0]);
}

#[test]
fn cooked_entry_layout() {
    let mut buf = Vec::new();
    let line = CookedLine::Entry {
        blocks: 2,
        name: b"GAME".to_vec(),
        filetype: b"PRG".to_vec(),
        attributes: Attributes::with_kind(FileKind::Normal) | Attributes::CLOSED | Attributes::DELETABLE,
    };
    assert_eq!(line.encode(&mut buf).unwrap(), LINE_SIZE);
    assert_eq!(&buf[..4], &[1, 1, 2, 0]);
    assert_eq!(&buf[7..13], b"\"GAME\"");
    assert_eq!(&buf[26..29], b"PRG");
    // not writable, so locked
    assert_eq!(buf[29], b'<');
    assert_eq!(buf[31], 0);

    buf.clear();
    let line = CookedLine::Entry {
        blocks: 1000,
        name: b"A".to_vec(),
        filetype: b"SEQ".to_vec(),
        attributes: Attributes::with_kind(FileKind::Normal) | Attributes::DELETABLE | Attributes::WRITABLE,
    };
    line.encode(&mut buf).unwrap();
    assert_eq!(&buf[4..7], b"\"A\"");
    assert_eq!(buf[4 + 18], b'*');
    assert_eq!(buf[4 + 22], b' ');
}

#[test]
fn raw_layouts() {
    let mut buf = Vec::new();
    assert_eq!(RawHeader.encode(&mut buf).unwrap(), 33);
    assert_eq!(buf[0], b'I');
    assert_eq!(buf[25], 3);
    assert_eq!(&buf[26..29], b"DIR");

    buf.clear();
    let entry = RawEntry {
        name: b"GAME".to_vec(),
        size: 0x010203,
        attributes: Attributes::with_kind(FileKind::Normal) | Attributes::CLOSED,
        filetype: b"PRG".to_vec(),
        time: [1, 2, 3, 4],
    };
    assert_eq!(entry.encode(&mut buf).unwrap(), 32);
    assert_eq!(&buf[..6], b"GAME\0\0");
    assert_eq!(&buf[16..24], &[3, 2, 1, 0, 0, 0, 0, 0]);
    assert_eq!(buf[24], 0x81);
    assert_eq!(&buf[25..], &[b'P', b'R', b'G', 1, 2, 3, 4]);
}

#[test]
fn partition_and_trailer_layout() {
    let mut buf = Vec::new();
    CookedLine::Partition {
        id: 1,
        name: b"PARTITION 1".to_vec(),
    }
    .encode(&mut buf)
    .unwrap();
    assert_eq!(&buf[..8], &[1, 1, 1, 0, b' ', b' ', b' ', b'"']);
    assert_eq!(&buf[8..20], b"PARTITION 1\"");
    assert_eq!(&buf[26..29], b"NET");
    assert_eq!(buf[31], 0);

    buf.clear();
    CookedLine::Trailer {
        count: 300,
        caption: b"BLOCKS USED.",
    }
    .encode(&mut buf)
    .unwrap();
    assert_eq!(&buf[..4], &[1, 1, 44, 1]);
    assert_eq!(&buf[4..16], b"BLOCKS USED.");
    assert_eq!(&buf[16..29], &[b' '; 13]);
    assert_eq!(&buf[29..], &[0, 0, 0]);
}
