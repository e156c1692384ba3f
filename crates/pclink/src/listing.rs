//! Directory listings served through the channels.
//!
//! A *cooked* listing is a BASIC program in the classic `LOAD"$"` format, a *raw*
//! listing is a packed table of 32 byte records for programs, and the partition
//! listing is a cooked listing of the partition table.

use {
    crate::{
        channel::Channel,
        directory::Directory,
        fcall::{CookedLine, NAME_LEN, RawEntry, RawHeader},
        io_err,
        name::{matchname, parse_filename},
        partition::PartitionTable,
        serialize::{Encodable, LINE_SIZE},
    },
    chrono::{Datelike, Local, TimeZone, Timelike},
    std::io,
};

fn emit<T: Encodable>(channel: &mut Channel, item: &T) -> io::Result<()> {
    let mut line = Vec::with_capacity(LINE_SIZE + 1);
    item.encode(&mut line)?;
    channel
        .append(&line)
        .map_err(|_| io_err!(OutOfMemory, "Listing does not fit in memory"))
}

/// Disk label of the partition listing.
fn server_label() -> [u8; NAME_LEN] {
    let mut label = [b' '; NAME_LEN];
    let text = concat!("PCLINK ", env!("CARGO_PKG_VERSION"));
    let used = text.len().min(NAME_LEN);
    label[..used].copy_from_slice(&text.as_bytes()[..used]);
    label
}

/// Append a cooked listing of the entries matching `filter` (`pattern[=type]`).
pub async fn cooked(
    channel: &mut Channel,
    directory: &mut Directory,
    partition: u8,
    filter: &[u8],
) -> io::Result<()> {
    let mut pattern = parse_filename(filter, b'=', Some(b"*"));
    if pattern.name.is_empty() {
        pattern.name = b"*".to_vec();
    }

    emit(
        channel,
        &CookedLine::Header {
            partition,
            label: [b' '; NAME_LEN],
        },
    )?;

    let mut sum = 0u32;
    while let Some(entry) = directory.read().await {
        if !matchname(&entry.name, &pattern.name) || !matchname(&entry.filetype, &pattern.filetype) {
            continue;
        }
        let blocks = entry.size.div_ceil(256).min(65535) as u16;
        sum = (sum + blocks as u32).min(65535);
        emit(
            channel,
            &CookedLine::Entry {
                blocks,
                name: entry.name,
                filetype: entry.filetype,
                attributes: entry.attributes,
            },
        )?;
    }

    emit(
        channel,
        &CookedLine::Trailer {
            count: sum as u16,
            caption: b"BLOCKS USED.",
        },
    )
}

/// Pack a modification time into the four byte raw listing format.
pub fn pack_time(mtime: i64) -> [u8; 4] {
    let Some(t) = Local.timestamp_opt(mtime, 0).earliest() else {
        return [0; 4];
    };
    let month = t.month();
    let hour = t.hour();
    let year = ((t.year() - 1900 - 80) % 100) & 63;
    [
        ((t.second() % 60) | ((month << 4) & 0xc0)) as u8,
        ((t.minute() % 60) | (month << 6)) as u8,
        (year as u32 | ((hour << 3) & 0xc0)) as u8,
        ((t.day() & 31) | (hour << 5)) as u8,
    ]
}

/// Append a raw listing of every entry.
pub async fn raw(channel: &mut Channel, directory: &mut Directory) -> io::Result<()> {
    emit(channel, &RawHeader)?;
    while let Some(entry) = directory.read().await {
        emit(
            channel,
            &RawEntry {
                time: pack_time(entry.mtime),
                size: entry.size as u32,
                name: entry.name,
                attributes: entry.attributes,
                filetype: entry.filetype,
            },
        )?;
    }
    Ok(())
}

/// Append a listing of the partition table.
pub fn partitions(channel: &mut Channel, table: &PartitionTable) -> io::Result<()> {
    emit(
        channel,
        &CookedLine::Header {
            partition: 0xff,
            label: server_label(),
        },
    )?;
    let mut count = 0u16;
    for id in 1..255u8 {
        if let Some(name) = table.name(id) {
            emit(
                channel,
                &CookedLine::Partition {
                    id,
                    name: name.to_vec(),
                },
            )?;
            count += 1;
        }
    }
    emit(
        channel,
        &CookedLine::Trailer {
            count,
            caption: b"PARTITIONS.",
        },
    )
}
