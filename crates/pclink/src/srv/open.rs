//! Opening listings and host files on a channel, shared by both command families.

use {
    super::Session,
    crate::{
        channel::ChannelMode,
        directory::{Detail, Directory},
        error::Error,
        fcall::{FileKind, SECTOR_SIZE, mode},
        listing,
        name::{ParsedName, host_name, matchname, parse_filename},
        path::resolve,
        status::ErrorCode,
        transport::Transport,
        utils::{Result, has_reserved_chars},
    },
    log::{info, warn},
    std::{
        ffi::OsString,
        os::unix::ffi::OsStrExt,
        path::Path,
    },
    tokio::fs::{self, OpenOptions},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum Family {
    Normal,
    Compat,
}

impl<T: Transport> Session<T> {
    /// Set the status line to `code` and hand it back.
    pub(super) fn fail(&mut self, code: ErrorCode) -> ErrorCode {
        self.status.set(code, 0);
        code
    }

    /// Fill channel `ch` with the listing named by `filter` (the request without `$`).
    ///
    /// On success the channel is left in `Directory` mode. Normal listings are
    /// padded to whole sectors.
    pub(super) async fn open_listing(&mut self, ch: u8, filter: &[u8], family: Family) -> ErrorCode {
        if ch == 1 {
            return self.fail(ErrorCode::NoChannel);
        }
        let slot = ch as usize;

        let outcome = if ch == 0 && filter.starts_with(b"=P") {
            listing::partitions(&mut self.channels[slot], &self.partitions).map(|()| Ok(()))
        } else {
            let resolved = match resolve(filter, &self.partitions, &self.config.root, self.config.conversion).await {
                Ok(Some(r)) => r,
                Ok(None) => return self.fail(ErrorCode::PathNotFound),
                Err(e) => return self.status.set_error(&e),
            };
            let host = self.config.root.join(&resolved.path);
            info!("Open #{}: \"${}\"", ch, host.display());

            let detail = if ch > 1 { Detail::Full } else { Detail::Writable };
            let mut directory = match Directory::open(&host, self.config.conversion, detail).await {
                Ok(directory) => directory,
                Err(e) => {
                    warn!("Open: Couldn't open the directory {:?}: {}", host, e);
                    return self.status.set_error(&e);
                }
            };

            let partition = match resolved.partition {
                0 => self.partitions.current(),
                id => id,
            };
            let channel = &mut self.channels[slot];
            let built = if ch > 1 {
                listing::raw(channel, &mut directory).await
            } else {
                listing::cooked(channel, &mut directory, partition, &resolved.leftover).await
            };
            built.map(|()| directory.close())
        };

        self.channels[slot].mode = ChannelMode::Directory;
        let mut code = match outcome {
            Ok(closed) => self.status.set_result(&closed),
            Err(e) => {
                warn!("Open: {}", e);
                self.truncate_listing(slot, family);
                self.fail(ErrorCode::ReadError)
            }
        };

        if family == Family::Normal && self.channels[slot].pad_to(SECTOR_SIZE).is_err() {
            warn!("Open: Out of memory");
            self.truncate_listing(slot, family);
            code = self.fail(ErrorCode::ReadError);
        }
        code
    }

    fn truncate_listing(&mut self, slot: usize, family: Family) {
        if family == Family::Normal {
            let channel = &mut self.channels[slot];
            let whole = channel.len() / SECTOR_SIZE * SECTOR_SIZE;
            channel.truncate(whole);
        }
    }

    /// Open a host file for `request` (`[@][path:]name[,type[,mode]]`).
    ///
    /// Returns the status code, the effective mode letter and the file length.
    pub(super) async fn open_file(&mut self, ch: u8, request: &[u8], family: Family) -> (ErrorCode, u8, u32) {
        let overwrite = request.first() == Some(&b'@') && request.contains(&b':');
        let mut open_mode = mode::READ;

        let resolved = match resolve(request, &self.partitions, &self.config.root, self.config.conversion).await {
            Ok(Some(r)) => r,
            Ok(None) => return (self.fail(ErrorCode::PathNotFound), open_mode, 0),
            Err(e) => return (self.status.set_error(&e), open_mode, 0),
        };
        let default_type: &[u8] = if ch == 1 { b"PRG" } else { b"*" };
        let parsed = parse_filename(&resolved.leftover, b',', Some(default_type));
        if let Some(m) = parsed.mode {
            open_mode = m;
        }

        let dir = self.config.root.join(&resolved.path);
        let found = match self.find_file(&dir, &parsed).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Open: Couldn't open the directory {:?}: {}", dir, e);
                return (self.status.set_error(&e), open_mode, 0);
            }
        };

        match ch {
            0 => open_mode = mode::READ,
            1 => open_mode = mode::WRITE,
            _ => {}
        }
        let host: OsString = match &found {
            Some((name, _)) => name.clone(),
            None => host_name(&parsed.name, &parsed.filetype, self.config.conversion).into(),
        };
        let path = dir.join(&host);
        info!("Open #{}: {:?} {}", ch, path, open_mode as char);

        let mut length = found.as_ref().map_or(0, |&(_, size)| size);
        if parsed.name.is_empty() {
            return (self.fail(ErrorCode::MissingFilename), open_mode, clamp(length));
        }

        let mut options = OpenOptions::new();
        match (open_mode, found.is_some(), family) {
            (mode::WRITE, exists, _) => {
                length = 0;
                if has_reserved_chars(host.as_bytes()) {
                    return (self.fail(ErrorCode::InvalidFilename), open_mode, 0);
                }
                if exists && !overwrite {
                    return (self.fail(ErrorCode::FileExists), open_mode, 0);
                }
                options.write(true).read(family == Family::Normal).mode(0o644);
                if overwrite {
                    options.create(true).truncate(true);
                } else {
                    options.create_new(true);
                }
            }
            (_, false, _) => return (self.fail(ErrorCode::FileNotFound), open_mode, clamp(length)),
            (mode::READ, true, _) => {
                options.read(true);
            }
            (mode::APPEND | mode::MODIFY, true, Family::Normal) => {
                options.read(true).write(true);
            }
            (mode::APPEND, true, Family::Compat) => {
                options.append(true);
            }
            _ => return (self.fail(ErrorCode::FileTypeMismatch), open_mode, clamp(length)),
        }

        match options.open(&path).await {
            Ok(file) => {
                let channel_mode = match family {
                    Family::Normal => ChannelMode::File,
                    Family::Compat => ChannelMode::CompatFile,
                };
                self.channels[ch as usize].attach(file, channel_mode, length);
                (self.fail(ErrorCode::Ok), open_mode, clamp(length))
            }
            Err(e) => {
                warn!("Open: {:?}: {}", path, e);
                (self.status.set_error(&Error::from(e)), open_mode, clamp(length))
            }
        }
    }

    /// Host name and length of the first closed file matching `parsed`.
    async fn find_file(&self, dir: &Path, parsed: &ParsedName) -> Result<Option<(OsString, u64)>> {
        let mut directory = Directory::open(dir, self.config.conversion, Detail::Names).await?;
        let mut found = None;
        while let Some(entry) = directory.read().await {
            if !entry.attributes.is_closed(FileKind::Normal)
                || !matchname(&entry.name, &parsed.name)
                || !matchname(&entry.filetype, &parsed.filetype)
            {
                continue;
            }
            let (Some(path), Some(name)) = (directory.entry_path(), directory.entry_name()) else {
                continue;
            };
            let Ok(metadata) = fs::symlink_metadata(path).await else {
                continue;
            };
            found = Some((name.to_os_string(), metadata.len()));
            break;
        }
        directory.close()?;
        Ok(found)
    }
}

fn clamp(length: u64) -> u32 {
    u32::try_from(length).unwrap_or(u32::MAX)
}
