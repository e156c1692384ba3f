//! The channel 15 command language.
//!
//! Commands are legacy DOS strings sent with a status request, a Compat open of
//! channel 15 or a Compat write to it. Every command leaves its outcome on the
//! status line.

use {
    crate::{
        directory::{Detail, Directory},
        error::Error,
        fcall::{Attributes, FileKind, MEMORY_BANNER},
        name::{matchname, parse_filename},
        path::{Resolved, resolve},
        petscii,
        srv::Session,
        status::ErrorCode,
        transport::Transport,
        utils::{Result, has_reserved_chars},
    },
    log::{info, warn},
    std::path::{Path, PathBuf},
    tokio::fs,
};

/// Longest memory read answered
const MAX_MEMORY_READ: usize = 50;

impl<T: Transport> Session<T> {
    /// Execute a command string and record its outcome.
    pub async fn command(&mut self, cmd: &[u8]) {
        let first = cmd.first().copied().unwrap_or(0);
        let second = cmd.get(1).copied().unwrap_or(0);

        match (first, second) {
            (b'C', b'D') => self.change_directory(&cmd[2..]).await,
            (b'M', b'D') => self.make_directory(cmd).await,
            (b'R', b'D') => self.scratch(cmd, true).await,
            (b'S', c) if c != b'-' => self.scratch(cmd, false).await,
            (b'C', 0xd0) => {
                let id = cmd.get(2).copied().unwrap_or(0);
                self.select_partition(id);
            }
            (b'C', b'P') => {
                let id = if cmd.len() == 2 {
                    self.partitions.current()
                } else {
                    cmd[2..]
                        .iter()
                        .take_while(|c| c.is_ascii_digit())
                        .fold(0u8, |id, c| id.wrapping_mul(10).wrapping_add(c - b'0'))
                };
                self.select_partition(id);
            }
            (b'U', c) if c & 0x0f == 9 || c & 0x0f == 10 => {
                info!("Command: Identify device");
                self.status.set(ErrorCode::DosVersion, 0);
            }
            (b'I', _) => {
                info!("Command: Initialize");
                self.status.set(ErrorCode::Ok, 0);
            }
            (b'V', _) => {
                info!("Command: Validate");
                self.status.set(ErrorCode::Ok, 0);
            }
            (b'M', b'-') if cmd.get(2) == Some(&b'R') => self.memory_read(&cmd[3..]),
            _ => self.status.set(ErrorCode::UnknownCommand, 0),
        }
    }

    fn select_partition(&mut self, id: u8) {
        info!("Command: Change to partition {}", id);
        if self.partitions.select(id) {
            self.status.set(ErrorCode::PartitionSelected, id.into());
        } else {
            self.status.set(ErrorCode::SelectedPartitionIllegal, id.into());
        }
    }

    /// `M-R` answers with the cartridge banner instead of memory contents.
    fn memory_read(&mut self, args: &[u8]) {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0);
        let (lo, hi, len) = (arg(0), arg(1), arg(2));
        info!("Command: Memory read ${:02x}{:02x} {:02x}", hi, lo, len);

        let len = (len as usize).min(MAX_MEMORY_READ);
        let banner = (0..len)
            .map(|i| MEMORY_BANNER[(lo as usize + i) & 15])
            .collect();
        self.status.set_raw(banner);
    }

    async fn resolve_command(&mut self, request: &[u8]) -> Option<Resolved> {
        match resolve(request, &self.partitions, &self.config.root, self.config.conversion).await {
            Ok(Some(resolved)) => Some(resolved),
            Ok(None) => {
                self.status.set(ErrorCode::PathNotFound, 0);
                None
            }
            Err(e) => {
                self.status.set_error(&e);
                None
            }
        }
    }

    /// First directory in `path` whose legacy name matches `pattern`.
    async fn find_directory(&self, path: &Path, pattern: &[u8]) -> Result<Option<PathBuf>> {
        let mut directory = Directory::open(&self.config.root.join(path), self.config.conversion, Detail::Names).await?;
        let mut found = None;
        while let Some(entry) = directory.read().await {
            if entry.attributes.kind() != Some(FileKind::Dir) || !matchname(&entry.name, pattern) {
                continue;
            }
            found = directory.entry_name().map(|name| path.join(name));
            break;
        }
        directory.close()?;
        Ok(found)
    }

    async fn change_directory(&mut self, arg: &[u8]) {
        let request: &[u8] = if arg.contains(&b':') {
            arg
        } else if arg == b"_" {
            b":_"
        } else if let Some(rest) = arg.strip_prefix(b"/") {
            rest
        } else {
            self.status.set(ErrorCode::SyntaxError, 0);
            return;
        };

        let Some(resolved) = self.resolve_command(request).await else {
            return;
        };
        let name = parse_filename(&resolved.leftover, b',', None).name;

        let target = match name.as_slice() {
            b"_" | b".." => {
                let mut path = resolved.path.clone();
                path.pop();
                Some(path)
            }
            b"" | b"." => Some(resolved.path.clone()),
            pattern => match self.find_directory(&resolved.path, pattern).await {
                Ok(found) => found,
                Err(e) => {
                    self.status.set_error(&e);
                    return;
                }
            },
        };

        match target {
            Some(path) => {
                info!("Command: Change directory {:?}", path);
                self.partitions.set_path(resolved.partition, &path);
                self.status.set(ErrorCode::Ok, 0);
            }
            None => self.status.set(ErrorCode::PathNotFound, 0),
        }
    }

    async fn make_directory(&mut self, cmd: &[u8]) {
        if !cmd.contains(&b':') {
            self.status.set(ErrorCode::SyntaxError, 0);
            return;
        }
        let Some(resolved) = self.resolve_command(cmd).await else {
            return;
        };
        let name = parse_filename(&resolved.leftover, b',', None).name;
        if name.is_empty() {
            self.status.set(ErrorCode::MissingFilename, 0);
            return;
        }

        match self.find_directory(&resolved.path, &name).await {
            Ok(Some(_)) => {
                self.status.set(ErrorCode::FileExists, 0);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                self.status.set_error(&e);
                return;
            }
        }

        let host = petscii::to_host(&name);
        if has_reserved_chars(host.as_bytes()) {
            self.status.set(ErrorCode::InvalidFilename, 0);
            return;
        }
        let path = self.config.root.join(&resolved.path).join(&host);
        info!("Command: Make directory {:?}", path);
        let result = fs::create_dir(&path).await.map_err(Error::from);
        self.status.set_result(&result);
    }

    /// `S:pattern[=type]` deletes files, `RD:pattern` removes empty directories.
    ///
    /// `S=pattern` is accepted as a short form of `S:pattern`.
    async fn scratch(&mut self, cmd: &[u8], directories: bool) {
        let short_form;
        let cmd = if cmd.contains(&b':') {
            cmd
        } else if !directories && cmd.get(1) == Some(&b'=') {
            short_form = [&b"S:"[..], &cmd[2..]].concat();
            &short_form[..]
        } else {
            self.status.set(ErrorCode::SyntaxError, 0);
            return;
        };
        let Some(resolved) = self.resolve_command(cmd).await else {
            return;
        };
        let pattern = parse_filename(&resolved.leftover, b'=', Some(b"*"));
        if pattern.name.is_empty() {
            self.status.set(ErrorCode::MissingFilename, 0);
            return;
        }

        let dir = self.config.root.join(&resolved.path);
        let mut directory = match Directory::open(&dir, self.config.conversion, Detail::Names).await {
            Ok(directory) => directory,
            Err(e) => {
                self.status.set_error(&e);
                return;
            }
        };

        let mut scratched = 0u32;
        let mut failure: Option<Error> = None;
        while let Some(entry) = directory.read().await {
            let is_dir = entry.attributes.kind() == Some(FileKind::Dir);
            let eligible = if directories {
                entry.attributes.is_closed(FileKind::Dir)
            } else {
                !is_dir && matchname(&entry.filetype, &pattern.filetype)
            };
            if !eligible
                || !entry.attributes.contains(Attributes::DELETABLE)
                || !matchname(&entry.name, &pattern.name)
            {
                continue;
            }
            let Some(path) = directory.entry_path().map(ToOwned::to_owned) else {
                continue;
            };

            let removed = if directories {
                info!("Command: Remove directory {:?}", path);
                fs::remove_dir(&path).await
            } else {
                info!("Command: Remove {:?}", path);
                fs::remove_file(&path).await
            };
            match removed {
                Ok(()) => scratched += 1,
                Err(e) => {
                    warn!("Command: Couldn't remove {:?}: {}", path, e);
                    failure = Some(e.into());
                }
            }
        }
        if let Err(e) = directory.close() {
            failure = Some(e);
        }

        match failure {
            Some(e) => {
                self.status.set_error(&e);
            }
            None => self.status.set(ErrorCode::FilesScratched, scratched),
        }
    }
}
