//! Directory enumeration with legacy names, types and attributes.
//!
//! Every host entry becomes a 16 symbol PETSCII name and a 3 symbol type. How much
//! the enumerator asks the host about each entry depends on the [`Detail`] level:
//! lookups by name never stat files whose kind is already known, listings stat
//! everything but directories, and raw listings stat everything and test read and
//! execute permission too. Access checks are cached per (device, permission
//! bits, owner, group) so a directory of identically owned files costs one check.

use {
    crate::{
        fcall::{Attributes, FileKind, NAME_LEN, SHIFTED_SPACE, TYPE_LEN},
        name::NameConversion,
        petscii, shorten,
        utils::Result,
    },
    log::warn,
    nix::unistd::{AccessFlags, access},
    std::{
        collections::BTreeSet,
        ffi::{OsStr, OsString},
        fs::{FileType, Metadata},
        io,
        os::unix::fs::MetadataExt,
        path::{Path, PathBuf},
    },
    tokio::fs,
    tokio_stream::{StreamExt, wrappers::ReadDirStream},
};

/// Longest host file name considered.
const MAX_HOST_NAME: usize = 999;

/// How much host information an enumeration collects.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Detail {
    /// Name and kind only
    Names,
    /// Plus size, time and the writable attribute
    Writable,
    /// Plus readable and executable attributes, directories stat'd too
    Full,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: Vec<u8>,
    pub filetype: Vec<u8>,
    pub attributes: Attributes,
    pub size: u64,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
}

#[derive(Debug, Default)]
struct AccessCache {
    key: Option<(u64, u32, u32, u32)>,
    granted: bool,
}

impl AccessCache {
    fn check(&mut self, metadata: Option<&Metadata>, bits: u32, path: &Path, flags: AccessFlags) -> bool {
        let Some(metadata) = metadata else {
            return access(path, flags).is_ok();
        };
        let key = (
            metadata.dev(),
            metadata.mode() & bits,
            metadata.uid(),
            metadata.gid(),
        );
        if self.key != Some(key) {
            self.key = Some(key);
            self.granted = access(path, flags).is_ok();
        }
        self.granted
    }
}

/// An open host directory.
pub struct Directory {
    path: PathBuf,
    entries: ReadDirStream,
    conversion: NameConversion,
    detail: Detail,
    seen: BTreeSet<(Vec<u8>, Vec<u8>)>,
    readable: AccessCache,
    writable: AccessCache,
    executable: AccessCache,
    current: Option<(PathBuf, OsString)>,
    error: Option<io::Error>,
}

impl Directory {
    pub async fn open(path: &Path, conversion: NameConversion, detail: Detail) -> Result<Directory> {
        let entries = ReadDirStream::new(fs::read_dir(path).await?);
        Ok(Directory {
            path: path.to_path_buf(),
            entries,
            conversion,
            detail,
            seen: BTreeSet::new(),
            readable: AccessCache::default(),
            writable: AccessCache::default(),
            executable: AccessCache::default(),
            current: None,
            error: None,
        })
    }

    /// Next entry, or `None` at the end.
    ///
    /// Entries whose legacy name and type were already produced are skipped, as
    /// are entries that vanish before they can be examined.
    pub async fn read(&mut self) -> Option<DirectoryEntry> {
        while let Some(entry) = self.entries.next().await {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Reading directory {:?} failed: {}", self.path, e);
                    self.error = Some(e);
                    break;
                }
            };

            let file_name = entry.file_name();
            if file_name.len() > MAX_HOST_NAME {
                continue;
            }
            let path = entry.path();

            let known = entry.file_type().await.ok();
            let is_dir = known.is_some_and(|t| t.is_dir());
            let skip_stat =
                (self.detail == Detail::Names && known.is_some()) || (self.detail < Detail::Full && is_dir);
            let metadata = if skip_stat {
                None
            } else {
                match fs::symlink_metadata(&path).await {
                    Ok(metadata) => Some(metadata),
                    Err(_) => continue,
                }
            };
            let Some(file_type) = metadata.as_ref().map(Metadata::file_type).or(known) else {
                continue;
            };

            let dirent = self.describe(&file_name, file_type, metadata.as_ref(), &path);
            if !self.seen.insert((dirent.name.clone(), dirent.filetype.clone())) {
                continue;
            }
            self.current = Some((path, file_name));
            return Some(dirent);
        }
        self.current = None;
        None
    }

    fn describe(
        &mut self,
        file_name: &OsStr,
        file_type: FileType,
        metadata: Option<&Metadata>,
        path: &Path,
    ) -> DirectoryEntry {
        let mut attributes = Attributes::DELETABLE;
        if self.detail >= Detail::Full {
            if self.executable.check(metadata, 0o111, path, AccessFlags::X_OK) {
                attributes |= Attributes::EXECUTABLE;
            }
            if self.readable.check(metadata, 0o444, path, AccessFlags::R_OK) {
                attributes |= Attributes::READABLE;
            }
        }
        if self.detail >= Detail::Writable && self.writable.check(metadata, 0o222, path, AccessFlags::W_OK) {
            attributes |= Attributes::WRITABLE;
        }

        let (name, mut filetype) =
            legacy_name(&file_name.to_string_lossy(), file_type.is_dir(), self.conversion);
        let mut size = metadata.map(Metadata::len).unwrap_or(0);

        if file_type.is_dir() {
            filetype = b"DIR".to_vec();
            attributes |= Attributes::with_kind(FileKind::Dir) | Attributes::CLOSED;
            size = 0;
        } else if file_type.is_file() {
            attributes |= Attributes::with_kind(FileKind::Normal) | Attributes::CLOSED;
        } else if file_type.is_symlink() {
            filetype = b"LNK".to_vec();
            attributes |= Attributes::with_kind(FileKind::Lnk) | Attributes::CLOSED;
        } else {
            filetype = b"DEL".to_vec();
            attributes = Attributes::with_kind(FileKind::Del) | Attributes::CLOSED;
            size = 0;
        }

        DirectoryEntry {
            name,
            filetype,
            attributes,
            size,
            mtime: metadata.map(MetadataExt::mtime).unwrap_or(0),
        }
    }

    /// Host path of the entry last returned by [`Directory::read`].
    pub fn entry_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(path, _)| path.as_path())
    }

    /// Host file name of the entry last returned by [`Directory::read`].
    pub fn entry_name(&self) -> Option<&OsStr> {
        self.current.as_ref().map(|(_, name)| name.as_os_str())
    }

    /// Release the directory, reporting a failure met while reading it.
    pub fn close(self) -> Result<()> {
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Split a host file name into a legacy name and type.
pub fn legacy_name(host: &str, is_dir: bool, conversion: NameConversion) -> (Vec<u8>, Vec<u8>) {
    let converted = petscii::from_host(host);
    let ignore_dot = conversion == NameConversion::IgnoreDot;

    let mut split = None;
    for (i, &c) in converted.iter().enumerate() {
        let separator = match c {
            b'.' => !is_dir && !ignore_dot,
            b',' => true,
            _ => false,
        };
        if separator && i > 0 {
            split = Some(i);
        }
    }

    let stem = &converted[..split.unwrap_or(converted.len())];
    let stem = if stem.len() > NAME_LEN {
        shorten::shorten(stem)
    } else {
        stem.to_vec()
    };
    let name = stem
        .into_iter()
        .map(|c| if b":=*?,".contains(&c) { petscii::UNMAPPED } else { c })
        .collect();

    let filetype = match split {
        Some(j) => {
            let mut t: Vec<u8> = converted[j + 1..]
                .iter()
                .take(TYPE_LEN)
                .map(|&c| if b":=*?,< ".contains(&c) { petscii::UNMAPPED } else { c })
                .collect();
            if t.len() == 1 {
                t.extend_from_slice(&[SHIFTED_SPACE; 2]);
            }
            t
        }
        None if ignore_dot => b"PRG".to_vec(),
        None => Vec::new(),
    };

    (name, filetype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn collect(path: &Path, detail: Detail) -> Vec<DirectoryEntry> {
        let mut dir = Directory::open(path, NameConversion::ForceDot, detail)
            .await
            .unwrap();
        let mut entries = Vec::new();
        while let Some(entry) = dir.read().await {
            entries.push(entry);
        }
        dir.close().unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    #[tokio::test]
    async fn read_error_surfaces_on_close() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.prg"), b"").unwrap();
        let mut dir = Directory::open(tmp.path(), NameConversion::ForceDot, Detail::Names)
            .await
            .unwrap();
        assert!(dir.read().await.is_some());
        dir.error = Some(io::Error::from_raw_os_error(nix::libc::EIO));
        assert_eq!(dir.close().unwrap_err().errno(), nix::errno::Errno::EIO);
    }

    #[test]
    fn names_and_types() {
        let dot = NameConversion::ForceDot;
        assert_eq!(legacy_name("game.prg", false, dot), (b"GAME".to_vec(), b"PRG".to_vec()));
        assert_eq!(legacy_name("readme", false, dot), (b"README".to_vec(), vec![]));
        assert_eq!(legacy_name(".hidden", false, dot), (b".HIDDEN".to_vec(), vec![]));
        assert_eq!(legacy_name("a.b.seq", false, dot), (b"A.B".to_vec(), b"SEQ".to_vec()));
        assert_eq!(legacy_name("dir.d", true, dot), (b"DIR.D".to_vec(), vec![]));
        assert_eq!(
            legacy_name("x.s", false, dot),
            (b"X".to_vec(), vec![b'S', SHIFTED_SPACE, SHIFTED_SPACE])
        );
        assert_eq!(legacy_name("a*b,usr", false, dot), (vec![b'A', 0xa4, b'B'], b"USR".to_vec()));
    }

    #[test]
    fn ignore_dot_defaults_to_prg() {
        let all = NameConversion::IgnoreDot;
        assert_eq!(legacy_name("game.prg", false, all), (b"GAME.PRG".to_vec(), b"PRG".to_vec()));
        assert_eq!(legacy_name("notes,seq", false, all), (b"NOTES".to_vec(), b"SEQ".to_vec()));
    }

    #[test]
    fn long_names_are_shortened() {
        let (name, filetype) = legacy_name("alpha beta gamma delta.txt", false, NameConversion::ForceDot);
        assert_eq!(name.len(), NAME_LEN);
        assert_eq!(filetype, b"TXT");
    }

    #[tokio::test]
    async fn enumerates_kinds() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("game.prg"), vec![0u8; 300]).unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::os::unix::fs::symlink("game.prg", tmp.path().join("link")).unwrap();

        let entries = collect(tmp.path(), Detail::Full).await;
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].name, b"GAME");
        assert!(entries[0].attributes.is_closed(FileKind::Normal));
        assert_eq!(entries[0].size, 300);
        assert!(entries[0].mtime > 0);

        assert_eq!(entries[1].name, b"LINK");
        assert_eq!(entries[1].filetype, b"LNK");
        assert!(entries[1].attributes.is_closed(FileKind::Lnk));

        assert_eq!(entries[2].name, b"SUB");
        assert_eq!(entries[2].filetype, b"DIR");
        assert!(entries[2].attributes.is_closed(FileKind::Dir));
        assert!(entries[2].attributes.contains(Attributes::DELETABLE));
    }

    #[tokio::test]
    async fn names_detail_skips_stat() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("data.seq"), b"hello").unwrap();
        let entries = collect(tmp.path(), Detail::Names).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, 0);
        assert!(!entries[0].attributes.contains(Attributes::WRITABLE));
    }

    #[tokio::test]
    async fn duplicates_are_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("game.prg"), b"").unwrap();
        std::fs::write(tmp.path().join("game,prg"), b"").unwrap();
        let entries = collect(tmp.path(), Detail::Writable).await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn entry_host_name() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Mixed.Seq"), b"").unwrap();
        let mut dir = Directory::open(tmp.path(), NameConversion::ForceDot, Detail::Names)
            .await
            .unwrap();
        let entry = dir.read().await.unwrap();
        assert_eq!(entry.name, [0xcd, b'I', b'X', b'E', b'D']);
        assert_eq!(dir.entry_name(), Some(OsStr::new("Mixed.Seq")));
        assert_eq!(dir.entry_path(), Some(tmp.path().join("Mixed.Seq").as_path()));
        assert!(dir.read().await.is_none());
        assert_eq!(dir.entry_name(), None);
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let err = Directory::open(&tmp.path().join("nope"), NameConversion::ForceDot, Detail::Names)
            .await
            .err()
            .unwrap();
        assert_eq!(err.errno(), nix::errno::Errno::ENOENT);
    }
}
