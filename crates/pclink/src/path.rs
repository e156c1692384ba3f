//! Resolution of `[@][partition]path:name` requests to host directories.

use {
    crate::{
        directory::{Detail, Directory},
        fcall::FileKind,
        name::{NameConversion, matchname, parse_filename},
        partition::PartitionTable,
        utils::Result,
    },
    std::path::{Path, PathBuf},
};

/// A request split into the directory it names and what is left of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    /// Directory relative to the served root
    pub path: PathBuf,
    /// Final path element, still unparsed
    pub leftover: Vec<u8>,
    /// Partition named by the request, 0 for the current one
    pub partition: u8,
}

fn is_separator(c: u8) -> bool {
    c == b'/' || c == b':'
}

/// Walk the directory part of `request`.
///
/// A request holding a `:` may start with `@` and a decimal partition number.
/// A leading `/` after the prefix starts at the root instead of the partition's
/// directory. `.` and `..` components are handled literally, anything else is
/// matched against the legacy names of subdirectories, wildcards included.
///
/// Returns `Ok(None)` when a component does not exist, and `Err` when a host
/// directory on the way cannot be read.
pub async fn resolve(
    request: &[u8],
    partitions: &PartitionTable,
    root: &Path,
    conversion: NameConversion,
) -> Result<Option<Resolved>> {
    let len = request.len();
    let mut pos = 0;
    let mut partition = 0u8;

    if request.contains(&b':') {
        if request.first() == Some(&b'@') {
            pos = 1;
        }
        while let Some(digit) = request.get(pos).filter(|c| c.is_ascii_digit()) {
            partition = partition.wrapping_mul(10).wrapping_add(digit - b'0');
            pos += 1;
        }
        while pos < len && !is_separator(request[pos]) {
            pos += 1;
        }
        pos = (pos + 1).min(len);
    }

    let mut path = if request.get(pos) == Some(&b'/') {
        PathBuf::new()
    } else {
        match partitions.path(partition) {
            Some(path) => path.to_path_buf(),
            None => return Ok(None),
        }
    };

    loop {
        if request.get(pos).is_some_and(|&c| is_separator(c)) {
            pos += 1;
            continue;
        }

        let end = request[pos..]
            .iter()
            .position(|&c| is_separator(c))
            .map_or(len, |e| pos + e);
        if end == len {
            return Ok(Some(Resolved {
                path,
                leftover: request[pos..].to_vec(),
                partition,
            }));
        }

        match &request[pos..end] {
            b"." => {}
            b".." => {
                path.pop();
            }
            component => {
                let pattern = parse_filename(component, 0, None).name;
                let mut directory = Directory::open(&root.join(&path), conversion, Detail::Names).await?;
                let mut found = None;
                while let Some(entry) = directory.read().await {
                    if entry.attributes.is_closed(FileKind::Dir) && matchname(&entry.name, &pattern) {
                        found = directory.entry_name().map(ToOwned::to_owned);
                        break;
                    }
                }
                directory.close()?;
                match found {
                    Some(name) => path.push(name),
                    None => return Ok(None),
                }
            }
        }
        pos = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("games/arcade")).unwrap();
        std::fs::create_dir_all(tmp.path().join("demos")).unwrap();
        std::fs::write(tmp.path().join("games/file.prg"), b"").unwrap();
        tmp
    }

    async fn run(request: &[u8], partitions: &PartitionTable, root: &Path) -> Option<Resolved> {
        resolve(request, partitions, root, NameConversion::ForceDot)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn plain_name_stays_in_current_directory() {
        let tmp = tree();
        let table = PartitionTable::new();
        let r = run(b"FILE", &table, tmp.path()).await.unwrap();
        assert_eq!(r.path, PathBuf::new());
        assert_eq!(r.leftover, b"FILE");
        assert_eq!(r.partition, 0);
    }

    #[tokio::test]
    async fn walks_components_with_wildcards() {
        let tmp = tree();
        let table = PartitionTable::new();
        let r = run(b"/GAMES/ARC*:HISCORE", &table, tmp.path()).await.unwrap();
        assert_eq!(r.path, PathBuf::from("games/arcade"));
        assert_eq!(r.leftover, b"HISCORE");

        let r = run(b"1:GAMES/ARCADE/../.:X", &table, tmp.path()).await.unwrap();
        assert_eq!(r.path, PathBuf::from("games"));
        assert_eq!(r.partition, 1);
        assert_eq!(r.leftover, b"X");
    }

    #[tokio::test]
    async fn files_are_not_directories() {
        let tmp = tree();
        let table = PartitionTable::new();
        assert_eq!(run(b"/GAMES/FILE/:X", &table, tmp.path()).await, None);
        assert_eq!(run(b"/NOPE/:X", &table, tmp.path()).await, None);
    }

    #[tokio::test]
    async fn unassigned_partition() {
        let tmp = tree();
        let table = PartitionTable::new();
        assert_eq!(run(b"@7:FILE", &table, tmp.path()).await, None);
    }

    #[tokio::test]
    async fn root_prefix_ignores_partition_directory() {
        let tmp = tree();
        let mut table = PartitionTable::new();
        table.set_path(0, Path::new("games"));
        let r = run(b":/DEMOS/:X", &table, tmp.path()).await.unwrap();
        assert_eq!(r.path, PathBuf::from("demos"));
        let r = run(b"X", &table, tmp.path()).await.unwrap();
        assert_eq!(r.path, PathBuf::from("games"));
    }

    #[tokio::test]
    async fn resolving_a_resolved_directory_is_stable() {
        let tmp = tree();
        let mut table = PartitionTable::new();
        let first = run(b"/GAMES/ARCADE/:", &table, tmp.path()).await.unwrap();
        table.set_path(0, &first.path);
        let again = run(b"", &table, tmp.path()).await.unwrap();
        assert_eq!(again.path, first.path);
        assert!(again.leftover.is_empty());
    }
}
