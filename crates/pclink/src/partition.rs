//! The partition table: 255 named host directories, one of them current.
//!
//! Paths are relative to the served root, the empty path being the root itself.
//! A partition that was never created has no path and cannot be selected.
//! Changes can be mirrored to an observer task; the session never waits on it.

use {
    crate::fcall::NAME_LEN,
    log::debug,
    std::path::{Path, PathBuf},
    tokio::sync::mpsc::UnboundedSender,
};

/// Partition table mutation, sent to the observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PartitionEvent {
    PathChanged { id: u8, path: PathBuf },
    Selected { id: u8 },
}

#[derive(Clone, Debug, Default)]
struct Partition {
    name: Vec<u8>,
    path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct PartitionTable {
    slots: Vec<Partition>,
    current: u8,
    observer: Option<UnboundedSender<PartitionEvent>>,
}

impl Default for PartitionTable {
    fn default() -> Self {
        PartitionTable::new()
    }
}

impl PartitionTable {
    /// A table with partition 1 created at the root and selected.
    pub fn new() -> PartitionTable {
        let mut table = PartitionTable {
            slots: vec![Partition::default(); 256],
            current: 0,
            observer: None,
        };
        table.create(1, b"PARTITION 1");
        table.select(1);
        table
    }

    pub fn set_observer(&mut self, observer: UnboundedSender<PartitionEvent>) {
        self.observer = Some(observer);
    }

    fn notify(&self, event: PartitionEvent) {
        if let Some(observer) = &self.observer {
            if observer.send(event).is_err() {
                debug!("Partition observer is gone");
            }
        }
    }

    fn resolve_id(&self, id: u8) -> u8 {
        if id == 0 { self.current } else { id }
    }

    /// Create (or rename) a partition rooted at the served root.
    pub fn create(&mut self, id: u8, name: &[u8]) {
        let slot = &mut self.slots[id as usize];
        slot.name = name[..name.len().min(NAME_LEN)].to_vec();
        slot.path = Some(PathBuf::new());
    }

    /// Make `id` current. Fails for partitions without a path.
    pub fn select(&mut self, id: u8) -> bool {
        if self.slots[id as usize].path.is_none() {
            return false;
        }
        self.current = id;
        self.notify(PartitionEvent::Selected { id });
        true
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Path of a partition, 0 meaning the current one.
    pub fn path(&self, id: u8) -> Option<&Path> {
        self.slots[self.resolve_id(id) as usize].path.as_deref()
    }

    /// Name of a partition, 0 meaning the current one.
    pub fn name(&self, id: u8) -> Option<&[u8]> {
        let slot = &self.slots[self.resolve_id(id) as usize];
        slot.path.as_ref().map(|_| slot.name.as_slice())
    }

    /// Change the directory of an existing partition, 0 meaning the current one.
    pub fn set_path(&mut self, id: u8, path: &Path) {
        let id = self.resolve_id(id);
        let slot = &mut self.slots[id as usize];
        if slot.path.is_none() {
            return;
        }
        slot.path = Some(path.to_path_buf());
        self.notify(PartitionEvent::PathChanged {
            id,
            path: path.to_path_buf(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_partition_exists() {
        let table = PartitionTable::new();
        assert_eq!(table.current(), 1);
        assert_eq!(table.path(0), Some(Path::new("")));
        assert_eq!(table.name(1), Some(&b"PARTITION 1"[..]));
        assert_eq!(table.name(2), None);
    }

    #[test]
    fn zero_names_current() {
        let mut table = PartitionTable::new();
        assert_eq!(table.name(0), Some(&b"PARTITION 1"[..]));
        table.create(5, b"TOOLS");
        assert!(table.select(5));
        assert_eq!(table.name(0), Some(&b"TOOLS"[..]));
    }

    #[test]
    fn unassigned_cannot_be_selected() {
        let mut table = PartitionTable::new();
        assert!(!table.select(7));
        assert!(!table.select(0));
        assert_eq!(table.current(), 1);
        table.create(7, b"GAMES");
        assert!(table.select(7));
        assert_eq!(table.current(), 7);
    }

    #[test]
    fn set_path_ignores_unassigned() {
        let mut table = PartitionTable::new();
        table.set_path(9, Path::new("x"));
        assert_eq!(table.path(9), None);
        table.set_path(0, Path::new("games/arcade"));
        assert_eq!(table.path(1), Some(Path::new("games/arcade")));
        table.set_path(1, Path::new(""));
        assert_eq!(table.path(1), Some(Path::new("")));
    }

    #[test]
    fn observer_sees_changes() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut table = PartitionTable::new();
        table.set_observer(tx);
        table.set_path(0, Path::new("demos"));
        table.create(3, b"THREE");
        assert!(table.select(3));
        assert_eq!(
            rx.try_recv().ok(),
            Some(PartitionEvent::PathChanged {
                id: 1,
                path: PathBuf::from("demos")
            })
        );
        assert_eq!(rx.try_recv().ok(), Some(PartitionEvent::Selected { id: 3 }));

        drop(rx);
        table.set_path(3, Path::new("still works"));
        assert_eq!(table.path(3), Some(Path::new("still works")));
    }
}
