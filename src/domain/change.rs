//! Filesystem change vocabulary shared by the watcher and the reconciler.

use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;
use serde::{Deserialize, Serialize};

/// Kind of a filesystem change, raw or coalesced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Something appeared
    Created,

    /// Contents changed
    Changed,

    /// Something disappeared
    Deleted,

    /// Moved to a new path
    Renamed,

    /// Several conflicting changes; reconcile from scratch
    All,
}

impl ChangeKind {
    /// Merge a newer change into an accumulated one.
    ///
    /// Rules:
    /// - same kind stays as is
    /// - DELETE then CREATE means the object was replaced: CHANGED
    /// - CREATE then CHANGED is still a creation
    /// - anything then DELETE is a deletion
    /// - anything involving RENAMED or ALL collapses to ALL
    pub fn merge(self, next: ChangeKind) -> ChangeKind {
        use ChangeKind::*;

        match (self, next) {
            (a, b) if a == b => a,
            (Deleted, Created) => Changed,
            (Created, Changed) => Created,
            (Changed, Deleted) | (Created, Deleted) => Deleted,
            _ => All,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Changed => write!(f, "changed"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Renamed => write!(f, "renamed"),
            ChangeKind::All => write!(f, "all"),
        }
    }
}

/// A raw, uncoalesced filesystem event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFsEvent {
    /// What happened
    pub kind: ChangeKind,

    /// Path the event refers to
    pub path: PathBuf,

    /// Destination path, for renames
    pub new_path: Option<PathBuf>,
}

impl RawFsEvent {
    /// Create a non-rename event
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            new_path: None,
        }
    }

    /// Create a rename event
    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Renamed,
            path: from.into(),
            new_path: Some(to.into()),
        }
    }

    /// Translate a notify event into raw events.
    ///
    /// Access and unclassified events are dropped. A rename reported with
    /// both paths becomes a single `Renamed`; halves of a rename reported
    /// separately become `Deleted`/`Created`.
    pub fn from_notify(event: &notify::Event) -> Vec<RawFsEvent> {
        match event.kind {
            EventKind::Create(_) => event
                .paths
                .iter()
                .map(|p| RawFsEvent::new(ChangeKind::Created, p))
                .collect(),
            EventKind::Remove(_) => event
                .paths
                .iter()
                .map(|p| RawFsEvent::new(ChangeKind::Deleted, p))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                vec![RawFsEvent::renamed(&event.paths[0], &event.paths[1])]
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
                .paths
                .iter()
                .map(|p| RawFsEvent::new(ChangeKind::Deleted, p))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
                .paths
                .iter()
                .map(|p| RawFsEvent::new(ChangeKind::Created, p))
                .collect(),
            EventKind::Modify(ModifyKind::Name(_)) => event
                .paths
                .iter()
                .map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Deleted
                    };
                    RawFsEvent::new(kind, p)
                })
                .collect(),
            EventKind::Modify(_) => event
                .paths
                .iter()
                .map(|p| RawFsEvent::new(ChangeKind::Changed, p))
                .collect(),
            EventKind::Any | EventKind::Access(_) | EventKind::Other => Vec::new(),
        }
    }
}

/// A burst of raw events for one object, coalesced into a single change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedChange {
    /// Final kind after merging the burst
    pub kind: ChangeKind,

    /// Object-level destination, for renames
    pub new_location: Option<PathBuf>,

    /// The single inner file that changed, if the burst touched exactly one
    pub full_filename: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    #[test]
    fn test_merge_rules() {
        use ChangeKind::*;

        assert_eq!(Changed.merge(Changed), Changed);
        assert_eq!(Deleted.merge(Created), Changed);
        assert_eq!(Created.merge(Changed), Created);
        assert_eq!(Created.merge(Deleted), Deleted);
        assert_eq!(Changed.merge(Deleted), Deleted);
        assert_eq!(Renamed.merge(Changed), All);
        assert_eq!(Changed.merge(Renamed), All);
    }

    #[test]
    fn test_from_notify_rename_both() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/root/enabled/bbb"))
            .add_path(PathBuf::from("/root/enabled/ccc"));

        let raw = RawFsEvent::from_notify(&event);
        assert_eq!(
            raw,
            vec![RawFsEvent::renamed("/root/enabled/bbb", "/root/enabled/ccc")]
        );
    }

    #[test]
    fn test_from_notify_basic_kinds() {
        let created = notify::Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/x/a"));
        let removed = notify::Event::new(EventKind::Remove(RemoveKind::Folder))
            .add_path(PathBuf::from("/x/a"));
        let modified = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/x/a/file.txt"));
        let access = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/x/a"));

        assert_eq!(RawFsEvent::from_notify(&created)[0].kind, ChangeKind::Created);
        assert_eq!(RawFsEvent::from_notify(&removed)[0].kind, ChangeKind::Deleted);
        assert_eq!(RawFsEvent::from_notify(&modified)[0].kind, ChangeKind::Changed);
        assert!(RawFsEvent::from_notify(&access).is_empty());
    }
}
