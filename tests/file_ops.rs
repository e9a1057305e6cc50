//! Structural Operation Integration Tests
//!
//! Rename, toggle, clone and delete on a folder catalogue with attached
//! preview files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use contentlib::core::CollectionEvent;
use contentlib::library::{ContentDirectories, FileManager, FolderKind, RecycleBin};
use contentlib::{CatalogError, ContentId, ContentObject};
use tempfile::TempDir;

const PREVIEW: &str = ".preview.png";

struct Library {
    temp: TempDir,
    manager: FileManager<FolderKind>,
}

impl Library {
    fn new(ids: &[&str]) -> Self {
        let temp = TempDir::new().unwrap();
        let directories = ContentDirectories::new(
            temp.path().join("enabled"),
            Some(temp.path().join("disabled")),
        );
        directories.ensure_roots().unwrap();

        for id in ids {
            let dir = temp.path().join("enabled").join(id);
            std::fs::create_dir(&dir).unwrap();
            std::fs::write(dir.join("data.ini"), format!("[{}]", id)).unwrap();
            std::fs::write(
                temp.path().join("enabled").join(format!("{}{}", id, PREVIEW)),
                b"png",
            )
            .unwrap();
        }

        let manager = FileManager::new(
            FolderKind::new(vec![PREVIEW.to_string()]),
            Arc::new(directories),
            Arc::new(RecycleBin::new(temp.path().join("recycle"))),
        );

        Self { temp, manager }
    }

    fn enabled(&self, name: &str) -> PathBuf {
        self.temp.path().join("enabled").join(name)
    }

    fn disabled(&self, name: &str) -> PathBuf {
        self.temp.path().join("disabled").join(name)
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .manager
            .list()
            .ids()
            .iter()
            .map(|id| id.to_string())
            .collect();
        ids.sort();
        ids
    }
}

fn recycled_names(recycle: &Path) -> Vec<String> {
    let mut names = Vec::new();
    for batch in std::fs::read_dir(recycle).unwrap() {
        for entry in std::fs::read_dir(batch.unwrap().path()).unwrap() {
            names.push(entry.unwrap().file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    names
}

#[tokio::test]
async fn test_rename_moves_attachments_and_tracks_previous_id() {
    let lib = Library::new(&["aaa", "bbb"]);
    lib.manager.ensure_scanned_async().await.unwrap();
    let mut events = lib.manager.list().subscribe();

    lib.manager
        .rename_async(&ContentId::new("aaa"), "ccc", true)
        .await
        .unwrap();

    assert!(!lib.enabled("aaa").exists());
    assert!(!lib.enabled("aaa.preview.png").exists());
    assert!(lib.enabled("ccc/data.ini").exists());
    assert!(lib.enabled("ccc.preview.png").exists());

    assert_eq!(lib.ids(), vec!["bbb", "ccc"]);
    let ccc = lib
        .manager
        .get_by_id_async(&ContentId::new("ccc"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ccc.previous_id(), Some(ContentId::new("aaa")));

    assert_eq!(
        events.try_recv().unwrap(),
        CollectionEvent::Replaced {
            old_id: ContentId::new("aaa"),
            new_id: ContentId::new("ccc"),
        }
    );
}

#[tokio::test]
async fn test_rename_onto_occupied_place_changes_nothing() {
    let lib = Library::new(&["aaa", "bbb"]);
    lib.manager.ensure_scanned_async().await.unwrap();

    let conflict = lib
        .manager
        .rename_async(&ContentId::new("aaa"), "bbb", true)
        .await;
    assert!(matches!(conflict, Err(CatalogError::Conflict(_))));

    // Not in the catalogue yet, but present on disk
    std::fs::create_dir(lib.enabled("zzz")).unwrap();
    let taken = lib
        .manager
        .rename_async(&ContentId::new("aaa"), "zzz", true)
        .await;
    assert!(matches!(taken, Err(CatalogError::PlaceTaken(_))));

    assert!(lib.enabled("aaa/data.ini").exists());
    assert!(lib.enabled("aaa.preview.png").exists());
    assert_eq!(lib.ids(), vec!["aaa", "bbb"]);
}

#[tokio::test]
async fn test_failed_attachment_move_rolls_back() {
    let lib = Library::new(&["aaa"]);
    lib.manager.ensure_scanned_async().await.unwrap();

    // The preview cannot be moved onto a non-empty directory
    std::fs::create_dir_all(lib.enabled("ccc.preview.png/blocker")).unwrap();

    let result = lib
        .manager
        .rename_async(&ContentId::new("aaa"), "ccc", true)
        .await;

    assert!(matches!(result, Err(CatalogError::Io { .. })));
    assert!(lib.enabled("aaa/data.ini").exists());
    assert!(lib.enabled("aaa.preview.png").is_file());
    assert!(!lib.enabled("ccc").exists());
    assert_eq!(lib.ids(), vec!["aaa"]);
}

#[tokio::test]
async fn test_toggle_round_trip() {
    let lib = Library::new(&["aaa"]);
    let id = ContentId::new("aaa");

    lib.manager.toggle_async(&id).await.unwrap();
    assert!(lib.disabled("aaa/data.ini").exists());
    assert!(lib.disabled("aaa.preview.png").exists());
    assert!(!lib.manager.get_wrapper(&id).unwrap().enabled());

    lib.manager.toggle_async(&id).await.unwrap();
    assert!(lib.enabled("aaa/data.ini").exists());
    assert!(lib.manager.get_wrapper(&id).unwrap().enabled());
    assert_eq!(lib.ids(), vec!["aaa"]);
}

#[tokio::test]
async fn test_clone_keeps_source() {
    let lib = Library::new(&["aaa"]);

    lib.manager
        .clone_async(&ContentId::new("aaa"), "aaa_v2", false)
        .await
        .unwrap();

    assert!(lib.enabled("aaa/data.ini").exists());
    assert!(lib.disabled("aaa_v2/data.ini").exists());
    assert!(lib.disabled("aaa_v2.preview.png").exists());
    assert_eq!(lib.ids(), vec!["aaa", "aaa_v2"]);
    assert!(!lib
        .manager
        .get_wrapper(&ContentId::new("aaa_v2"))
        .unwrap()
        .enabled());
}

#[tokio::test]
async fn test_delete_many_recycles_everything() {
    let lib = Library::new(&["aaa", "bbb", "ccc"]);

    let deleted = lib
        .manager
        .delete_many_async(&[ContentId::new("aaa"), ContentId::new("ccc")])
        .await
        .unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(lib.ids(), vec!["bbb"]);
    assert_eq!(
        recycled_names(&lib.temp.path().join("recycle")),
        vec!["aaa", "aaa.preview.png", "ccc", "ccc.preview.png"]
    );
    assert_eq!(lib.manager.shield().active_count(), 0);
}

#[tokio::test]
async fn test_prepare_replaces_disabled_copy() {
    let lib = Library::new(&["aaa"]);
    let id = ContentId::new("aaa");
    lib.manager.toggle_async(&id).await.unwrap();

    let location = lib
        .manager
        .prepare_for_additional_content_async("aaa", true)
        .await
        .unwrap();

    assert_eq!(location, lib.enabled("aaa"));
    assert!(!lib.disabled("aaa").exists());
    assert!(lib.manager.get_wrapper(&id).is_none());
}

#[tokio::test]
async fn test_rename_rejects_invalid_ids() {
    let lib = Library::new(&["aaa"]);

    for bad in ["", "..", "a/b", "name.", "what?"] {
        let result = lib
            .manager
            .rename_async(&ContentId::new("aaa"), bad, true)
            .await;
        assert!(
            matches!(result, Err(CatalogError::InvalidId { .. })),
            "{:?} should be rejected",
            bad
        );
    }
}
