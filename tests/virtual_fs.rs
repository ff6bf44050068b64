//! Virtual filesystem behaviour over both store backends.

mod common;

use blobtree::{BlobTreeError, PathSanitizer, TraversalPolicy, VirtualEntry, VirtualFs};
use common::{keys_under, local_vfs, memory_vfs, seed};

fn listing_names(entries: &[VirtualEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| match e {
            VirtualEntry::Folder { name, .. } => format!("{name}/"),
            VirtualEntry::File { name, .. } => name.clone(),
        })
        .collect()
}

#[tokio::test]
async fn test_create_folder_twice_leaves_one_placeholder() {
    let (store, vfs) = memory_vfs();

    vfs.create_folder("input/", "reports").await.unwrap();
    vfs.create_folder("input/", "reports").await.unwrap();

    assert_eq!(store.keys(), vec!["input/reports/.keep"]);
}

#[tokio::test]
async fn test_created_folder_is_listed_once() {
    let (_store, vfs) = memory_vfs();
    vfs.create_folder("input/", "reports").await.unwrap();

    let entries = vfs.list("input/", true).await.unwrap();
    assert_eq!(listing_names(&entries), vec!["reports/"]);
}

#[tokio::test]
async fn test_nested_upload_collapses_to_top_folder() {
    let (_store, vfs) = memory_vfs();
    vfs.upload_file("input/reports/q1/data.csv", b"1,2".to_vec(), Some("text/csv"))
        .await
        .unwrap();

    let entries = vfs.list("input/", true).await.unwrap();
    assert_eq!(listing_names(&entries), vec!["reports/"]);

    let entries = vfs.list("input/reports/q1", true).await.unwrap();
    assert_eq!(listing_names(&entries), vec!["data.csv"]);
}

#[tokio::test]
async fn test_listing_order() {
    let (_store, vfs) = memory_vfs();
    vfs.upload_file("b.csv", b"b".to_vec(), None).await.unwrap();
    vfs.create_folder("", "A").await.unwrap();
    vfs.upload_file("a.csv", b"a".to_vec(), None).await.unwrap();

    let entries = vfs.list("", true).await.unwrap();
    assert_eq!(listing_names(&entries), vec!["A/", "a.csv", "b.csv"]);
}

#[tokio::test]
async fn test_move_cycle_is_rejected_without_io() {
    let (store, vfs) = memory_vfs();
    seed(
        &*store,
        &["input/reports/q1/.keep", "input/reports/q1/a.csv", "input/reports/b.csv"],
    )
    .await;
    let before = store.keys();

    let result = vfs.move_path("input/reports/", "reports/q1/").await;
    assert!(matches!(result, Err(BlobTreeError::InvalidOperation(_))));
    assert_eq!(store.keys(), before);
}

#[tokio::test]
async fn test_subtree_move_is_complete() {
    for (store_name, vfs, _guard) in backends() {
        seed(
            &**vfs.store(),
            &[
                "input/a/.keep",
                "input/a/one.csv",
                "input/a/sub/.keep",
                "input/a/sub/two.csv",
                "input/a/sub/deeper/three.csv",
            ],
        )
        .await;

        let moved = vfs.move_path("input/a/", "input/b/").await.unwrap();
        assert_eq!(moved.as_str(), "input/b/");

        assert!(
            keys_under(&**vfs.store(), "input/a/").await.is_empty(),
            "{store_name}"
        );
        assert_eq!(
            keys_under(&**vfs.store(), "input/b/").await,
            vec![
                "input/b/.keep",
                "input/b/one.csv",
                "input/b/sub/.keep",
                "input/b/sub/deeper/three.csv",
                "input/b/sub/two.csv",
            ],
            "{store_name}"
        );
    }
}

#[tokio::test]
async fn test_delete_subtree_empties_listing() {
    for (store_name, vfs, _guard) in backends() {
        seed(
            &**vfs.store(),
            &["input/a/.keep", "input/a/x.csv", "input/a/y/z.csv", "input/keep.csv"],
        )
        .await;

        let removed = vfs.delete("input/a/").await.unwrap();
        assert_eq!(removed, 3, "{store_name}");
        assert!(vfs.list("input/a/", true).await.unwrap().is_empty());
        assert_eq!(
            listing_names(&vfs.list("input/", true).await.unwrap()),
            vec!["keep.csv"],
            "{store_name}"
        );
    }
}

#[tokio::test]
async fn test_hostile_paths_stay_in_sandbox() {
    let (store, vfs) = memory_vfs();
    for raw in ["../../etc/passwd", "..\\..\\boot.ini", "input/../../x", "/./a/../b"] {
        let key = vfs.upload_file(raw, b"x".to_vec(), None).await.unwrap();
        assert!(key.starts_with("input/"), "{raw} -> {key}");
    }
    assert!(store.keys().iter().all(|k| k.starts_with("input/")));
}

#[tokio::test]
async fn test_reject_policy_refuses_traversal() {
    let (store, _) = memory_vfs();
    let vfs = VirtualFs::new(
        store.clone(),
        PathSanitizer::new("input/").with_policy(TraversalPolicy::Reject),
    );

    assert!(matches!(
        vfs.upload_file("../x.csv", b"x".to_vec(), None).await,
        Err(BlobTreeError::InvalidPath(_))
    ));
    assert!(matches!(
        vfs.list("input/..", true).await,
        Err(BlobTreeError::InvalidPath(_))
    ));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_sandbox_root_is_protected() {
    let (store, vfs) = memory_vfs();
    seed(&*store, &["input/a.csv"]).await;

    assert!(matches!(
        vfs.delete("").await,
        Err(BlobTreeError::InvalidOperation(_))
    ));
    assert!(matches!(
        vfs.delete("input/").await,
        Err(BlobTreeError::InvalidOperation(_))
    ));
    assert!(matches!(
        vfs.rename("input/", "other").await,
        Err(BlobTreeError::InvalidOperation(_))
    ));
    assert_eq!(store.keys(), vec!["input/a.csv"]);
}

#[tokio::test]
async fn test_rename_empty_folder_keeps_it_visible() {
    for (store_name, vfs, _guard) in backends() {
        vfs.create_folder("", "draft").await.unwrap();
        let renamed = vfs.rename("draft/", "final").await.unwrap();
        assert_eq!(renamed.as_str(), "input/final/");
        assert_eq!(
            listing_names(&vfs.list("", true).await.unwrap()),
            vec!["final/"],
            "{store_name}"
        );
    }
}

#[tokio::test]
async fn test_missing_targets_are_not_found() {
    let (_store, vfs) = memory_vfs();
    assert!(matches!(
        vfs.delete("nothing/").await,
        Err(BlobTreeError::NotFound(_))
    ));
    assert!(matches!(
        vfs.move_path("nothing.csv", "other.csv").await,
        Err(BlobTreeError::NotFound(_))
    ));
    assert!(matches!(
        vfs.stat("nothing.csv").await,
        Err(BlobTreeError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_flat_listing_over_local_store() {
    let (_guard, vfs) = local_vfs();
    vfs.create_folder("", "empty").await.unwrap();
    vfs.upload_file("a/b/c.csv", b"c".to_vec(), None).await.unwrap();
    vfs.upload_file("top.csv", b"t".to_vec(), None).await.unwrap();

    let entries = vfs.list("", false).await.unwrap();
    assert_eq!(listing_names(&entries), vec!["a/b/c.csv", "top.csv"]);
}

/// The same scenario against each store backend.
fn backends() -> Vec<(&'static str, VirtualFs, Option<tempfile::TempDir>)> {
    let (_, memory) = memory_vfs();
    let (temp_dir, local) = local_vfs();
    vec![("memory", memory, None), ("local", local, Some(temp_dir))]
}
