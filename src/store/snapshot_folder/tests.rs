// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::fs;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::{encode_persisted_id_segment, SnapshotFolder, WriteDurability};
use crate::model::fixtures::{key, small_tree};
use crate::model::Graph;
use crate::store::{load_latest_snapshot, SnapshotRecord, SnapshotStore};

struct FolderCtx {
    tmp: TempDir,
    folder: SnapshotFolder,
}

#[fixture]
fn ctx() -> FolderCtx {
    let tmp = tempfile::tempdir().expect("tempdir");
    let folder = SnapshotFolder::new(tmp.path().join("snapshots"));
    FolderCtx { tmp, folder }
}

#[rstest]
#[case::plain("team-board", "team-board")]
#[case::reserved_device("con", "~636f6e")]
#[case::separator("a/b", "~612f62")]
#[case::dot_prefix(".hidden", "~2e68696464656e")]
#[case::tilde_prefix("~x", "~7e78")]
fn encodes_map_keys_into_safe_segments(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(encode_persisted_id_segment(raw), expected);
}

#[rstest]
fn writes_and_reads_back_newest_first(ctx: FolderCtx) {
    let map = key("board");
    ctx.folder.write_snapshot(&map, &SnapshotRecord::new(1, Graph::default())).expect("write 1");
    std::thread::sleep(std::time::Duration::from_millis(3));
    ctx.folder.write_snapshot(&map, &SnapshotRecord::new(2, small_tree())).expect("write 2");

    let records = ctx.folder.read_recent(&map, 25).expect("read");
    assert_eq!(records.iter().map(|record| record.revision).collect::<Vec<_>>(), vec![2, 1]);
    assert_eq!(records[0].graph, small_tree());

    let only_newest = ctx.folder.read_recent(&map, 1).expect("read");
    assert_eq!(only_newest.len(), 1);
    assert_eq!(only_newest[0].revision, 2);
}

#[rstest]
fn missing_map_directory_reads_as_empty(ctx: FolderCtx) {
    assert!(ctx.folder.read_recent(&key("never-written"), 25).expect("read").is_empty());
}

#[rstest]
fn skips_unreadable_files_and_leaves_no_temp_files(ctx: FolderCtx) {
    let map = key("board");
    ctx.folder.write_snapshot(&map, &SnapshotRecord::new(5, small_tree())).expect("write");
    let dir = ctx.folder.map_dir(&map);
    fs::write(dir.join("9999999999999999-0000000000000009.snapshot.json"), b"{truncated")
        .expect("garbage");
    fs::write(dir.join("notes.txt"), b"ignored").expect("other file");

    let records = ctx.folder.read_recent(&map, 25).expect("read");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].revision, 5);

    let leftovers = fs::read_dir(&dir)
        .expect("list")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".taskmap.tmp."))
        .count();
    assert_eq!(leftovers, 0);
}

#[rstest]
fn reads_legacy_bare_graph_files(ctx: FolderCtx) {
    let map = key("legacy");
    let dir = ctx.folder.map_dir(&map);
    fs::create_dir_all(&dir).expect("dir");
    let bare = serde_json::to_vec(&small_tree()).expect("serialize");
    fs::write(dir.join("0000000000000001-0000000000000000.snapshot.json"), bare).expect("write");

    let records = ctx.folder.read_recent(&map, 25).expect("read");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].revision, 0);
    assert_eq!(records[0].graph, small_tree());
}

#[cfg(unix)]
#[rstest]
fn refuses_to_write_through_symlinked_map_dir(ctx: FolderCtx) {
    let map = key("linked");
    let elsewhere = ctx.tmp.path().join("elsewhere");
    fs::create_dir_all(&elsewhere).expect("target");
    fs::create_dir_all(ctx.folder.root()).expect("root");
    std::os::unix::fs::symlink(&elsewhere, ctx.folder.map_dir(&map)).expect("symlink");

    let err = ctx
        .folder
        .write_snapshot(&map, &SnapshotRecord::new(1, small_tree()))
        .unwrap_err();
    assert!(matches!(err, crate::store::StoreError::SymlinkRefused { .. }));
}

#[tokio::test]
async fn async_store_round_trip_with_durable_writes() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let folder = SnapshotFolder::new(tmp.path()).with_durability(WriteDurability::Durable);
    let map = key("board");

    folder.create_snapshot(&map, &SnapshotRecord::new(3, small_tree())).await.expect("create");
    let latest = load_latest_snapshot(&folder, &map, 25).await.expect("load").expect("record");
    assert_eq!(latest.revision, 3);
    assert_eq!(latest.graph, small_tree());
}
