// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{
    ConnectionId, IncomingState, MapSession, Origin, SessionRegistry, UpdateOutcome,
};
use crate::config::SyncConfig;
use crate::model::fixtures::{cid, graph_of, key, small_tree, task, tid};
use crate::model::{ClientId, Cursor, Graph};
use crate::protocol::{ServerMessage, FROM_HTTP, FROM_SERVER};
use crate::store::{MemorySnapshotStore, SnapshotRecord};

type Inbox = mpsc::UnboundedReceiver<Arc<ServerMessage>>;

const SLOW_REFRESH: SyncConfig = SyncConfig {
    refresh_interval: Duration::from_secs(3_600),
    snapshot_scan_limit: 25,
};

fn seeded_store(revision: u64, graph: Graph) -> Arc<MemorySnapshotStore> {
    let store = Arc::new(MemorySnapshotStore::new());
    store.insert(key("board"), SnapshotRecord::new(revision, graph));
    store
}

fn base_graph() -> Graph {
    crate::sync::sanitize(graph_of([task("base", None, 50)]))
}

async fn join(
    session: &mut MapSession,
    client: &str,
    connection_id: ConnectionId,
) -> Inbox {
    let (outbox, inbox) = mpsc::unbounded_channel();
    session
        .connect(cid(client), client.to_uppercase(), "#0ea5e9".to_owned(), connection_id, outbox)
        .await;
    inbox
}

fn drain(inbox: &mut Inbox) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Ok(frame) = inbox.try_recv() {
        frames.push((*frame).clone());
    }
    frames
}

fn from_connection(
    revision: Option<u64>,
    graph: Graph,
    client: &str,
    connection_id: ConnectionId,
) -> IncomingState {
    IncomingState {
        revision,
        graph,
        deleted: BTreeSet::new(),
        origin: Origin::Connection {
            client_id: cid(client),
            connection_id,
        },
    }
}

fn state_frames(frames: &[ServerMessage]) -> Vec<(u64, &Graph, &str)> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ServerMessage::State {
                revision,
                graph,
                from,
            } => Some((*revision, graph, from.as_str())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn cold_session_starts_from_newest_non_empty_snapshot() {
    let store = Arc::new(MemorySnapshotStore::new());
    store.insert(key("board"), SnapshotRecord::new(3, small_tree()));
    store.insert(key("board"), SnapshotRecord::new(4, Graph::default()));
    let mut session = MapSession::new(key("board"), store, SLOW_REFRESH);

    let view = session.view().await;
    assert_eq!(view.revision, 3);
    assert_eq!(view.graph, small_tree());
    assert_eq!(view.last_persist_error, None);
}

#[tokio::test]
async fn stale_write_is_rejected_and_sender_resynced() {
    let mut session = MapSession::new(key("board"), seeded_store(5, base_graph()), SLOW_REFRESH);
    let mut inbox = join(&mut session, "a", 1).await;
    drain(&mut inbox);

    let outcome = session
        .apply_update(from_connection(Some(3), graph_of([task("t1", None, 100)]), "a", 1))
        .await;

    assert_eq!(outcome, UpdateOutcome::Rejected { revision: 5 });
    assert_eq!(session.revision(), 5);
    assert!(!session.graph().contains_task("t1"));

    let frames = drain(&mut inbox);
    let states = state_frames(&frames);
    assert_eq!(states.len(), 1);
    let (revision, graph, from) = states[0];
    assert_eq!(revision, 5);
    assert_eq!(from, FROM_SERVER);
    assert_eq!(graph, &base_graph());
}

#[tokio::test]
async fn write_without_revision_is_stale() {
    let mut session = MapSession::new(key("board"), seeded_store(5, base_graph()), SLOW_REFRESH);
    let outcome = session
        .apply_update(from_connection(None, graph_of([task("t1", None, 100)]), "a", 1))
        .await;
    assert_eq!(outcome, UpdateOutcome::Rejected { revision: 5 });
}

#[tokio::test]
async fn concurrent_disjoint_edits_both_land() {
    let mut session = MapSession::new(key("board"), seeded_store(5, base_graph()), SLOW_REFRESH);
    let mut inbox_a = join(&mut session, "a", 1).await;
    let mut inbox_b = join(&mut session, "b", 2).await;
    drain(&mut inbox_a);
    drain(&mut inbox_b);

    let first = session
        .apply_update(from_connection(Some(5), graph_of([task("t1", None, 100)]), "a", 1))
        .await;
    assert_eq!(first, UpdateOutcome::Accepted { revision: 6 });

    // B raced A from the same base and is bounced with the authoritative state.
    let raced = session
        .apply_update(from_connection(Some(5), graph_of([task("t2", None, 101)]), "b", 2))
        .await;
    assert_eq!(raced, UpdateOutcome::Rejected { revision: 6 });
    let frames = drain(&mut inbox_b);
    let resync = state_frames(&frames)
        .into_iter()
        .find(|(_, _, from)| *from == FROM_SERVER)
        .map(|(revision, _, _)| revision);
    assert_eq!(resync, Some(6));

    // B resends its edit on top of the new baseline; absent tasks are not deletions.
    let second = session
        .apply_update(from_connection(Some(6), graph_of([task("t2", None, 101)]), "b", 2))
        .await;
    assert_eq!(second, UpdateOutcome::Accepted { revision: 7 });

    for expected in ["base", "t1", "t2"] {
        assert!(session.graph().contains_task(expected), "{expected} missing");
    }
}

#[tokio::test]
async fn revision_advances_past_higher_client_claims() {
    let mut session = MapSession::new(key("board"), Arc::new(MemorySnapshotStore::new()), SLOW_REFRESH);
    let outcome = session
        .apply_update(from_connection(Some(10), graph_of([task("t1", None, 1)]), "a", 1))
        .await;
    assert_eq!(outcome, UpdateOutcome::Accepted { revision: 11 });

    let before = session.revision();
    let rejected = session
        .apply_update(from_connection(Some(4), graph_of([task("t9", None, 1)]), "a", 1))
        .await;
    assert!(!rejected.is_accepted());
    assert_eq!(session.revision(), before);
}

#[tokio::test]
async fn accepted_write_is_broadcast_and_acked() {
    let mut session = MapSession::new(key("board"), Arc::new(MemorySnapshotStore::new()), SLOW_REFRESH);
    let mut tab_one = join(&mut session, "a", 1).await;
    let mut tab_two = join(&mut session, "a", 2).await;
    let mut other = join(&mut session, "b", 3).await;
    drain(&mut tab_one);
    drain(&mut tab_two);
    drain(&mut other);

    session
        .apply_update(from_connection(Some(0), small_tree(), "a", 1))
        .await;

    for inbox in [&mut tab_one, &mut tab_two, &mut other] {
        let frames = drain(inbox);
        let states = state_frames(&frames);
        assert_eq!(states.len(), 1, "{frames:?}");
        assert_eq!(states[0].0, 1);
        assert_eq!(states[0].1, &small_tree());
        assert_eq!(states[0].2, "a");
    }
}

#[tokio::test]
async fn http_write_broadcasts_to_everyone() {
    let mut session = MapSession::new(key("board"), Arc::new(MemorySnapshotStore::new()), SLOW_REFRESH);
    let mut inbox = join(&mut session, "a", 1).await;
    drain(&mut inbox);

    let outcome = session
        .apply_update(IncomingState {
            revision: Some(0),
            graph: small_tree(),
            deleted: BTreeSet::new(),
            origin: Origin::Http { client_id: None },
        })
        .await;
    assert!(outcome.is_accepted());

    let frames = drain(&mut inbox);
    let states = state_frames(&frames);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].2, FROM_HTTP);
}

#[tokio::test]
async fn declared_deletions_apply_through_the_session() {
    let mut session = MapSession::new(key("board"), seeded_store(2, small_tree()), SLOW_REFRESH);
    session.refresh(true).await;

    let mut update = from_connection(Some(2), Graph::default(), "a", 1);
    update.deleted = [tid("a")].into_iter().collect();
    session.apply_update(update).await;

    assert!(!session.graph().contains_task("a"));
    let b = session.graph().task("b").expect("b");
    assert!(b.depends_on().is_empty());
}

#[tokio::test]
async fn snapshots_are_persisted_behind_the_update() {
    let store = Arc::new(MemorySnapshotStore::new());
    let mut session = MapSession::new(key("board"), store.clone(), SLOW_REFRESH);

    let outcome = session
        .apply_update(from_connection(Some(0), small_tree(), "a", 1))
        .await;
    session.flush().await;

    let records = store.records(&key("board"));
    let last = records.last().expect("persisted");
    assert_eq!(last.revision, outcome.revision());
    assert_eq!(last.graph, small_tree());
}

#[tokio::test]
async fn persistence_failure_is_advisory_only() {
    let store = Arc::new(MemorySnapshotStore::new());
    let mut session = MapSession::new(key("board"), store.clone(), SLOW_REFRESH);
    let mut other = join(&mut session, "b", 2).await;
    drain(&mut other);

    store.set_fail_writes(true);
    let outcome = session
        .apply_update(from_connection(Some(0), small_tree(), "a", 1))
        .await;
    session.flush().await;

    assert!(outcome.is_accepted());
    assert_eq!(session.graph(), &small_tree());
    assert_eq!(state_frames(&drain(&mut other)).len(), 1);
    let advisory = session.view().await.last_persist_error.expect("advisory");
    assert!(advisory.message.contains("writes disabled"));
    assert!(advisory.at > 0);

    store.set_fail_writes(false);
    session
        .apply_update(from_connection(Some(1), small_tree(), "a", 1))
        .await;
    session.flush().await;
    assert_eq!(session.last_persist_error(), None);
}

#[tokio::test]
async fn init_lists_peers_and_join_is_announced_once() {
    let mut session = MapSession::new(key("board"), seeded_store(2, small_tree()), SLOW_REFRESH);
    let mut inbox_a = join(&mut session, "a", 1).await;

    let frames = drain(&mut inbox_a);
    let Some(ServerMessage::Init {
        revision,
        graph,
        peers,
        ..
    }) = frames.first()
    else {
        panic!("first frame must be init: {frames:?}");
    };
    assert_eq!(*revision, 2);
    assert_eq!(graph, &small_tree());
    assert_eq!(peers.len(), 1);

    let mut inbox_b = join(&mut session, "b", 2).await;
    let _second_tab = join(&mut session, "b", 3).await;

    let joins = drain(&mut inbox_a)
        .into_iter()
        .filter(|frame| matches!(frame, ServerMessage::PeerJoin { .. }))
        .count();
    assert_eq!(joins, 1);
    assert!(drain(&mut inbox_b)
        .iter()
        .all(|frame| !matches!(frame, ServerMessage::PeerJoin { .. })));
}

#[tokio::test]
async fn peer_leaves_only_with_last_connection() {
    let mut session = MapSession::new(key("board"), Arc::new(MemorySnapshotStore::new()), SLOW_REFRESH);
    let mut watcher = join(&mut session, "w", 1).await;
    let _tab_one = join(&mut session, "a", 2).await;
    let _tab_two = join(&mut session, "a", 3).await;
    drain(&mut watcher);
    let client: ClientId = cid("a");

    assert!(!session.disconnect(&client, 2));
    assert!(session.peer(&client).is_some());
    assert!(drain(&mut watcher).is_empty());

    assert!(session.disconnect(&client, 3));
    assert!(session.peer(&client).is_none());
    assert_eq!(
        drain(&mut watcher),
        vec![ServerMessage::PeerLeave { client_id: cid("a") }]
    );
    assert_eq!(session.connection_count(), 1);
}

#[tokio::test]
async fn presence_is_relayed_to_other_clients() {
    let mut session = MapSession::new(key("board"), Arc::new(MemorySnapshotStore::new()), SLOW_REFRESH);
    let mut inbox_a = join(&mut session, "a", 1).await;
    let mut inbox_b = join(&mut session, "b", 2).await;
    drain(&mut inbox_a);
    drain(&mut inbox_b);

    session.update_presence(&cid("a"), Some(Cursor { x: 4.0, y: 2.0 }), None);
    session.update_presence(&cid("a"), None, Some(vec!["t1".to_owned()]));

    assert!(drain(&mut inbox_a).is_empty());
    let frames = drain(&mut inbox_b);
    assert_eq!(frames.len(), 2);
    let ServerMessage::Presence { peer } = &frames[1] else {
        panic!("expected presence: {frames:?}");
    };
    assert_eq!(peer.cursor, Some(Cursor { x: 4.0, y: 2.0 }));
    assert_eq!(peer.selected_ids.as_deref(), Some(&["t1".to_owned()][..]));
}

#[tokio::test]
async fn refresh_adopts_newer_snapshot_from_sibling_process() {
    let store = Arc::new(MemorySnapshotStore::new());
    let config = SyncConfig {
        refresh_interval: Duration::ZERO,
        ..SyncConfig::default()
    };
    let mut session = MapSession::new(key("board"), store.clone(), config);
    session
        .apply_update(from_connection(Some(0), graph_of([task("local", None, 10)]), "a", 1))
        .await;
    session.flush().await;

    store.insert(
        key("board"),
        SnapshotRecord::new(5, crate::sync::sanitize(graph_of([task("remote", None, 10)]))),
    );

    let view = session.view().await;
    assert_eq!(view.revision, 5);
    assert!(view.graph.contains_task("remote"));
    assert!(!view.graph.contains_task("local"), "a newer snapshot is authoritative");
}

#[tokio::test]
async fn deletion_by_sibling_process_is_not_resurrected() {
    let store = seeded_store(
        5,
        crate::sync::sanitize(graph_of([task("t1", None, 10), task("t3", None, 10)])),
    );
    let config = SyncConfig {
        refresh_interval: Duration::ZERO,
        ..SyncConfig::default()
    };
    let mut first = MapSession::new(key("board"), store.clone(), config);
    let mut second = MapSession::new(key("board"), store.clone(), config);
    assert!(first.view().await.graph.contains_task("t3"));
    assert!(second.view().await.graph.contains_task("t3"));

    let mut deletion = from_connection(Some(5), graph_of([task("t1", None, 10)]), "b", 2);
    deletion.deleted = BTreeSet::from([tid("t3")]);
    assert_eq!(second.apply_update(deletion).await, UpdateOutcome::Accepted { revision: 6 });
    second.flush().await;

    let view = first.view().await;
    assert_eq!(view.revision, 6);
    assert!(!view.graph.contains_task("t3"));

    let unrelated = from_connection(
        Some(6),
        graph_of([task("t1", None, 10), task("t4", None, 20)]),
        "a",
        1,
    );
    assert_eq!(first.apply_update(unrelated).await, UpdateOutcome::Accepted { revision: 7 });
    first.flush().await;

    let head = store.records(&key("board")).pop().expect("stored head");
    assert_eq!(head.revision, 7);
    assert!(head.graph.contains_task("t4"));
    assert!(!head.graph.contains_task("t3"), "deleted task came back");
}

#[tokio::test]
async fn refresh_is_throttled_and_never_lowers_revision() {
    let store = seeded_store(2, small_tree());
    let mut session = MapSession::new(key("board"), store.clone(), SLOW_REFRESH);
    assert_eq!(session.view().await.revision, 2);

    store.insert(key("board"), SnapshotRecord::new(9, base_graph()));
    assert_eq!(session.view().await.revision, 2);

    session.refresh(true).await;
    assert_eq!(session.revision(), 9);

    store.insert(key("board"), SnapshotRecord::new(1, base_graph()));
    session.refresh(true).await;
    assert_eq!(session.revision(), 9);
}

#[tokio::test]
async fn registry_shares_sessions_and_evicts_idle_ones() {
    let registry = SessionRegistry::new(Arc::new(MemorySnapshotStore::new()), SLOW_REFRESH);
    let first = registry.get_or_create(&key("one")).await;
    let again = registry.get_or_create(&key("one")).await;
    assert!(Arc::ptr_eq(&first, &again));

    drop((first, again));

    let busy = registry.get_or_create(&key("two")).await;
    let (outbox, _inbox) = mpsc::unbounded_channel();
    let connection_id = registry.next_connection_id();
    busy.lock()
        .await
        .connect(cid("a"), "A".to_owned(), "#fff".to_owned(), connection_id, outbox)
        .await;

    assert_eq!(registry.len().await, 2);
    assert_eq!(registry.evict_idle().await, 1);
    assert!(registry.get(&key("one")).await.is_none());
    assert!(registry.get(&key("two")).await.is_some());
    assert_ne!(registry.next_connection_id(), connection_id);
}

#[tokio::test]
async fn eviction_skips_sessions_still_held_by_a_handler() {
    let registry = SessionRegistry::new(Arc::new(MemorySnapshotStore::new()), SLOW_REFRESH);
    let held = registry.get_or_create(&key("board")).await;

    // A handler holds the session but has not connected yet.
    assert_eq!(registry.evict_idle().await, 0);

    let (outbox, _inbox) = mpsc::unbounded_channel();
    let connection_id = registry.next_connection_id();
    held.lock()
        .await
        .connect(cid("a"), "A".to_owned(), "#fff".to_owned(), connection_id, outbox)
        .await;
    let fresh = registry.get_or_create(&key("board")).await;
    assert!(Arc::ptr_eq(&held, &fresh));

    held.lock().await.disconnect(&cid("a"), connection_id);
    drop((held, fresh));
    assert_eq!(registry.evict_idle().await, 1);
    assert!(registry.get(&key("board")).await.is_none());
}
