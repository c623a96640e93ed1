// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::model::MapKey;
use crate::protocol::PersistAdvisory;
use crate::store::{SnapshotRecord, SnapshotStore};
use crate::sync::now_millis;

#[derive(Debug)]
enum WriterCommand {
    Write(SnapshotRecord),
    Flush(oneshot::Sender<()>),
}

/// Write-behind snapshot persistence for one session.
///
/// Records are handed to a background task and written in order. When several records queue up
/// while a write is in flight only the newest is written, since snapshots are whole documents.
/// The outcome of the last write is published as an advisory: `Some` after a failure, `None`
/// after the next success.
#[derive(Debug)]
pub struct SnapshotWriter {
    commands: mpsc::UnboundedSender<WriterCommand>,
    advisory: watch::Receiver<Option<PersistAdvisory>>,
}

impl SnapshotWriter {
    /// Spawns the writer task on the current tokio runtime.
    pub fn spawn(key: MapKey, store: Arc<dyn SnapshotStore>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (advisory_tx, advisory) = watch::channel(None);
        tokio::spawn(run_writer(key, store, receiver, advisory_tx));
        Self { commands, advisory }
    }

    pub fn enqueue(&self, record: SnapshotRecord) {
        if self.commands.send(WriterCommand::Write(record)).is_err() {
            tracing::warn!("snapshot writer stopped; dropping snapshot");
        }
    }

    /// Waits until every record enqueued so far has been handed to the store.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(WriterCommand::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    pub fn last_error(&self) -> Option<PersistAdvisory> {
        self.advisory.borrow().clone()
    }
}

async fn run_writer(
    key: MapKey,
    store: Arc<dyn SnapshotStore>,
    mut receiver: mpsc::UnboundedReceiver<WriterCommand>,
    advisory: watch::Sender<Option<PersistAdvisory>>,
) {
    while let Some(first) = receiver.recv().await {
        let mut latest = None;
        let mut waiters = Vec::new();
        let mut take = |command: WriterCommand| match command {
            WriterCommand::Write(record) => latest = Some(record),
            WriterCommand::Flush(done) => waiters.push(done),
        };
        take(first);
        while let Ok(command) = receiver.try_recv() {
            take(command);
        }

        if let Some(record) = latest {
            match store.create_snapshot(&key, &record).await {
                Ok(()) => {
                    tracing::debug!(map = %key, revision = record.revision, "snapshot persisted");
                    advisory.send_replace(None);
                }
                Err(err) => {
                    tracing::warn!(map = %key, revision = record.revision, error = %err, "snapshot write failed");
                    advisory.send_replace(Some(PersistAdvisory {
                        at: now_millis(),
                        message: err.to_string(),
                    }));
                }
            }
        }

        for done in waiters {
            let _ = done.send(());
        }
    }
}
