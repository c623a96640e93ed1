// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeSet;

use crate::model::{Graph, Task};

/// Outcome of arbitrating one task id present in an incoming graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The incoming version wins as-is.
    AcceptIncoming,
    /// The incoming version wins but carries no timestamp; it is stamped with server time.
    AcceptStamped,
    /// The previous version is kept. The incoming one is older, or unstamped against a
    /// stamped previous version.
    KeepPrevious,
}

/// Whole-record last-write-wins for a single task.
///
/// An unstamped (`updated_at == 0`) incoming task never overwrites a stamped one; ties go to
/// the incoming side.
pub fn resolve_task(previous: Option<&Task>, incoming: &Task) -> Resolution {
    let incoming_ts = incoming.updated_at();
    let Some(previous) = previous else {
        return if incoming_ts == 0 { Resolution::AcceptStamped } else { Resolution::AcceptIncoming };
    };

    let previous_ts = previous.updated_at();
    match (previous_ts, incoming_ts) {
        (p, 0) if p > 0 => Resolution::KeepPrevious,
        (0, 0) => Resolution::AcceptStamped,
        (p, i) if i >= p => Resolution::AcceptIncoming,
        _ => Resolution::KeepPrevious,
    }
}

/// Combines the authoritative graph with an incoming one. The result still needs
/// [`super::sanitize`].
///
/// Tasks missing from `incoming` are always retained: absence never means deletion. Users
/// are a shallow override by id. Roots are the union of both sides, filtered to surviving
/// tasks.
pub fn merge(previous: &Graph, incoming: Graph, now: u64) -> Graph {
    let mut merged = previous.clone();
    let (incoming_users, incoming_tasks, incoming_roots) = incoming.into_parts();

    for (task_id, mut task) in incoming_tasks {
        match resolve_task(merged.tasks().get(&task_id), &task) {
            Resolution::KeepPrevious => {}
            Resolution::AcceptIncoming => {
                merged.tasks_mut().insert(task_id, task);
            }
            Resolution::AcceptStamped => {
                task.set_updated_at(now);
                merged.tasks_mut().insert(task_id, task);
            }
        }
    }

    merged.users_mut().extend(incoming_users);

    let mut seen = BTreeSet::new();
    let roots = merged
        .root_task_ids()
        .iter()
        .cloned()
        .chain(incoming_roots)
        .filter(|task_id| merged.contains_task(task_id.as_str()) && seen.insert(task_id.clone()))
        .collect::<Vec<_>>();
    *merged.root_task_ids_mut() = roots;

    merged
}
