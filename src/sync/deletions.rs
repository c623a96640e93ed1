// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeSet;

use crate::model::{Graph, TaskId};

/// Removes explicitly deleted tasks and repairs references to them.
///
/// Survivors lose the deleted ids from `depends_on`; survivors parented by a deleted task are
/// promoted to roots. The result still needs [`super::sanitize`].
pub fn apply_deletions(mut graph: Graph, deleted: &BTreeSet<TaskId>) -> Graph {
    if deleted.is_empty() {
        return graph;
    }

    graph.tasks_mut().retain(|task_id, _| !deleted.contains(task_id));

    for task in graph.tasks_mut().values_mut() {
        if task.parent_id().is_some_and(|parent| deleted.contains(parent)) {
            task.set_parent_id(None);
        }
        task.depends_on_mut().retain(|dependency| !deleted.contains(dependency));
    }

    graph.root_task_ids_mut().retain(|task_id| !deleted.contains(task_id));

    graph
}
