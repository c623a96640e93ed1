// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Graph, Position, Task, TaskId};

/// Symmetric bound applied to both canvas coordinates.
pub const POSITION_LIMIT: f64 = 100_000.0;

/// Normalizes a graph into a consistent tree. Total and idempotent.
///
/// Every graph that enters a session (from a client, from storage, or from a merge) passes
/// through here before it is trusted:
/// - task ids match their map keys, `depends_on` is de-duplicated, positions are finite and
///   clamped to [`POSITION_LIMIT`];
/// - a `parent_id` pointing at a missing task becomes `None`, and parent cycles are broken by
///   promoting the smallest id on the cycle;
/// - `children` is rebuilt from scratch from `parent_id`;
/// - `expanded` is dropped, then set to `true` on every task that has children;
/// - `root_task_ids` is the declared roots plus every parentless task, de-duplicated and
///   filtered to existing tasks.
pub fn sanitize(graph: Graph) -> Graph {
    let (users, raw_tasks, declared_roots) = graph.into_parts();

    let mut tasks = BTreeMap::new();
    for (task_id, mut task) in raw_tasks {
        if task.id() != &task_id {
            task.set_id(task_id.clone());
        }
        task.set_position(clamp_position(task.position()));
        dedup_preserving_order(task.depends_on_mut());
        task.children_mut().clear();
        task.set_expanded(None);
        tasks.insert(task_id, task);
    }

    let dangling = tasks
        .iter()
        .filter(|(_, task)| task.parent_id().is_some_and(|parent| !tasks.contains_key(parent)))
        .map(|(task_id, _)| task_id.clone())
        .collect::<Vec<_>>();
    for task_id in dangling {
        if let Some(task) = tasks.get_mut(&task_id) {
            task.set_parent_id(None);
        }
    }

    break_parent_cycles(&mut tasks);

    let links = tasks
        .iter()
        .filter_map(|(task_id, task)| task.parent_id().map(|parent| (parent.clone(), task_id.clone())))
        .collect::<Vec<_>>();
    for (parent_id, child_id) in links {
        if let Some(parent) = tasks.get_mut(&parent_id) {
            parent.children_mut().push(child_id);
        }
    }

    for task in tasks.values_mut() {
        if !task.children().is_empty() {
            task.set_expanded(Some(true));
        }
    }

    let derived_roots = tasks
        .iter()
        .filter(|(_, task)| task.parent_id().is_none())
        .map(|(task_id, _)| task_id.clone())
        .collect::<Vec<_>>();
    let mut seen = BTreeSet::new();
    let mut root_task_ids = Vec::new();
    for task_id in declared_roots.into_iter().chain(derived_roots) {
        if tasks.contains_key(&task_id) && seen.insert(task_id.clone()) {
            root_task_ids.push(task_id);
        }
    }

    Graph::new(users, tasks, root_task_ids)
}

fn clamp_coordinate(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-POSITION_LIMIT, POSITION_LIMIT)
    } else {
        0.0
    }
}

fn clamp_position(position: Position) -> Position {
    Position::new(clamp_coordinate(position.x), clamp_coordinate(position.y))
}

pub(crate) fn dedup_preserving_order(ids: &mut Vec<TaskId>) {
    let mut seen = BTreeSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

fn break_parent_cycles(tasks: &mut BTreeMap<TaskId, Task>) {
    while let Some(task_id) = find_cycle_representative(tasks) {
        if let Some(task) = tasks.get_mut(&task_id) {
            task.set_parent_id(None);
        }
    }
}

/// Returns the smallest id of some parent cycle, if any cycle exists.
///
/// Assumes every `parent_id` references an existing task.
fn find_cycle_representative(tasks: &BTreeMap<TaskId, Task>) -> Option<TaskId> {
    let mut settled = BTreeSet::<&TaskId>::new();

    for start in tasks.keys() {
        if settled.contains(start) {
            continue;
        }

        let mut path = Vec::<&TaskId>::new();
        let mut on_path = BTreeSet::<&TaskId>::new();
        let mut cursor = Some(start);

        while let Some(task_id) = cursor {
            if settled.contains(task_id) {
                break;
            }
            if !on_path.insert(task_id) {
                let cycle_start = path.iter().position(|id| *id == task_id).unwrap_or(0);
                return path[cycle_start..].iter().min().map(|id| (*id).clone());
            }
            path.push(task_id);
            cursor = tasks.get(task_id).and_then(Task::parent_id);
        }

        settled.extend(path);
    }

    None
}
