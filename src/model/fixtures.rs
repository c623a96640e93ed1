// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use super::graph::Graph;
use super::ids::{ClientId, MapKey, TaskId, UserId};
use super::task::Task;
use super::user::User;

pub(crate) fn tid(value: &str) -> TaskId {
    TaskId::new(value).expect("task id")
}

pub(crate) fn cid(value: &str) -> ClientId {
    ClientId::new(value).expect("client id")
}

pub(crate) fn key(value: &str) -> MapKey {
    MapKey::new(value).expect("map key")
}

pub(crate) fn task(id: &str, parent: Option<&str>, updated_at: u64) -> Task {
    Task::new(tid(id), id.to_uppercase())
        .with_parent(parent.map(tid))
        .with_updated_at(updated_at)
}

pub(crate) fn user(id: &str, name: &str) -> User {
    User::new(UserId::new(id).expect("user id"), name, "#10b981")
}

/// Builds an unsanitized graph from tasks; roots are left for the sanitizer to derive.
pub(crate) fn graph_of(tasks: impl IntoIterator<Item = Task>) -> Graph {
    let mut graph = Graph::default();
    for task in tasks {
        graph.insert_task(task);
    }
    graph
}

/// `root` with two children and a dependency from `b` onto `a`.
pub(crate) fn small_tree() -> Graph {
    let mut graph = graph_of([
        task("root", None, 10),
        task("a", Some("root"), 10),
        task("b", Some("root"), 10).with_depends_on(vec![tid("a")]),
    ]);
    graph.insert_user(user("u1", "Ada"));
    crate::sync::sanitize(graph)
}
