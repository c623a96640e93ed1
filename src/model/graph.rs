// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeMap;

use serde::Serialize;

use super::ids::{TaskId, UserId};
use super::task::Task;
use super::user::User;

/// The synchronized document: users, tasks and the declared root order.
///
/// A `Graph` is only guaranteed to be internally consistent after it went through
/// [`crate::sync::sanitize`]; the session never stores or serves an unsanitized graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    users: BTreeMap<UserId, User>,
    tasks: BTreeMap<TaskId, Task>,
    root_task_ids: Vec<TaskId>,
}

impl Graph {
    pub fn new(
        users: BTreeMap<UserId, User>,
        tasks: BTreeMap<TaskId, Task>,
        root_task_ids: Vec<TaskId>,
    ) -> Self {
        Self {
            users,
            tasks,
            root_task_ids,
        }
    }

    pub fn users(&self) -> &BTreeMap<UserId, User> {
        &self.users
    }

    pub fn users_mut(&mut self) -> &mut BTreeMap<UserId, User> {
        &mut self.users
    }

    pub fn tasks(&self) -> &BTreeMap<TaskId, Task> {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut BTreeMap<TaskId, Task> {
        &mut self.tasks
    }

    pub fn root_task_ids(&self) -> &[TaskId] {
        &self.root_task_ids
    }

    pub fn root_task_ids_mut(&mut self) -> &mut Vec<TaskId> {
        &mut self.root_task_ids
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn contains_task(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Inserts a task under its own id, replacing any previous version.
    pub fn insert_task(&mut self, task: Task) -> Option<Task> {
        self.tasks.insert(task.id().clone(), task)
    }

    pub fn insert_user(&mut self, user: User) -> Option<User> {
        self.users.insert(user.id().clone(), user)
    }

    pub fn into_parts(self) -> (BTreeMap<UserId, User>, BTreeMap<TaskId, Task>, Vec<TaskId>) {
        (self.users, self.tasks, self.root_task_ids)
    }
}
