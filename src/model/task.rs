// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use serde::Serialize;

use super::ids::{TaskId, UserId};

/// Canvas coordinates. Carried through sync untouched apart from clamping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Deadline {
    #[serde(rename = "dateISO")]
    date_iso: Option<String>,
}

impl Deadline {
    pub fn new(date_iso: Option<String>) -> Self {
        Self { date_iso }
    }

    pub fn date_iso(&self) -> Option<&str> {
        self.date_iso.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.date_iso.is_some()
    }
}

/// One node of the shared task graph.
///
/// `children` is a derived index rebuilt by the sanitizer from every task's `parent_id`; it is
/// serialized for clients but never trusted on input. `updated_at` (milliseconds) is only used
/// for last-write-wins arbitration, with `0` meaning "never stamped".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: TaskId,
    title: String,
    assignee_id: Option<UserId>,
    deadline: Deadline,
    parent_id: Option<TaskId>,
    children: Vec<TaskId>,
    depends_on: Vec<TaskId>,
    position: Position,
    updated_at: u64,
    done: bool,
    memo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expanded: Option<bool>,
}

impl Task {
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            assignee_id: None,
            deadline: Deadline::default(),
            parent_id: None,
            children: Vec::new(),
            depends_on: Vec::new(),
            position: Position::default(),
            updated_at: 0,
            done: false,
            memo: String::new(),
            expanded: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Option<TaskId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<TaskId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_updated_at(mut self, updated_at: u64) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn set_id(&mut self, id: TaskId) {
        self.id = id;
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn assignee_id(&self) -> Option<&UserId> {
        self.assignee_id.as_ref()
    }

    pub fn set_assignee_id(&mut self, assignee_id: Option<UserId>) {
        self.assignee_id = assignee_id;
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub fn set_deadline(&mut self, deadline: Deadline) {
        self.deadline = deadline;
    }

    pub fn parent_id(&self) -> Option<&TaskId> {
        self.parent_id.as_ref()
    }

    pub fn set_parent_id(&mut self, parent_id: Option<TaskId>) {
        self.parent_id = parent_id;
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<TaskId> {
        &mut self.children
    }

    pub fn depends_on(&self) -> &[TaskId] {
        &self.depends_on
    }

    pub fn depends_on_mut(&mut self) -> &mut Vec<TaskId> {
        &mut self.depends_on
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    pub fn set_updated_at(&mut self, updated_at: u64) {
        self.updated_at = updated_at;
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn set_done(&mut self, done: bool) {
        self.done = done;
    }

    pub fn memo(&self) -> &str {
        &self.memo
    }

    pub fn set_memo(&mut self, memo: impl Into<String>) {
        self.memo = memo.into();
    }

    /// UI-only visibility hint. Never read from the wire.
    pub fn expanded(&self) -> Option<bool> {
        self.expanded
    }

    pub fn set_expanded(&mut self, expanded: Option<bool>) {
        self.expanded = expanded;
    }
}
