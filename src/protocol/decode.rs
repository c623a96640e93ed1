// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Lenient JSON → [`Graph`] decoding.
//!
//! The envelope is strict (a graph must carry `tasks`, `users` and `rootTaskIds`); the fields
//! inside are coerced, because clients and old snapshots disagree on details and a single odd
//! field must not cost the whole document.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::model::{Deadline, Graph, Position, Task, TaskId, User, UserId};
use crate::sync::sanitize;

use super::ProtocolError;

pub fn decode_graph(value: &Value) -> Result<Graph, ProtocolError> {
    let Some(object) = value.as_object() else {
        return Err(ProtocolError::InvalidGraph("graph must be an object"));
    };
    let Some(tasks) = object.get("tasks").and_then(Value::as_object) else {
        return Err(ProtocolError::InvalidGraph("`tasks` must be an object"));
    };
    let Some(users) = object.get("users").and_then(Value::as_object) else {
        return Err(ProtocolError::InvalidGraph("`users` must be an object"));
    };
    let Some(roots) = object.get("rootTaskIds").and_then(Value::as_array) else {
        return Err(ProtocolError::InvalidGraph("`rootTaskIds` must be an array"));
    };

    let mut graph = Graph::default();
    for (raw_id, raw_task) in tasks {
        if let Some(task) = decode_task(raw_id, raw_task) {
            graph.insert_task(task);
        }
    }
    for (raw_id, raw_user) in users {
        if let Some(user) = decode_user(raw_id, raw_user) {
            graph.insert_user(user);
        }
    }
    *graph.root_task_ids_mut() = task_id_list(roots);

    Ok(graph)
}

/// Decodes a list of task ids, dropping anything that is not a valid id string.
pub fn task_id_list(values: &[Value]) -> Vec<TaskId> {
    values
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|raw| TaskId::new(raw).ok())
        .collect()
}

fn decode_task(raw_id: &str, value: &Value) -> Option<Task> {
    let object = value.as_object()?;
    let task_id = TaskId::new(raw_id).ok()?;

    let mut task = Task::new(task_id, string_field(object, "title"));
    task.set_parent_id(optional_id(object.get("parentId")));
    task.set_assignee_id(optional_id(object.get("assigneeId")));
    task.set_deadline(decode_deadline(object.get("deadline")));
    *task.depends_on_mut() =
        object.get("dependsOn").and_then(Value::as_array).map(|deps| task_id_list(deps)).unwrap_or_default();
    task.set_position(decode_position(object.get("position")));
    task.set_updated_at(decode_timestamp(object.get("updatedAt")));
    task.set_done(object.get("done").and_then(Value::as_bool).unwrap_or(false));
    task.set_memo(string_field(object, "memo"));
    Some(task)
}

fn decode_user(raw_id: &str, value: &Value) -> Option<User> {
    let object = value.as_object()?;
    let user_id = UserId::new(raw_id).ok()?;
    let avatar_url = object.get("avatarUrl").and_then(Value::as_str).map(str::to_owned);
    Some(
        User::new(user_id, string_field(object, "name"), string_field(object, "color"))
            .with_avatar_url(avatar_url),
    )
}

fn string_field(object: &Map<String, Value>, field: &str) -> String {
    object.get(field).and_then(Value::as_str).unwrap_or_default().to_owned()
}

fn optional_id<T>(value: Option<&Value>) -> Option<crate::model::Id<T>> {
    value.and_then(Value::as_str).and_then(|raw| crate::model::Id::new(raw).ok())
}

fn decode_deadline(value: Option<&Value>) -> Deadline {
    let date_iso = match value {
        Some(Value::String(raw)) => Some(raw.clone()),
        Some(Value::Object(object)) => object.get("dateISO").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    };
    Deadline::new(date_iso.filter(|raw| !raw.is_empty()))
}

fn finite_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(number) => number.as_f64()?,
        Value::String(raw) => raw.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn decode_position(value: Option<&Value>) -> Position {
    let Some(object) = value.and_then(Value::as_object) else {
        return Position::default();
    };
    Position::new(
        finite_number(object.get("x")).unwrap_or(0.0),
        finite_number(object.get("y")).unwrap_or(0.0),
    )
}

fn decode_timestamp(value: Option<&Value>) -> u64 {
    match finite_number(value) {
        Some(ts) if ts > 0.0 => ts as u64,
        _ => 0,
    }
}

/// Deserialized graphs are decoded and then sanitized, like every other inbound graph.
impl<'de> Deserialize<'de> for Graph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        decode_graph(&value).map(sanitize).map_err(serde::de::Error::custom)
    }
}
