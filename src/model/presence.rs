// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Ephemeral per-client presence. Never persisted and never part of the [`super::Graph`].

use serde::{Deserialize, Serialize};

use super::ids::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPresence {
    pub client_id: ClientId,
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_ids: Option<Vec<String>>,
    #[serde(default)]
    pub updated_at: u64,
}

impl PeerPresence {
    pub fn new(
        client_id: ClientId,
        name: impl Into<String>,
        color: impl Into<String>,
        updated_at: u64,
    ) -> Self {
        Self {
            client_id,
            name: name.into(),
            color: color.into(),
            cursor: None,
            selected_ids: None,
            updated_at,
        }
    }

    /// Applies a presence frame. Absent fields keep their previous value.
    pub fn apply_update(
        &mut self,
        cursor: Option<Cursor>,
        selected_ids: Option<Vec<String>>,
        now: u64,
    ) {
        if cursor.is_some() {
            self.cursor = cursor;
        }
        if selected_ids.is_some() {
            self.selected_ids = selected_ids;
        }
        self.updated_at = now;
    }
}
