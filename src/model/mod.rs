// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Shared document model.
//!
//! A document ("map") is a [`Graph`] of tasks and users. Presence is kept next to, but never
//! inside, the graph.

#[cfg(test)]
pub(crate) mod fixtures;
pub mod graph;
pub mod ids;
pub mod presence;
pub mod task;
pub mod user;

pub use graph::Graph;
pub use ids::{ClientId, Id, IdError, MapKey, TaskId, UserId};
pub use presence::{Cursor, PeerPresence};
pub use task::{Deadline, Position, Task};
pub use user::User;
