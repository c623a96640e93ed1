// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Graph reconciliation: sanitize, merge, and explicit deletions.
//!
//! These are pure functions over [`Graph`]. The session runs them in a fixed order for every
//! accepted write: `sanitize(apply_deletions(merge(previous, incoming), deleted))`.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::{Graph, TaskId};

mod deletions;
mod merge;
mod sanitize;

pub use deletions::apply_deletions;
pub use merge::{merge, resolve_task, Resolution};
pub use sanitize::{sanitize, POSITION_LIMIT};

pub(crate) use sanitize::dedup_preserving_order;

/// Produces the next authoritative graph from the current one and a client write.
pub fn reconcile(
    previous: &Graph,
    incoming: Graph,
    deleted: &BTreeSet<TaskId>,
    now: u64,
) -> Graph {
    sanitize(apply_deletions(merge(previous, incoming, now), deleted))
}

/// Server wall-clock time in unix milliseconds, the basis for `updatedAt` stamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
