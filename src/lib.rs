// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Taskmap: realtime collaboration for shared task-dependency maps.
//!
//! Each document ("map") is a graph of tasks and users identified by a [`model::MapKey`].
//! Clients write whole graphs; the server arbitrates with a revision gate and per-task
//! last-write-wins ([`sync`]), persists append-only snapshots ([`store`]), and fans out the
//! result over WebSocket ([`server`]). [`client`] holds the matching client-side engine.

pub mod client;
pub mod config;
pub mod model;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod sync;
