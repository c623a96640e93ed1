// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Tunables for the server-side session and the client engine.

use std::time::Duration;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(2_000);
pub const DEFAULT_SNAPSHOT_SCAN_LIMIT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Minimum time between two reads of the snapshot store by one session.
    pub refresh_interval: Duration,
    /// How many recent snapshots a session scans when looking for a non-empty one.
    pub snapshot_scan_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            snapshot_scan_limit: DEFAULT_SNAPSHOT_SCAN_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientConfig {
    pub heartbeat_interval: Duration,
    /// A connection without a pong for this long is treated as half-open and closed.
    pub pong_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_factor: f64,
    pub backoff_max: Duration,
    /// The attempt counter stops growing here; retries themselves are unbounded.
    pub backoff_attempt_cap: u32,
    pub debounce: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(70),
            backoff_base: Duration::from_millis(800),
            backoff_factor: 1.6,
            backoff_max: Duration::from_millis(15_000),
            backoff_attempt_cap: 12,
            debounce: Duration::from_millis(200),
        }
    }
}

impl ClientConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.clamp(1, self.backoff_attempt_cap.max(1));
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let millis = self.backoff_base.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.backoff_max.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }
}
