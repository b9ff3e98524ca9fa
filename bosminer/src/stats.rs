// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Control-plane facing counters and progress snapshots. Never gates core behaviour:
//! Farm and PoolManager keep working even if nobody ever reads these.

use std::time::{SystemTime, UNIX_EPOCH};

/// Per-miner accept/reject/failure counters plus last-update timestamps. Vectors grow
/// on demand by miner index; reads past the current length return zero defaults.
#[derive(Debug, Default)]
pub struct SolutionStats {
    accepts: Vec<u64>,
    accepts_stale: Vec<u64>,
    rejects: Vec<u64>,
    failures: Vec<u64>,
    last_updated: Vec<u64>,
}

impl SolutionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_len(&mut self, index: usize) {
        let len = index + 1;
        if self.accepts.len() < len {
            self.accepts.resize(len, 0);
            self.accepts_stale.resize(len, 0);
            self.rejects.resize(len, 0);
            self.failures.resize(len, 0);
            self.last_updated.resize(len, 0);
        }
    }

    pub fn accepted(&mut self, index: usize, stale: bool) {
        self.ensure_len(index);
        if stale {
            self.accepts_stale[index] += 1;
        } else {
            self.accepts[index] += 1;
        }
        self.last_updated[index] = now_secs();
    }

    pub fn rejected(&mut self, index: usize) {
        self.ensure_len(index);
        self.rejects[index] += 1;
        self.last_updated[index] = now_secs();
    }

    pub fn failed(&mut self, index: usize) {
        self.ensure_len(index);
        self.failures[index] += 1;
        self.last_updated[index] = now_secs();
    }

    pub fn accepts(&self, index: usize) -> u64 {
        self.accepts.get(index).copied().unwrap_or(0)
    }

    pub fn accepts_stale(&self, index: usize) -> u64 {
        self.accepts_stale.get(index).copied().unwrap_or(0)
    }

    pub fn rejects(&self, index: usize) -> u64 {
        self.rejects.get(index).copied().unwrap_or(0)
    }

    pub fn failures(&self, index: usize) -> u64 {
        self.failures.get(index).copied().unwrap_or(0)
    }

    /// Timestamp (unix seconds) of the miner's last recorded event, or 0 if none.
    pub fn last_updated(&self, index: usize) -> u64 {
        self.last_updated.get(index).copied().unwrap_or(0)
    }

    /// The most recent event across all miners, or 0 if nothing has been recorded.
    pub fn last_updated_overall(&self) -> u64 {
        self.last_updated.iter().copied().max().unwrap_or(0)
    }

    pub fn total_accepts(&self) -> u64 {
        self.accepts.iter().sum()
    }

    pub fn total_rejects(&self) -> u64 {
        self.rejects.iter().sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.failures.iter().sum()
    }

    /// Compact `"A{n}:R{n}:F{n}"` summary for a single miner.
    pub fn get_string(&self, index: usize) -> String {
        format!(
            "A{}:R{}:F{}",
            self.accepts(index),
            self.rejects(index),
            self.failures(index)
        )
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// A sample of a single worker's hardware telemetry. Absent fields are `None`; a
/// missing probe backend is not an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct HwSample {
    pub temp_c: Option<f32>,
    pub fan_percent: Option<f32>,
    pub power_milliwatts: Option<f32>,
}

/// A full snapshot of Farm's telemetry loop. Replaces, rather than merges with, the
/// previous snapshot on every tick.
#[derive(Debug, Clone, Default)]
pub struct WorkingProgress {
    pub total_hashrate: f64,
    pub miners_hashrate: Vec<f64>,
    pub mining_is_paused: Vec<bool>,
    pub miner_monitors: Vec<HwSample>,
}

impl WorkingProgress {
    pub fn worker_count(&self) -> usize {
        self.miners_hashrate.len()
    }
}
