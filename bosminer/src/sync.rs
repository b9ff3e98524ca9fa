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

//! Lock-free connection status tracking for a single `PoolClient` transport, driven
//! externally by the pool connector and polled by PoolManager's work-loop.

use atomic_enum::atomic_enum;
use std::sync::Arc;

#[atomic_enum]
pub enum ConnStatus {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, ConnStatus::Connecting | ConnStatus::Disconnecting)
    }
}

/// Shared, lock-free status cell a `PoolClient` implementation updates as its
/// transport transitions, and PoolManager's work-loop reads every tick.
#[derive(Debug)]
pub struct StatusCell {
    status: AtomicConnStatus,
}

impl StatusCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: AtomicConnStatus::new(ConnStatus::Idle),
        })
    }

    pub fn get(&self) -> ConnStatus {
        self.status.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn set(&self, status: ConnStatus) {
        self.status.store(status, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnStatus::Connected
    }

    pub fn is_pending(&self) -> bool {
        self.get().is_pending()
    }

    /// Moves `Idle -> Connecting`. Returns false if the cell was not idle.
    pub fn begin_connecting(&self) -> bool {
        self.status
            .compare_exchange(
                ConnStatus::Idle,
                ConnStatus::Connecting,
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Moves `Connecting -> Connected`.
    pub fn connected(&self) {
        self.set(ConnStatus::Connected);
    }

    /// Moves `Connected -> Disconnecting`.
    pub fn begin_disconnecting(&self) {
        self.set(ConnStatus::Disconnecting);
    }

    /// Moves any state back to `Idle`.
    pub fn idle(&self) {
        self.set(ConnStatus::Idle);
    }
}
