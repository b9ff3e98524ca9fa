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

//! The abstract transport capability PoolManager drives. The exact wire framing of
//! the pool protocol is out of scope; this is only the shape the manager consumes.

use crate::pool::connection::Connection;
use crate::work::WorkPackage;
use async_trait::async_trait;

/// Callbacks a `PoolClient` implementation invokes on the serialized executor as its
/// transport state changes. Delivered callbacks must not block.
pub trait PoolClientCallbacks: Send + Sync {
    fn on_connected(&self);
    fn on_disconnected(&self);
    fn on_work_received(&self, wp: WorkPackage);
    fn on_solution_accepted(&self, stale: bool);
    fn on_solution_rejected(&self, stale: bool);
}

#[async_trait]
pub trait PoolClient: Send + Sync {
    fn set_connection(&self, conn: Connection);
    fn unset_connection(&self);
    async fn connect(&self);
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
    /// True during both connecting and disconnecting, so the manager does not
    /// re-enter a transition already in flight.
    fn is_pending_state(&self) -> bool;

    fn submit_solution(&self, nonce: u64, mix_hash: [u8; 32]);
    fn submit_hashrate(&self, hex_rate: String);

    fn set_callbacks(&self, callbacks: std::sync::Arc<dyn PoolClientCallbacks>);
}
