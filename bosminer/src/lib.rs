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

//! Mining supervisor core: Farm owns and drives a set of workers, PoolManager
//! keeps one logical work feed alive over a rotating list of pool connections,
//! and the Miner state machine gives every worker common pause/work-switch/
//! hashrate bookkeeping. GPU kernels, wire framing and the control-plane RPC
//! surface are external collaborators, not part of this crate.

pub mod error;
pub mod farm;
pub mod hwmon;
pub mod logging;
pub mod miner;
pub mod pool;
pub mod runtime_config;
pub mod stats;
pub mod sync;
pub mod work;

#[cfg(test)]
pub mod test_support;

pub use error::{Error, ErrorKind, Result};
pub use farm::Farm;
pub use miner::{Miner, PauseReason};
pub use pool::{Connection, MinerType, PoolClient, PoolClientCallbacks, PoolManager};
pub use work::{EpochContext, Solution, WorkPackage};
