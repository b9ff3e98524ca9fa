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

//! Test-only doubles so Farm and PoolManager's state machines can be exercised
//! without a GPU or a real pool socket: a `PoolClient` that manufactures jobs and
//! drains solutions straight back as accepted, and a sealer whose workers never
//! touch hardware.

use crate::farm::SealerDescriptor;
use crate::miner::{FarmFace, Miner, NoopEpochInitializer};
use crate::pool::client::{PoolClient, PoolClientCallbacks};
use crate::pool::connection::Connection;
use crate::sync::StatusCell;
use crate::work::WorkPackage;
use async_trait::async_trait;
use primitive_types::{H256, U256};
use std::sync::{Arc, Mutex};

/// A `PoolClient` that never touches a real socket: `connect` immediately succeeds
/// and hands out a manufactured job, `submit_solution` is acknowledged as accepted
/// on the spot. Connection state is tracked through the same `StatusCell` a real
/// transport would use, so `is_pending_state` reflects genuine Idle/Connecting/
/// Connected transitions rather than a bare connected flag.
pub struct DrainPoolClient {
    status: Arc<StatusCell>,
    callbacks: Mutex<Option<Arc<dyn PoolClientCallbacks>>>,
    current: Mutex<Option<Connection>>,
    next_epoch: Mutex<u64>,
}

impl Default for DrainPoolClient {
    fn default() -> Self {
        Self {
            status: StatusCell::new(),
            callbacks: Mutex::new(None),
            current: Mutex::new(None),
            next_epoch: Mutex::new(0),
        }
    }
}

impl DrainPoolClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn callbacks(&self) -> Option<Arc<dyn PoolClientCallbacks>> {
        self.callbacks.lock().expect("callbacks lock poisoned").clone()
    }

    fn manufacture_work(&self) -> WorkPackage {
        let mut epoch = self.next_epoch.lock().expect("epoch lock poisoned");
        *epoch += 1;
        WorkPackage {
            header: H256::repeat_byte(*epoch as u8),
            boundary: U256::MAX >> 4,
            epoch: *epoch,
            block_number: *epoch * 1000,
            start_nonce: None,
            ex_size_bytes: None,
        }
    }
}

#[async_trait]
impl PoolClient for DrainPoolClient {
    fn set_connection(&self, conn: Connection) {
        *self.current.lock().expect("current lock poisoned") = Some(conn);
    }

    fn unset_connection(&self) {
        *self.current.lock().expect("current lock poisoned") = None;
    }

    async fn connect(&self) {
        self.status.begin_connecting();
        self.status.connected();
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_connected();
            callbacks.on_work_received(self.manufacture_work());
        }
    }

    async fn disconnect(&self) {
        self.status.begin_disconnecting();
        self.status.idle();
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_disconnected();
        }
    }

    fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    fn is_pending_state(&self) -> bool {
        false
    }

    fn submit_solution(&self, _nonce: u64, _mix_hash: [u8; 32]) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.on_solution_accepted(false);
        }
    }

    fn submit_hashrate(&self, _hex_rate: String) {}

    fn set_callbacks(&self, callbacks: Arc<dyn PoolClientCallbacks>) {
        *self.callbacks.lock().expect("callbacks lock poisoned") = Some(callbacks);
    }
}

/// A sealer descriptor whose workers never launch real kernels, for driving
/// Farm's lifecycle in tests.
pub fn sim_sealer(instance_count: u32) -> SealerDescriptor {
    SealerDescriptor {
        instance_count_fn: Arc::new(move || instance_count),
        factory_fn: Arc::new(|farm_face: Arc<dyn FarmFace>, index: usize| {
            Arc::new(Miner::new(index, "sim", farm_face, Arc::new(NoopEpochInitializer)))
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::farm::Farm;
    use crate::pool::manager::PoolManager;
    use crate::pool::MinerType;
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test]
    async fn drain_client_round_trips_a_job_through_the_farm() {
        let farm = Arc::new(Farm::new());
        let mut sealers = HashMap::new();
        sealers.insert("cuda".to_string(), sim_sealer(1));
        farm.set_sealers(sealers);

        let client = DrainPoolClient::new();
        let manager = PoolManager::new(
            vec![Connection::parse("stratum+tcp://user@pool.example.com:3333").unwrap()],
            client,
            farm.clone(),
            MinerType::Cuda,
        );

        manager.tick().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(farm.is_mining());
        assert!(!farm.work().is_empty());
        farm.stop();
    }
}
