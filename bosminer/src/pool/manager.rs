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

//! Connection supervisor: multiplexes one logical work feed over an ordered list
//! of pool candidates through a [`PoolClient`] capability, retrying, rotating on
//! exhaustion, and returning to the primary connection after a timeout.

use crate::farm::Farm;
use crate::logging;
use crate::pool::client::{PoolClient, PoolClientCallbacks};
use crate::pool::connection::Connection;
use crate::runtime_config;
use crate::work::{Solution, WorkPackage};
use crossbeam_queue::ArrayQueue;
use slog::{info, o, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

const SUBMIT_QUEUE_CAPACITY: usize = 50;

/// Which sealer(s) a connected pool implies, per the `MinerType -> sealers` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerType {
    Cl,
    Cuda,
    Mixed,
}

impl MinerType {
    fn start_farm(self, farm: &Farm) {
        match self {
            MinerType::Cl => {
                farm.start("opencl", false);
            }
            MinerType::Cuda => {
                farm.start("cuda", false);
            }
            MinerType::Mixed => {
                farm.start("cuda", false);
                farm.start("opencl", true);
            }
        }
    }
}

struct SubmitRecord {
    tstamp: Instant,
    miner_index: usize,
}

/// Bounded FIFO of outstanding solution submit times. Drop-oldest on overflow: the
/// source silently overwrites via a ring when full, so a faithful port does too.
struct SubmitQueue {
    queue: ArrayQueue<SubmitRecord>,
}

impl SubmitQueue {
    fn new() -> Self {
        Self {
            queue: ArrayQueue::new(SUBMIT_QUEUE_CAPACITY),
        }
    }

    fn push(&self, record: SubmitRecord) {
        if let Err(record) = self.queue.push(record) {
            let _ = self.queue.pop();
            let _ = self.queue.push(record);
        }
    }

    fn pop(&self) -> Option<SubmitRecord> {
        self.queue.pop()
    }

    fn drain(&self) {
        while self.queue.pop().is_some() {}
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

pub struct PoolManager {
    connections: StdMutex<Vec<Connection>>,
    active_idx: AtomicUsize,
    attempt_count: AtomicU32,
    client: Arc<dyn PoolClient>,
    farm: Arc<Farm>,
    miner_type: MinerType,
    submit_times: SubmitQueue,
    running: AtomicBool,
    tick_counter: AtomicU32,
    failover_deadline: StdMutex<Option<Instant>>,
    last_boundary: StdMutex<Option<primitive_types::U256>>,
    last_epoch: StdMutex<Option<u64>>,
    log: slog::Logger,
}

impl PoolManager {
    pub fn new(
        connections: Vec<Connection>,
        client: Arc<dyn PoolClient>,
        farm: Arc<Farm>,
        miner_type: MinerType,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            connections: StdMutex::new(connections),
            active_idx: AtomicUsize::new(0),
            attempt_count: AtomicU32::new(0),
            client,
            farm,
            miner_type,
            submit_times: SubmitQueue::new(),
            running: AtomicBool::new(true),
            tick_counter: AtomicU32::new(0),
            failover_deadline: StdMutex::new(None),
            last_boundary: StdMutex::new(None),
            last_epoch: StdMutex::new(None),
            log: logging::root().new(o!("component" => "pool_manager")),
        });
        manager.client.set_callbacks(manager.clone());
        let farm_handle = manager.farm.clone();
        let manager_for_solution = manager.clone();
        farm_handle.on_solution_found(move |solution| {
            manager_for_solution.handle_farm_solution(solution);
        });
        let manager_for_restart = manager.clone();
        farm_handle.on_miner_restart(move || {
            manager_for_restart.handle_miner_restart();
        });
        manager
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_idx(&self) -> usize {
        self.active_idx.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.connections.lock().expect("connections lock poisoned").clone()
    }

    pub fn add_connection(&self, conn: Connection) {
        self.connections.lock().expect("connections lock poisoned").push(conn);
    }

    pub fn remove_connection(&self, index: usize) {
        let mut connections = self.connections.lock().expect("connections lock poisoned");
        if index < connections.len() {
            connections.remove(index);
            let active = self.active_idx.load(Ordering::SeqCst);
            if active >= connections.len() && active > 0 {
                self.active_idx.store(active - 1, Ordering::SeqCst);
            }
        }
    }

    pub fn clear_connections(&self) {
        self.connections.lock().expect("connections lock poisoned").clear();
        self.active_idx.store(0, Ordering::SeqCst);
    }

    /// Starts the manager loop on the given cadence (≈1Hz). Runs until the
    /// connection list is exhausted or the `"exit"` sentinel is reached.
    pub async fn run(self: Arc<Self>, tick_interval: Duration) {
        if self.connections.lock().expect("connections lock poisoned").is_empty() {
            return;
        }
        let mut ticker = tokio::time::interval(tick_interval);
        while self.is_running() {
            ticker.tick().await;
            self.tick().await;
        }
    }

    fn active_connection(&self) -> Option<Connection> {
        let connections = self.connections.lock().expect("connections lock poisoned");
        let idx = self.active_idx.load(Ordering::SeqCst);
        connections.get(idx).cloned()
    }

    pub(crate) async fn tick(&self) {
        if self.client.is_pending_state() {
            return;
        }

        self.check_failover().await;

        if !self.client.is_connected() {
            self.advance_connection().await;
        }

        self.report_hashrate_if_due().await;
    }

    /// Mirrors the source's sequential `workLoop` fall-through: unrecoverable-evict,
    /// then max-tries-rotate, then connect-or-exit all run within the same tick,
    /// rather than being mutually exclusive. An eviction or rotation is immediately
    /// followed by a connect attempt against whatever is active afterward.
    async fn advance_connection(&self) {
        if self.connections.lock().expect("connections lock poisoned").is_empty() {
            self.terminate().await;
            return;
        }

        if let Some(active) = self.active_connection() {
            if active.is_unrecoverable() {
                self.evict_active(&active);
            }
        }

        let config = runtime_config::get();
        if self.attempt_count.load(Ordering::SeqCst) >= config.max_tries {
            self.rotate_active();
            self.farm.set_work(WorkPackage::empty());
        }

        let connections_empty = self.connections.lock().expect("connections lock poisoned").is_empty();
        match self.active_connection() {
            Some(active) if !connections_empty && !active.is_exit_sentinel() => {
                self.attempt_count.fetch_add(1, Ordering::SeqCst);
                self.client.set_connection(active.clone());
                self.client.connect().await;
            }
            _ => self.terminate().await,
        }
    }

    fn evict_active(&self, active: &Connection) {
        let mut connections = self.connections.lock().expect("connections lock poisoned");
        let idx = self.active_idx.load(Ordering::SeqCst);
        if idx < connections.len() && &connections[idx] == active {
            connections.remove(idx);
        }
        self.attempt_count.store(0, Ordering::SeqCst);
        if idx > 0 {
            self.active_idx.store(idx - 1, Ordering::SeqCst);
        }
        warn!(self.log, "evicted unrecoverable connection"; "host" => active.host.clone());
    }

    fn rotate_active(&self) {
        let len = self.connections.lock().expect("connections lock poisoned").len();
        if len == 0 {
            return;
        }
        let idx = self.active_idx.load(Ordering::SeqCst);
        self.active_idx.store((idx + 1) % len, Ordering::SeqCst);
        self.attempt_count.store(0, Ordering::SeqCst);
    }

    async fn terminate(&self) {
        self.farm.stop();
        self.client.disconnect().await;
        self.running.store(false, Ordering::SeqCst);
        info!(self.log, "pool manager stopped");
    }

    async fn check_failover(&self) {
        let fire = {
            let deadline = self.failover_deadline.lock().expect("failover deadline lock poisoned");
            matches!(*deadline, Some(deadline) if Instant::now() >= deadline)
        };
        if fire {
            self.client.disconnect().await;
            self.active_idx.store(0, Ordering::SeqCst);
            self.attempt_count.store(0, Ordering::SeqCst);
            *self.failover_deadline.lock().expect("failover deadline lock poisoned") = None;
        }
    }

    async fn report_hashrate_if_due(&self) {
        let config = runtime_config::get();
        let tick = self.tick_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if config.hashrate_report_ticks == 0 || tick % config.hashrate_report_ticks != 0 {
            return;
        }
        let progress = self.farm.mining_progress();
        let hex_rate = format_hashrate_hex(progress.total_hashrate);
        self.client.submit_hashrate(hex_rate);
    }

    fn handle_farm_solution(&self, solution: Solution) {
        if self.client.is_connected() {
            self.submit_times.push(SubmitRecord {
                tstamp: Instant::now(),
                miner_index: solution.miner_index,
            });
            let mut mix_hash = [0u8; 32];
            mix_hash.copy_from_slice(solution.mix_hash.as_bytes());
            self.client.submit_solution(solution.nonce, mix_hash);
        } else {
            warn!(self.log, "discarding solution, pool not connected"; "miner" => solution.miner_index);
        }
    }

    /// Handles Farm's miner-restart event (fired via `Farm::restart_async`): log,
    /// stop if mining, then restart the worker set per `miner_type`.
    fn handle_miner_restart(&self) {
        info!(self.log, "miner restart requested");
        if self.farm.is_mining() {
            self.farm.stop();
        }
        self.miner_type.start_farm(&self.farm);
    }

    fn pop_submit_latency(&self) -> Option<(Duration, usize)> {
        self.submit_times
            .pop()
            .map(|record| (record.tstamp.elapsed(), record.miner_index))
    }

    pub fn submit_queue_len(&self) -> usize {
        self.submit_times.len()
    }
}

impl PoolClientCallbacks for PoolManager {
    fn on_connected(&self) {
        let active_idx = self.active_idx.load(Ordering::SeqCst);
        let config = runtime_config::get();
        if active_idx != 0 && config.failover_timeout_min > 0 {
            let deadline = Instant::now() + Duration::from_secs(config.failover_timeout_min as u64 * 60);
            *self.failover_deadline.lock().expect("failover deadline lock poisoned") = Some(deadline);
        } else {
            *self.failover_deadline.lock().expect("failover deadline lock poisoned") = None;
        }
        if !self.farm.is_mining() {
            self.miner_type.start_farm(&self.farm);
        }
        info!(self.log, "connected"; "active_idx" => active_idx);
    }

    fn on_disconnected(&self) {
        info!(self.log, "disconnected");
        self.submit_times.drain();
    }

    fn on_work_received(&self, wp: WorkPackage) {
        {
            let mut last_boundary = self.last_boundary.lock().expect("last boundary lock poisoned");
            if last_boundary.as_ref() != Some(&wp.boundary) {
                info!(self.log, "new difficulty"; "boundary" => format!("{:#x}", wp.boundary));
                *last_boundary = Some(wp.boundary);
            }
        }
        {
            let mut last_epoch = self.last_epoch.lock().expect("last epoch lock poisoned");
            if *last_epoch != Some(wp.epoch) {
                info!(self.log, "new epoch"; "epoch" => wp.epoch);
                *last_epoch = Some(wp.epoch);
            }
        }
        self.farm.set_work(wp);
    }

    fn on_solution_accepted(&self, stale: bool) {
        match self.pop_submit_latency() {
            Some((latency, miner_index)) => {
                info!(self.log, "solution accepted"; "stale" => stale, "latency_ms" => latency.as_millis() as u64);
                self.farm.record_accepted(miner_index, stale);
            }
            None => warn!(self.log, "solution accepted with unknown latency"; "stale" => stale),
        }
    }

    fn on_solution_rejected(&self, stale: bool) {
        match self.pop_submit_latency() {
            Some((latency, miner_index)) => {
                info!(self.log, "solution rejected"; "stale" => stale, "latency_ms" => latency.as_millis() as u64);
                self.farm.record_rejected(miner_index);
            }
            None => warn!(self.log, "solution rejected with unknown latency"; "stale" => stale),
        }
    }
}

/// Formats a hashrate as the `0x`-prefixed, 64-hex-digit big-endian word
/// `eth_submitHashrate` expects, matching the source's `"0x" + toHex(...)` shape.
fn format_hashrate_hex(hashrate: f64) -> String {
    let value = hashrate.max(0.0) as u128;
    let mut bytes = [0u8; 32];
    bytes[16..].copy_from_slice(&value.to_be_bytes());
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::connection::Connection;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Mutex as StdTestMutex;

    #[derive(Default)]
    struct TestClient {
        connected: AtomicBool,
        pending: AtomicBool,
        connect_calls: StdAtomicUsize,
        callbacks: StdTestMutex<Option<Arc<dyn PoolClientCallbacks>>>,
        current: StdTestMutex<Option<Connection>>,
        refuse_connect: AtomicBool,
    }

    #[async_trait::async_trait]
    impl PoolClient for TestClient {
        fn set_connection(&self, conn: Connection) {
            *self.current.lock().unwrap() = Some(conn);
        }
        fn unset_connection(&self) {
            *self.current.lock().unwrap() = None;
        }
        async fn connect(&self) {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if !self.refuse_connect.load(Ordering::SeqCst) {
                self.connected.store(true, Ordering::SeqCst);
            }
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn is_pending_state(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }
        fn submit_solution(&self, _nonce: u64, _mix_hash: [u8; 32]) {}
        fn submit_hashrate(&self, _hex_rate: String) {}
        fn set_callbacks(&self, callbacks: Arc<dyn PoolClientCallbacks>) {
            *self.callbacks.lock().unwrap() = Some(callbacks);
        }
    }

    fn conn(host: &str) -> Connection {
        Connection::parse(&format!("stratum+tcp://user@{}:3333", host)).unwrap()
    }

    #[tokio::test]
    async fn failover_rotation_advances_after_max_tries() {
        let client = Arc::new(TestClient {
            refuse_connect: AtomicBool::new(true),
            ..Default::default()
        });
        let farm = Arc::new(Farm::new());
        runtime_config::set_max_tries(2);
        let manager = PoolManager::new(
            vec![conn("a"), conn("b"), conn("c")],
            client.clone(),
            farm,
            MinerType::Cuda,
        );
        for _ in 0..3 {
            manager.tick().await;
        }
        assert_eq!(manager.active_idx(), 1);
        runtime_config::set_max_tries(runtime_config::DEFAULT_MAX_TRIES);
    }

    #[tokio::test]
    async fn unrecoverable_connection_is_evicted() {
        let client = Arc::new(TestClient::default());
        let farm = Arc::new(Farm::new());
        let mut a = conn("a");
        a.mark_unrecoverable();
        let manager = PoolManager::new(vec![a, conn("b")], client, farm, MinerType::Cuda);
        manager.tick().await;
        let connections = manager.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].host, "b");
        assert_eq!(manager.active_idx(), 0);
    }

    #[tokio::test]
    async fn exit_sentinel_terminates_manager() {
        let client = Arc::new(TestClient {
            refuse_connect: AtomicBool::new(true),
            ..Default::default()
        });
        let farm = Arc::new(Farm::new());
        runtime_config::set_max_tries(1);
        let manager = PoolManager::new(
            vec![conn("a"), Connection::exit_sentinel()],
            client,
            farm,
            MinerType::Cuda,
        );
        for _ in 0..3 {
            manager.tick().await;
        }
        assert!(!manager.is_running());
        runtime_config::set_max_tries(runtime_config::DEFAULT_MAX_TRIES);
    }

    #[tokio::test]
    async fn exit_sentinel_reached_within_same_tick_as_rotation() {
        // With max_tries=1, the rotation that lands on "exit" and the terminate
        // decision that follows it must happen inside one tick, not two.
        let client = Arc::new(TestClient {
            refuse_connect: AtomicBool::new(true),
            ..Default::default()
        });
        let farm = Arc::new(Farm::new());
        runtime_config::set_max_tries(1);
        let manager = PoolManager::new(
            vec![conn("a"), Connection::exit_sentinel()],
            client,
            farm,
            MinerType::Cuda,
        );
        manager.tick().await;
        assert!(manager.is_running());
        manager.tick().await;
        assert!(!manager.is_running());
        runtime_config::set_max_tries(runtime_config::DEFAULT_MAX_TRIES);
    }

    #[tokio::test]
    async fn restart_async_is_delegated_to_pool_manager_via_miner_type() {
        let client = Arc::new(TestClient::default());
        let farm = Arc::new(Farm::new());
        let mut sealers = HashMap::new();
        sealers.insert("cuda".to_string(), crate::test_support::sim_sealer(1));
        farm.set_sealers(sealers);
        let _manager = PoolManager::new(vec![conn("a")], client, farm.clone(), MinerType::Cuda);

        assert!(!farm.is_mining());
        farm.restart_async().await;
        assert!(farm.is_mining());
        assert_eq!(farm.worker_count(), 1);
        farm.stop();
    }

    #[test]
    fn format_hashrate_hex_is_0x_prefixed_64_digit_word() {
        let word = format_hashrate_hex(1024.0);
        assert!(word.starts_with("0x"));
        assert_eq!(word.len(), 2 + 64);
    }

    #[tokio::test]
    async fn submit_queue_drains_on_disconnect() {
        let client = Arc::new(TestClient::default());
        let farm = Arc::new(Farm::new());
        let manager = PoolManager::new(vec![conn("a")], client, farm, MinerType::Cuda);
        manager.submit_times.push(SubmitRecord {
            tstamp: Instant::now(),
            miner_index: 0,
        });
        assert_eq!(manager.submit_queue_len(), 1);
        manager.on_disconnected();
        assert_eq!(manager.submit_queue_len(), 0);
    }

    #[tokio::test]
    async fn accepted_without_submit_record_is_unknown_latency_not_zero() {
        let client = Arc::new(TestClient::default());
        let farm = Arc::new(Farm::new());
        let mut sealers = HashMap::new();
        sealers.insert(
            "cuda".to_string(),
            crate::farm::SealerDescriptor {
                instance_count_fn: Arc::new(|| 1),
                factory_fn: Arc::new(|farm_face, index| {
                    Arc::new(crate::miner::Miner::new(
                        index,
                        "sim",
                        farm_face,
                        crate::farm::noop_epoch_initializer(),
                    ))
                }),
            },
        );
        farm.set_sealers(sealers);
        farm.start("cuda", false);
        let manager = PoolManager::new(vec![conn("a")], client, farm, MinerType::Cuda);
        assert_eq!(manager.submit_queue_len(), 0);
        manager.on_solution_accepted(false);
        // no submit record existed for this accept, so no counter for miner 0 moved
        assert_eq!(manager.farm.solution_stats(), "A0:R0:F0");
    }

    #[test]
    fn submit_queue_drops_oldest_when_full() {
        let queue = SubmitQueue::new();
        for i in 0..SUBMIT_QUEUE_CAPACITY + 5 {
            queue.push(SubmitRecord {
                tstamp: Instant::now(),
                miner_index: i,
            });
        }
        assert_eq!(queue.len(), SUBMIT_QUEUE_CAPACITY);
    }
}
