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

//! Lifecycle manager and aggregator for the active set of workers: work
//! distribution, nonce-space partitioning, solution fan-in, telemetry collection.
//!
//! Workers are owned exclusively by Farm and addressed by index; there is no
//! process-global back-reference. A worker's only way to call into Farm is the
//! narrow [`crate::miner::FarmFace`] contract it is handed at construction.

use crate::hwmon::{HwProbe, NullProbe};
use crate::miner::{FarmFace, Miner, NoopEpochInitializer};
use crate::runtime_config;
use crate::stats::{SolutionStats, WorkingProgress};
use crate::work::{nonce_segment_start, EpochContext, Solution, WorkPackage};
use rand::RngCore;
use slog::{o, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// One worker family's factory: how many device instances it has, and how to build
/// the per-worker state for one of them.
#[derive(Clone)]
pub struct SealerDescriptor {
    pub instance_count_fn: Arc<dyn Fn() -> u32 + Send + Sync>,
    pub factory_fn: Arc<dyn Fn(Arc<dyn FarmFace>, usize) -> Arc<Miner> + Send + Sync>,
}

struct WorkerHandle {
    miner: Arc<Miner>,
    thread: JoinHandle<()>,
}

struct FarmShared {
    sealers: StdMutex<HashMap<String, SealerDescriptor>>,
    workers: StdMutex<Vec<WorkerHandle>>,
    current_sealer: StdMutex<Option<(String, bool)>>,
    is_mining: AtomicBool,
    scrambler: AtomicU64,
    segment_width: AtomicU32,
    tstart: AtomicU32,
    tstop: AtomicU32,
    current_work: StdMutex<WorkPackage>,
    current_epoch_ctx: StdMutex<Option<EpochContext>>,
    progress: StdMutex<WorkingProgress>,
    solution_stats: StdMutex<SolutionStats>,
    solution_handler: StdMutex<Option<Box<dyn Fn(Solution) + Send + Sync>>>,
    restart_handler: StdMutex<Option<Box<dyn Fn() + Send + Sync>>>,
    hw_probe: StdMutex<Arc<dyn HwProbe>>,
    restart_lock: AsyncMutex<()>,
    launched_at: Instant,
    log: slog::Logger,
}

impl FarmFace for FarmShared {
    fn submit_proof(&self, solution: Solution) {
        let handler = self.solution_handler.lock().expect("solution handler lock poisoned");
        match handler.as_ref() {
            Some(handler) => handler(solution),
            None => warn!(self.log, "solution found with no handler registered"; "miner" => solution.miner_index),
        }
    }

    fn failed_solution(&self, miner_index: usize) {
        self.solution_stats
            .lock()
            .expect("solution stats lock poisoned")
            .failed(miner_index);
    }

    fn get_nonce_scrambler(&self) -> u64 {
        self.scrambler.load(Ordering::SeqCst)
    }

    fn get_segment_width(&self) -> u32 {
        self.segment_width.load(Ordering::SeqCst)
    }

    fn get_tstart(&self) -> u16 {
        self.tstart.load(Ordering::SeqCst) as u16
    }

    fn get_tstop(&self) -> u16 {
        self.tstop.load(Ordering::SeqCst) as u16
    }
}

/// Per-worker nonce segment, the data the control plane would serialize as
/// `get_nonce_scrambler_json`.
#[derive(Debug, Clone, Copy)]
pub struct NonceSegment {
    pub index: usize,
    pub start: u64,
    pub stop: u64,
}

pub struct Farm {
    shared: Arc<FarmShared>,
}

impl Farm {
    pub fn new() -> Self {
        let config = runtime_config::get();
        let scrambler = rand::thread_rng().next_u64();
        let shared = Arc::new(FarmShared {
            sealers: StdMutex::new(HashMap::new()),
            workers: StdMutex::new(Vec::new()),
            current_sealer: StdMutex::new(None),
            is_mining: AtomicBool::new(false),
            scrambler: AtomicU64::new(scrambler),
            segment_width: AtomicU32::new(config.segment_width),
            tstart: AtomicU32::new(config.tstart as u32),
            tstop: AtomicU32::new(config.tstop as u32),
            current_work: StdMutex::new(WorkPackage::empty()),
            current_epoch_ctx: StdMutex::new(None),
            progress: StdMutex::new(WorkingProgress::default()),
            solution_stats: StdMutex::new(SolutionStats::new()),
            solution_handler: StdMutex::new(None),
            restart_handler: StdMutex::new(None),
            hw_probe: StdMutex::new(Arc::new(NullProbe)),
            restart_lock: AsyncMutex::new(()),
            launched_at: Instant::now(),
            log: crate::logging::root().new(o!("component" => "farm")),
        });
        spawn_telemetry_loop(shared.clone(), config.telemetry_interval);
        Self { shared }
    }

    /// Replaces the sealer registry. Running workers are unaffected.
    pub fn set_sealers(&self, sealers: HashMap<String, SealerDescriptor>) {
        *self.shared.sealers.lock().expect("sealers lock poisoned") = sealers;
    }

    pub fn set_hw_probe(&self, probe: Arc<dyn HwProbe>) {
        *self.shared.hw_probe.lock().expect("hw probe lock poisoned") = probe;
    }

    pub fn on_solution_found(&self, handler: impl Fn(Solution) + Send + Sync + 'static) {
        *self
            .shared
            .solution_handler
            .lock()
            .expect("solution handler lock poisoned") = Some(Box::new(handler));
    }

    /// Registers the handler invoked by `restart_async` in place of Farm's own
    /// stored-sealer replay. PoolManager is the usual registrant: per §4.2 the
    /// miner-restart event is "log; if mining, stop; then restart the worker set
    /// per miner_type", which only PoolManager (the `MinerType` owner) can do.
    pub fn on_miner_restart(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self
            .shared
            .restart_handler
            .lock()
            .expect("restart handler lock poisoned") = Some(Box::new(handler));
    }

    /// Returns true iff `sealer` is registered. `mixed=false` replaces the running
    /// worker set; `mixed=true` appends a second sealer's workers alongside it, even
    /// if that leaves two generations of the same sealer running (pinned behaviour,
    /// matching the source: only same-sealer/`mixed=false` requests are idempotent).
    pub fn start(&self, sealer: &str, mixed: bool) -> bool {
        let descriptor = match self
            .shared
            .sealers
            .lock()
            .expect("sealers lock poisoned")
            .get(sealer)
            .cloned()
        {
            Some(descriptor) => descriptor,
            None => return false,
        };

        let mut current = self
            .shared
            .current_sealer
            .lock()
            .expect("current sealer lock poisoned");
        let already_running = !self.shared.workers.lock().expect("workers lock poisoned").is_empty();
        if !mixed && already_running {
            if let Some((name, false)) = current.as_ref() {
                if name == sealer {
                    return true;
                }
            }
            self.stop_workers();
        }

        let instance_count = (descriptor.instance_count_fn)();
        {
            let mut workers = self.shared.workers.lock().expect("workers lock poisoned");
            for _ in 0..instance_count {
                let index = workers.len();
                let farm_face: Arc<dyn FarmFace> = self.shared.clone();
                let miner = (descriptor.factory_fn)(farm_face, index);
                let thread_miner = miner.clone();
                let thread = std::thread::spawn(move || worker_loop(thread_miner));
                workers.push(WorkerHandle { miner, thread });
            }
        }
        *current = Some((sealer.to_string(), mixed));
        self.shared.is_mining.store(true, Ordering::SeqCst);
        true
    }

    fn stop_workers(&self) {
        let mut workers = self.shared.workers.lock().expect("workers lock poisoned");
        for worker in workers.iter() {
            worker.miner.kick_miner();
        }
        for worker in workers.drain(..) {
            let _ = worker.thread.join();
        }
    }

    /// Tears down all workers. Safe to call when not mining.
    pub fn stop(&self) {
        self.stop_workers();
        *self
            .shared
            .current_sealer
            .lock()
            .expect("current sealer lock poisoned") = None;
        self.shared.is_mining.store(false, Ordering::SeqCst);
    }

    pub fn is_mining(&self) -> bool {
        self.shared.is_mining.load(Ordering::SeqCst)
    }

    /// Copies `wp` into every worker's current-work slot under the work-lock. An
    /// empty package suspends work without tearing workers down.
    pub fn set_work(&self, wp: WorkPackage) {
        // Only hand workers a (re-)built EpochContext when the epoch actually
        // changes; suspending work (empty wp) or re-sending the same epoch must
        // not trigger another epoch init.
        let ctx = {
            let mut current_ctx = self
                .shared
                .current_epoch_ctx
                .lock()
                .expect("epoch ctx lock poisoned");
            if wp.is_empty() {
                None
            } else {
                let needs_new = current_ctx
                    .as_ref()
                    .map(|ctx| ctx.epoch != wp.epoch)
                    .unwrap_or(true);
                if needs_new {
                    let ctx = EpochContext::for_epoch(wp.epoch);
                    *current_ctx = Some(ctx.clone());
                    Some(ctx)
                } else {
                    None
                }
            }
        };
        *self.shared.current_work.lock().expect("current work lock poisoned") = wp.clone();
        let workers = self.shared.workers.lock().expect("workers lock poisoned");
        for worker in workers.iter() {
            worker.miner.set_work(wp.clone(), ctx.clone());
        }
    }

    pub fn work(&self) -> WorkPackage {
        self.shared.current_work.lock().expect("current work lock poisoned").clone()
    }

    /// Schedules a full stop+start on the shared runtime, serialized so concurrent
    /// restart requests do not interleave. If a miner-restart handler is registered
    /// (PoolManager does this at construction), the restart is delegated to it so it
    /// can pick the worker set back up per `miner_type` instead of replaying Farm's
    /// own last-known sealer. Without a registered handler (Farm used standalone),
    /// falls back to replaying the stored sealer tuple.
    pub async fn restart_async(&self) {
        let _guard = self.shared.restart_lock.lock().await;
        let handler_guard = self
            .shared
            .restart_handler
            .lock()
            .expect("restart handler lock poisoned");
        if let Some(handler) = handler_guard.as_ref() {
            handler();
            return;
        }
        drop(handler_guard);

        let previous = self
            .shared
            .current_sealer
            .lock()
            .expect("current sealer lock poisoned")
            .clone();
        self.stop();
        if let Some((sealer, mixed)) = previous {
            self.start(&sealer, mixed);
        }
    }

    pub fn solution_found(&self, solution: Solution) {
        self.shared.submit_proof(solution);
    }

    pub fn mining_progress(&self) -> WorkingProgress {
        self.shared.progress.lock().expect("progress lock poisoned").clone()
    }

    /// Records a pool-acknowledged accept against the miner that produced it. Used
    /// by PoolManager once it has paired a solution with its submit-time record.
    pub fn record_accepted(&self, miner_index: usize, stale: bool) {
        self.shared
            .solution_stats
            .lock()
            .expect("solution stats lock poisoned")
            .accepted(miner_index, stale);
    }

    pub fn record_rejected(&self, miner_index: usize) {
        self.shared
            .solution_stats
            .lock()
            .expect("solution stats lock poisoned")
            .rejected(miner_index);
    }

    pub fn solution_stats(&self) -> String {
        let stats = self.shared.solution_stats.lock().expect("solution stats lock poisoned");
        let workers = self.shared.workers.lock().expect("workers lock poisoned");
        (0..workers.len())
            .map(|i| stats.get_string(i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn get_nonce_scrambler(&self) -> u64 {
        self.shared.scrambler.load(Ordering::SeqCst)
    }

    pub fn set_nonce_scrambler(&self, scrambler: u64) {
        self.shared.scrambler.store(scrambler, Ordering::SeqCst);
    }

    pub fn get_segment_width(&self) -> u32 {
        self.shared.segment_width.load(Ordering::SeqCst)
    }

    pub fn set_nonce_segment_width(&self, width: u32) {
        self.shared.segment_width.store(width, Ordering::SeqCst);
    }

    pub fn set_tstart_tstop(&self, tstart: u16, tstop: u16) {
        self.shared.tstart.store(tstart as u32, Ordering::SeqCst);
        self.shared.tstop.store(tstop as u32, Ordering::SeqCst);
    }

    pub fn get_tstart(&self) -> u16 {
        self.shared.tstart.load(Ordering::SeqCst) as u16
    }

    pub fn get_tstop(&self) -> u16 {
        self.shared.tstop.load(Ordering::SeqCst) as u16
    }

    /// Uptime since construction.
    pub fn farm_launched(&self) -> Duration {
        self.shared.launched_at.elapsed()
    }

    /// Per-worker `{index, start, stop}` nonce segments for the currently running
    /// worker set.
    pub fn nonce_segments(&self) -> Vec<NonceSegment> {
        let scrambler = self.get_nonce_scrambler();
        let width = self.get_segment_width();
        let workers = self.shared.workers.lock().expect("workers lock poisoned");
        workers
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let start = nonce_segment_start(scrambler, i as u64, width);
                let stop = nonce_segment_start(scrambler, i as u64 + 1, width);
                NonceSegment { index: i, start, stop }
            })
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().expect("workers lock poisoned").len()
    }
}

impl Default for Farm {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Farm {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

/// Factory helper for a sealer whose workers never touch real hardware.
pub fn noop_epoch_initializer() -> Arc<NoopEpochInitializer> {
    Arc::new(NoopEpochInitializer)
}

/// Stub driving loop: the actual kernel-search body belongs to the sealer variant
/// and is out of scope. This loop exists so Farm owns real thread lifecycle, as the
/// concurrency model requires (`stop` kicks and joins every worker).
fn worker_loop(miner: Arc<Miner>) {
    while let Some(wp) = miner.wait_for_work() {
        if wp.is_empty() || miner.paused() {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        }
        miner.update_hash_rate(1, 1);
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Spawns the telemetry loop on the ambient runtime, if one is running. Farm is
/// constructible outside a runtime (e.g. plain unit tests); in that case telemetry
/// simply never ticks until something spawns `collect_telemetry` explicitly.
fn spawn_telemetry_loop(shared: Arc<FarmShared>, interval: Duration) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                collect_telemetry(&shared).await;
            }
        });
    }
}

async fn collect_telemetry(shared: &Arc<FarmShared>) {
    let probe = shared.hw_probe.lock().expect("hw probe lock poisoned").clone();
    let miners: Vec<Arc<Miner>> = shared
        .workers
        .lock()
        .expect("workers lock poisoned")
        .iter()
        .map(|w| w.miner.clone())
        .collect();

    let mut miners_hashrate = Vec::with_capacity(miners.len());
    let mut mining_is_paused = Vec::with_capacity(miners.len());
    let mut miner_monitors = Vec::with_capacity(miners.len());
    let mut total = 0.0f64;

    for miner in miners.iter() {
        let paused = miner.paused();
        mining_is_paused.push(paused);
        let rate = if paused { 0.0 } else { miner.retrieve_hash_rate() };
        total += rate;
        miners_hashrate.push(rate);

        let sample = probe.sample(miner.index).await;
        if let Some(sample) = sample {
            if let Some(temp_c) = sample.temp_c {
                miner.update_temperature(temp_c);
            }
        }
        miner_monitors.push(sample.unwrap_or_default());
    }

    let progress = WorkingProgress {
        total_hashrate: total,
        miners_hashrate,
        mining_is_paused,
        miner_monitors,
    };
    *shared.progress.lock().expect("progress lock poisoned") = progress;
}
