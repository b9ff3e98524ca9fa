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

//! Per-worker state machine: pause bookkeeping, work-switch signalling and hashrate
//! accounting common to every worker variant (CUDA, OpenCL, simulation). Variant
//! kernel launches live in the sealer's own crate, not here.

use crate::work::{EpochContext, Solution, WorkPackage};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// Independent pause reasons. The worker is paused iff any bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PauseReason {
    Overheating = 1 << 0,
    ApiRequest = 1 << 1,
    FarmPaused = 1 << 2,
    InsufficientMemory = 1 << 3,
    InitEpochError = 1 << 4,
}

const ALL_PAUSE_REASONS: [PauseReason; 5] = [
    PauseReason::Overheating,
    PauseReason::ApiRequest,
    PauseReason::FarmPaused,
    PauseReason::InsufficientMemory,
    PauseReason::InitEpochError,
];

/// The narrow back-reference a worker is given instead of reaching into a
/// process-global Farm singleton: only the handful of operations a worker actually
/// needs to call back into Farm with.
pub trait FarmFace: Send + Sync {
    fn submit_proof(&self, solution: Solution);
    fn failed_solution(&self, miner_index: usize);
    fn get_nonce_scrambler(&self) -> u64;
    fn get_segment_width(&self) -> u32;
    fn get_tstart(&self) -> u16;
    fn get_tstop(&self) -> u16;
}

/// Builds (or tears down) the per-epoch device state a worker needs. Kernel-level
/// detail is out of scope; this is the seam the core drives.
pub trait EpochInitializer: Send + Sync {
    fn init_epoch(&self, ctx: &EpochContext) -> bool;
}

/// An initializer that always succeeds immediately, for workers that keep no
/// per-epoch device state (simulation, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEpochInitializer;

impl EpochInitializer for NoopEpochInitializer {
    fn init_epoch(&self, _ctx: &EpochContext) -> bool {
        true
    }
}

struct WorkSlot {
    work: WorkPackage,
    epoch_ctx: Option<EpochContext>,
    quit: bool,
}

/// Common per-worker state. Owned exclusively by Farm; the control plane and
/// telemetry loop address a worker only through its index.
pub struct Miner {
    pub index: usize,
    pub descriptor: String,
    farm_face: Arc<dyn FarmFace>,
    epoch_init: Arc<dyn EpochInitializer>,
    slot: Mutex<WorkSlot>,
    work_available: Condvar,
    pause_flags: AtomicU32,
    hash_count: AtomicU64,
    last_reset: Mutex<Instant>,
}

impl Miner {
    pub fn new(
        index: usize,
        descriptor: impl Into<String>,
        farm_face: Arc<dyn FarmFace>,
        epoch_init: Arc<dyn EpochInitializer>,
    ) -> Self {
        Self {
            index,
            descriptor: descriptor.into(),
            farm_face,
            epoch_init,
            slot: Mutex::new(WorkSlot {
                work: WorkPackage::empty(),
                epoch_ctx: None,
                quit: false,
            }),
            work_available: Condvar::new(),
            pause_flags: AtomicU32::new(0),
            hash_count: AtomicU64::new(0),
            last_reset: Mutex::new(Instant::now()),
        }
    }

    /// Atomically replaces the current work under the work-lock and wakes the
    /// worker thread. If the epoch changed, re-runs epoch init before the next
    /// search resumes; failure sets the matching pause bit instead of propagating.
    pub fn set_work(&self, wp: WorkPackage, ctx: Option<EpochContext>) {
        let mut slot = self.slot.lock().expect("miner work lock poisoned");
        slot.work = wp;
        // Farm only hands us a context when it has decided the epoch changed, so
        // its presence (not a local epoch comparison) is what drives re-init.
        if let Some(ctx) = ctx {
            if self.epoch_init.init_epoch(&ctx) {
                self.resume(PauseReason::InitEpochError);
                self.resume(PauseReason::InsufficientMemory);
                slot.epoch_ctx = Some(ctx);
            } else {
                self.pause(PauseReason::InitEpochError);
            }
        }
        self.work_available.notify_all();
    }

    pub fn work(&self) -> WorkPackage {
        self.slot.lock().expect("miner work lock poisoned").work.clone()
    }

    /// Blocks the calling (worker) thread until new work is signalled or the
    /// worker is told to quit, then returns the current work (or `None` on quit).
    pub fn wait_for_work(&self) -> Option<WorkPackage> {
        let mut slot = self.slot.lock().expect("miner work lock poisoned");
        loop {
            if slot.quit {
                return None;
            }
            if !slot.work.is_empty() {
                return Some(slot.work.clone());
            }
            slot = self
                .work_available
                .wait(slot)
                .expect("miner work lock poisoned");
        }
    }

    /// Signals the worker thread to stop waiting for work and exit its loop.
    pub fn kick_miner(&self) {
        let mut slot = self.slot.lock().expect("miner work lock poisoned");
        slot.quit = true;
        self.work_available.notify_all();
    }

    pub fn pause(&self, reason: PauseReason) {
        self.pause_flags.fetch_or(reason as u32, Ordering::SeqCst);
    }

    pub fn resume(&self, reason: PauseReason) {
        self.pause_flags.fetch_and(!(reason as u32), Ordering::SeqCst);
    }

    pub fn pause_test(&self, reason: PauseReason) -> bool {
        self.pause_flags.load(Ordering::SeqCst) & reason as u32 != 0
    }

    pub fn paused(&self) -> bool {
        self.pause_flags.load(Ordering::SeqCst) != 0
    }

    /// Human-readable list of the currently-set pause reasons, e.g. "Overheating,FarmPaused".
    pub fn paused_string(&self) -> String {
        let flags = self.pause_flags.load(Ordering::SeqCst);
        ALL_PAUSE_REASONS
            .iter()
            .filter(|reason| flags & (**reason as u32) != 0)
            .map(|reason| format!("{:?}", reason))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Thermal control: sets `Overheating` above `tstop`, clears it below `tstart`.
    /// If `tstart >= tstop`, thermal pausing is disabled and this is a no-op.
    pub fn update_temperature(&self, temp_c: f32) {
        let tstart = self.farm_face.get_tstart();
        let tstop = self.farm_face.get_tstop();
        if tstart >= tstop {
            return;
        }
        if temp_c > tstop as f32 {
            self.pause(PauseReason::Overheating);
        } else if temp_c < tstart as f32 {
            self.resume(PauseReason::Overheating);
        }
    }

    /// Accumulates `group_size * increment` hashes toward the next rate read.
    pub fn update_hash_rate(&self, group_size: u64, increment: u64) {
        self.hash_count
            .fetch_add(group_size.saturating_mul(increment), Ordering::SeqCst);
    }

    /// Reads the accumulated hash count, computes a windowed rate against the time
    /// since the last read, and resets the window. Non-overlapping by construction.
    pub fn retrieve_hash_rate(&self) -> f64 {
        let mut last_reset = self.last_reset.lock().expect("miner timer lock poisoned");
        let elapsed = last_reset.elapsed().as_secs_f64();
        *last_reset = Instant::now();
        let hashes = self.hash_count.swap(0, Ordering::SeqCst);
        if elapsed <= 0.0 {
            return 0.0;
        }
        hashes as f64 / elapsed
    }

    pub fn submit_solution(&self, solution: Solution) {
        self.farm_face.submit_proof(solution);
    }

    pub fn report_failure(&self) {
        self.farm_face.failed_solution(self.index);
    }

    pub fn nonce_start(&self) -> u64 {
        crate::work::nonce_segment_start(
            self.farm_face.get_nonce_scrambler(),
            self.index as u64,
            self.farm_face.get_segment_width(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::work::{nonce_segment_start, WorkPackage};
    use primitive_types::H256;
    use std::sync::Mutex as StdMutex;

    struct TestFarmFace {
        submitted: StdMutex<Vec<Solution>>,
        failures: StdMutex<Vec<usize>>,
    }

    impl TestFarmFace {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                submitted: StdMutex::new(Vec::new()),
                failures: StdMutex::new(Vec::new()),
            })
        }
    }

    impl FarmFace for TestFarmFace {
        fn submit_proof(&self, solution: Solution) {
            self.submitted.lock().unwrap().push(solution);
        }
        fn failed_solution(&self, miner_index: usize) {
            self.failures.lock().unwrap().push(miner_index);
        }
        fn get_nonce_scrambler(&self) -> u64 {
            0x1000
        }
        fn get_segment_width(&self) -> u32 {
            40
        }
        fn get_tstart(&self) -> u16 {
            60
        }
        fn get_tstop(&self) -> u16 {
            80
        }
    }

    fn make_miner(index: usize) -> (Miner, Arc<TestFarmFace>) {
        let farm_face = TestFarmFace::new();
        let miner = Miner::new(
            index,
            "test",
            farm_face.clone(),
            Arc::new(NoopEpochInitializer),
        );
        (miner, farm_face)
    }

    #[test]
    fn set_work_round_trips() {
        let (miner, _) = make_miner(0);
        let mut wp = WorkPackage::empty();
        wp.header = H256::repeat_byte(7);
        wp.epoch = 1;
        miner.set_work(wp.clone(), Some(EpochContext::for_epoch(1)));
        assert_eq!(miner.work(), wp);
    }

    #[test]
    fn pause_resume_is_idempotent_per_reason() {
        let (miner, _) = make_miner(0);
        miner.pause(PauseReason::ApiRequest);
        assert!(miner.paused());
        assert!(miner.pause_test(PauseReason::ApiRequest));
        miner.resume(PauseReason::ApiRequest);
        assert!(!miner.paused());
    }

    #[test]
    fn other_reasons_unaffected_by_resume() {
        let (miner, _) = make_miner(0);
        miner.pause(PauseReason::Overheating);
        miner.pause(PauseReason::ApiRequest);
        miner.resume(PauseReason::ApiRequest);
        assert!(miner.pause_test(PauseReason::Overheating));
        assert!(!miner.pause_test(PauseReason::ApiRequest));
    }

    #[test]
    fn thermal_pause_respects_tstart_tstop_ordering() {
        let (miner, _) = make_miner(0);
        miner.update_temperature(90.0);
        assert!(miner.pause_test(PauseReason::Overheating));
        miner.update_temperature(50.0);
        assert!(!miner.pause_test(PauseReason::Overheating));
    }

    #[test]
    fn thermal_thresholds_are_strict() {
        let (miner, _) = make_miner(0);
        miner.update_temperature(80.0);
        assert!(!miner.pause_test(PauseReason::Overheating), "exactly tstop must not pause");
        miner.update_temperature(90.0);
        assert!(miner.pause_test(PauseReason::Overheating));
        miner.update_temperature(60.0);
        assert!(miner.pause_test(PauseReason::Overheating), "exactly tstart must not resume");
        miner.update_temperature(50.0);
        assert!(!miner.pause_test(PauseReason::Overheating));
    }

    #[test]
    fn hash_rate_resets_window_on_read() {
        let (miner, _) = make_miner(0);
        miner.update_hash_rate(1000, 10);
        std::thread::sleep(std::time::Duration::from_millis(10));
        let rate = miner.retrieve_hash_rate();
        assert!(rate > 0.0);
        let second = miner.retrieve_hash_rate();
        assert_eq!(second, 0.0);
    }

    #[test]
    fn nonce_start_uses_farm_face_values() {
        let (miner, _) = make_miner(2);
        assert_eq!(miner.nonce_start(), nonce_segment_start(0x1000, 2, 40));
    }

    #[test]
    fn kick_miner_unblocks_waiting_thread() {
        let (miner, _) = make_miner(0);
        let miner = Arc::new(miner);
        let waiter = miner.clone();
        let handle = std::thread::spawn(move || waiter.wait_for_work());
        std::thread::sleep(std::time::Duration::from_millis(20));
        miner.kick_miner();
        assert_eq!(handle.join().unwrap(), None);
    }
}
