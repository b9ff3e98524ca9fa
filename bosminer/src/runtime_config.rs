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

//! Process-wide tunables the control plane may override at runtime. Everything here
//! has an implementation-defined default; none of it is wired to a CLI or config file
//! parser, which stays out of scope.

use lazy_static::lazy_static;
use std::sync::Mutex;
use std::time::Duration;

/// Default nonce segment width in bits (`2^40` nonces per worker per round), matching
/// ethminer's `m_nonce_segment_with` default.
pub const DEFAULT_SEGMENT_WIDTH: u32 = 40;

/// Default number of consecutive failed connection attempts before a connection is
/// rotated out of the active slot.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Default number of minutes before a failed-over connection falls back to the
/// primary (index 0), matching ethminer's fallback timer.
pub const DEFAULT_FAILOVER_TIMEOUT_MIN: u32 = 20;

/// Default number of work-loop ticks between hashrate reports to the active pool.
pub const DEFAULT_HASHRATE_REPORT_TICKS: u32 = 60;

/// Default Farm telemetry collection interval, matching ethminer's 5000ms cadence.
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_millis(5000);

/// Default thermal pause threshold in degrees Celsius.
pub const DEFAULT_TSTART: u16 = 0;

/// Default thermal resume threshold in degrees Celsius.
pub const DEFAULT_TSTOP: u16 = 0;

#[derive(Debug, Clone)]
pub struct RunTimeConfig {
    pub segment_width: u32,
    pub max_tries: u32,
    pub failover_timeout_min: u32,
    pub hashrate_report_ticks: u32,
    pub telemetry_interval: Duration,
    pub tstart: u16,
    pub tstop: u16,
}

impl Default for RunTimeConfig {
    fn default() -> Self {
        Self {
            segment_width: DEFAULT_SEGMENT_WIDTH,
            max_tries: DEFAULT_MAX_TRIES,
            failover_timeout_min: DEFAULT_FAILOVER_TIMEOUT_MIN,
            hashrate_report_ticks: DEFAULT_HASHRATE_REPORT_TICKS,
            telemetry_interval: DEFAULT_TELEMETRY_INTERVAL,
            tstart: DEFAULT_TSTART,
            tstop: DEFAULT_TSTOP,
        }
    }
}

lazy_static! {
    static ref CONFIG: Mutex<RunTimeConfig> = Mutex::new(RunTimeConfig::default());
}

pub fn get() -> RunTimeConfig {
    CONFIG.lock().expect("runtime config lock poisoned").clone()
}

pub fn set_segment_width(width: u32) {
    CONFIG.lock().expect("runtime config lock poisoned").segment_width = width;
}

pub fn set_max_tries(max_tries: u32) {
    CONFIG.lock().expect("runtime config lock poisoned").max_tries = max_tries;
}

pub fn set_failover_timeout_min(minutes: u32) {
    CONFIG.lock().expect("runtime config lock poisoned").failover_timeout_min = minutes;
}

pub fn set_hashrate_report_ticks(ticks: u32) {
    CONFIG.lock().expect("runtime config lock poisoned").hashrate_report_ticks = ticks;
}

pub fn set_tstart_tstop(tstart: u16, tstop: u16) {
    let mut config = CONFIG.lock().expect("runtime config lock poisoned");
    config.tstart = tstart;
    config.tstop = tstop;
}
