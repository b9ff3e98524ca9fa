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

//! Hardware-monitor probe capability. The three vendor backends (NVML, ADL, AMD
//! sysfs) sit behind this one polymorphic trait so the telemetry loop in `farm.rs`
//! needs no platform conditionals: a missing backend is just `None`.

use crate::stats::HwSample;
use async_trait::async_trait;

#[async_trait]
pub trait HwProbe: Send + Sync {
    /// Reads the current telemetry for `device_index`. Probe failures are
    /// non-fatal; returning `None` means "no sample this tick", not an error.
    async fn sample(&self, device_index: usize) -> Option<HwSample>;
}

/// A probe that never has a sample, used when hardware monitoring is disabled or
/// for workers with no vendor backend available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProbe;

#[async_trait]
impl HwProbe for NullProbe {
    async fn sample(&self, _device_index: usize) -> Option<HwSample> {
        None
    }
}
