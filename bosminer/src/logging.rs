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

//! Global structured logger. Farm's telemetry loop and PoolManager's work-loop run
//! on a serialized executor and must never block on I/O, so the terminal drain is
//! wrapped in `slog_async` the same way the teacher's `ii-logging` crate does it.

use lazy_static::lazy_static;
use slog::{o, Drain};

lazy_static! {
    static ref ROOT: slog::Logger = build_root_logger();
}

fn build_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let term_drain = slog_term::FullFormat::new(decorator).build().fuse();
    let env_drain = slog_envlogger::new(term_drain);
    let async_drain = slog_async::Async::new(env_drain).build().fuse();
    slog::Logger::root(async_drain, o!())
}

/// Returns the process-wide logger. Modules clone this into their own context
/// loggers (e.g. tagging a pool connection's host) rather than calling it per line.
pub fn root() -> slog::Logger {
    ROOT.clone()
}

pub mod macros {
    //! Re-exports of `slog`'s leveled macros bound to the crate's global logger,
    //! mirroring `ii_logging::macros::*` so call sites read `info!("...")` just like
    //! the teacher's modules do.
    pub use slog::{debug, error, info, trace, warn};

    #[macro_export]
    macro_rules! log_info {
        ($($arg:tt)+) => { $crate::logging::macros::info!($crate::logging::root(), $($arg)+) };
    }
    #[macro_export]
    macro_rules! log_warn {
        ($($arg:tt)+) => { $crate::logging::macros::warn!($crate::logging::root(), $($arg)+) };
    }
    #[macro_export]
    macro_rules! log_debug {
        ($($arg:tt)+) => { $crate::logging::macros::debug!($crate::logging::root(), $($arg)+) };
    }
    #[macro_export]
    macro_rules! log_trace {
        ($($arg:tt)+) => { $crate::logging::macros::trace!($crate::logging::root(), $($arg)+) };
    }
    #[macro_export]
    macro_rules! log_error {
        ($($arg:tt)+) => { $crate::logging::macros::error!($crate::logging::root(), $($arg)+) };
    }
}
