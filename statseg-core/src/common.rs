// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

use std::mem::MaybeUninit;

use crate::error::StatSegError;
use crate::syserror;

pub const CLOCK_REALTIME: libc::clockid_t = libc::CLOCK_REALTIME;

// This primarily for development convenience
#[cfg(target_os = "macos")]
pub const CLOCK_MONOTONIC: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(not(target_os = "macos"))]
pub const CLOCK_MONOTONIC: libc::clockid_t = libc::CLOCK_MONOTONIC_COARSE;

/// Read a specific view of time
///
/// This function wraps the `clock_gettime()` system call to conveniently return the current time
/// tracked by a specific clock. The clock_id is one of libc::CLOCK_REALTIME,
/// libc::CLOCK_MONOTONIC, etc.
pub fn clock_gettime_safe(clock_id: libc::clockid_t) -> Result<libc::timespec, StatSegError> {
    // Allocate a buffer where the current time will be written to
    let mut buf: MaybeUninit<libc::timespec> = MaybeUninit::uninit();

    // SAFETY: The pointers passed to clock_gettime are valid. Assume init if the call is successful.
    unsafe {
        let ret = libc::clock_gettime(clock_id, buf.as_mut_ptr());
        if ret < 0 {
            syserror!("clock_gettime")
        } else {
            Ok(buf.assume_init())
        }
    }
}

/// Convert a `timespec` to seconds as `f64`, the unit every clock reading in this crate is
/// reduced to before being published as a scalar (VPP's `vlib_time_now` does the same).
pub fn timespec_to_f64(ts: libc::timespec) -> f64 {
    ts.tv_sec as f64 + ts.tv_nsec as f64 / 1e9
}

/// Current monotonic time, in seconds, for the Collector's rate computation. Returns `0.0` on a
/// `clock_gettime` failure rather than propagating an error: the Collector has no error path,
/// and a single bad reading only costs one tick's rate sample.
pub fn monotonic_now_f64() -> f64 {
    clock_gettime_safe(CLOCK_MONOTONIC)
        .map(timespec_to_f64)
        .unwrap_or(0.0)
}
