//! Clock syscalls.

use crate::abi::{enum_from_raw, ClockId, Timestamp};
use crate::errno::{cvt, Result};
use crate::time;

/// Returns the resolution of a guest clock in nanoseconds.
pub fn clock_res_get(clock_id: u32) -> Result<Timestamp> {
	let clock_id: ClockId = enum_from_raw(clock_id)?;
	let mut ts = libc::timespec {
		tv_sec: 0,
		tv_nsec: 0,
	};
	cvt(unsafe { libc::clock_getres(time::host_clock_id(clock_id), &mut ts) })?;
	Ok(time::timespec_to_timestamp(ts))
}

/// Reads a guest clock. The precision argument is advisory and unused.
pub fn clock_time_get(clock_id: u32, _precision: Timestamp) -> Result<Timestamp> {
	let clock_id: ClockId = enum_from_raw(clock_id)?;
	time::clock_now(clock_id)
}
