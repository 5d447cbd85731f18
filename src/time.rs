//! Clock id mapping and timestamp conversion.
//!
//! Guest timestamps are 64-bit unsigned nanosecond counts since the clock's
//! epoch. Host `timespec` values convert with saturation in both
//! directions.

use crate::abi::{ClockId, Timestamp};

/// Maps a guest clock onto the host clock implementing it.
pub fn host_clock_id(id: ClockId) -> libc::clockid_t {
	match id {
		ClockId::Realtime => libc::CLOCK_REALTIME,
		ClockId::Monotonic => libc::CLOCK_MONOTONIC,
		ClockId::ProcessCputimeId => libc::CLOCK_PROCESS_CPUTIME_ID,
		ClockId::ThreadCputimeId => libc::CLOCK_THREAD_CPUTIME_ID,
	}
}

/// Converts a host `timespec` into a guest timestamp.
///
/// Negative seconds clamp to zero; seconds that would overflow the
/// multiplication by 10⁹ saturate to the maximum timestamp.
pub fn timespec_to_timestamp(ts: libc::timespec) -> Timestamp {
	if ts.tv_sec < 0 {
		return 0;
	}
	(ts.tv_sec as u64)
		.checked_mul(1_000_000_000)
		.and_then(|ns| ns.checked_add(ts.tv_nsec as u64))
		.unwrap_or(Timestamp::MAX)
}

/// Converts a guest timestamp into a host `timespec`, saturating `tv_sec`
/// at the host time type's maximum.
pub fn timestamp_to_timespec(ns: Timestamp) -> libc::timespec {
	let secs = ns / 1_000_000_000;
	libc::timespec {
		tv_sec: if secs > libc::time_t::MAX as u64 {
			libc::time_t::MAX
		} else {
			secs as libc::time_t
		},
		tv_nsec: (ns % 1_000_000_000) as _,
	}
}

/// Reads a host clock as a guest timestamp.
pub(crate) fn clock_now(id: ClockId) -> crate::Result<Timestamp> {
	let mut ts = libc::timespec {
		tv_sec: 0,
		tv_nsec: 0,
	};
	crate::errno::cvt(unsafe { libc::clock_gettime(host_clock_id(id), &mut ts) })?;
	Ok(timespec_to_timestamp(ts))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn negative_seconds_clamp_to_zero() {
		let ts = libc::timespec {
			tv_sec: -5,
			tv_nsec: 17,
		};
		assert_eq!(timespec_to_timestamp(ts), 0);
	}

	#[test]
	fn overflowing_seconds_saturate() {
		let ts = libc::timespec {
			tv_sec: libc::time_t::MAX,
			tv_nsec: 999_999_999,
		};
		assert_eq!(timespec_to_timestamp(ts), Timestamp::MAX);
	}

	#[test]
	fn round_trips_below_saturation() {
		let ns: Timestamp = 1_234_567_890_123;
		let ts = timestamp_to_timespec(ns);
		assert_eq!(ts.tv_sec, 1_234);
		assert_eq!(ts.tv_nsec, 567_890_123);
		assert_eq!(timespec_to_timestamp(ts), ns);
	}

	#[test]
	fn monotonic_clock_advances() {
		let a = clock_now(ClockId::Monotonic).unwrap();
		let b = clock_now(ClockId::Monotonic).unwrap();
		assert!(b >= a);
	}
}
