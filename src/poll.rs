//! The unified event-wait primitive.
//!
//! One call multiplexes three kinds of subscriptions: timed sleeps on a
//! guest clock, futex waits (delegated wholesale to the scheduler
//! collaborator) and readiness of host descriptors. Per-subscription
//! failures are reported as events; the call itself only fails when the
//! host poll fails.

use smallvec::SmallVec;

use crate::abi::{
	ClockId, Event, EventType, Rights, SubClockFlags, Subscription, SubscriptionKind, Timestamp,
};
use crate::errno::{cvt, Errno, Result};
use crate::thread;
use crate::time;

/// Waits for the first of the subscribed conditions.
///
/// Events are appended to `events` in a fixed order: errors discovered
/// while resolving descriptors first, in subscription order, then events
/// produced by the host poll, in subscription order. The returned count
/// never exceeds `subs.len()`.
pub fn poll(subs: &[Subscription], events: &mut Vec<Event>) -> Result<usize> {
	events.clear();
	if subs.is_empty() {
		return Ok(0);
	}

	// Pure futex waits never reach the host poll machinery.
	if let Some(scheduler) = crate::synch::scheduler() {
		if let Some(count) = scheduler.poll(thread::current_tid(), subs, events)? {
			return Ok(count);
		}
	}

	// A lone clock subscription is a sleep.
	if let [sub] = subs {
		if let SubscriptionKind::Clock {
			clock_id,
			timeout,
			flags,
			..
		} = sub.kind
		{
			let mut event = Event::new(sub.userdata, EventType::Clock);
			if let Err(err) = sleep_on_clock(clock_id, timeout, flags) {
				event.error = Some(err);
			}
			events.push(event);
			return Ok(1);
		}
	}

	// Everything else: descriptor readiness, with at most one clock acting
	// as a relative timeout.
	let table = thread::current_table();
	let mut timeout: Option<Timestamp> = None;
	let mut clock_userdata = 0;
	let mut pollfds: SmallVec<[libc::pollfd; 8]> = SmallVec::new();
	// (subscription, acquired object) per host poll slot; the references
	// keep the objects alive across the host call and are dropped at the
	// end, outside every lock.
	let mut acquired = Vec::with_capacity(subs.len());

	for sub in subs {
		let (fd, rights, event_type) = match sub.kind {
			SubscriptionKind::FdRead { fd } => {
				(fd, Rights::FD_READ | Rights::POLL_FD_READWRITE, EventType::FdRead)
			}
			SubscriptionKind::FdWrite { fd } => {
				(fd, Rights::FD_WRITE | Rights::POLL_FD_READWRITE, EventType::FdWrite)
			}
			SubscriptionKind::Clock {
				clock_id,
				timeout: ns,
				flags,
				..
			} => {
				if timeout.is_some() {
					// Only a single clock can act as the timeout.
					events.push(Event::error(sub.userdata, EventType::Clock, Errno::Nosys));
					continue;
				}
				let relative = if flags.contains(SubClockFlags::ABSTIME) {
					ns.saturating_sub(time::clock_now(clock_id)?)
				} else {
					ns
				};
				timeout = Some(relative);
				clock_userdata = sub.userdata;
				continue;
			}
			SubscriptionKind::CondvarWait { .. } => {
				// The scheduler declined the call, so a futex wait cannot
				// be honoured here.
				events.push(Event::error(sub.userdata, EventType::Condvar, Errno::Nosys));
				continue;
			}
		};

		match table.acquire(fd, rights, Rights::empty()) {
			Ok(object) => match object.require_host_fd() {
				Ok(host_fd) => {
					pollfds.push(libc::pollfd {
						fd: host_fd,
						events: if event_type == EventType::FdRead {
							libc::POLLRDNORM
						} else {
							libc::POLLWRNORM
						},
						revents: 0,
					});
					acquired.push((sub, event_type, object));
				}
				Err(err) => events.push(Event::error(sub.userdata, event_type, err)),
			},
			Err(err) => events.push(Event::error(sub.userdata, event_type, err)),
		}
	}

	// With errors already recorded the host poll must not block at all.
	let timeout_ms: libc::c_int = if !events.is_empty() {
		0
	} else if let Some(ns) = timeout {
		ns.div_ceil(1_000_000).min(libc::c_int::MAX as u64) as libc::c_int
	} else {
		-1
	};

	let ready = cvt(unsafe {
		libc::poll(
			pollfds.as_mut_ptr(),
			pollfds.len() as libc::nfds_t,
			timeout_ms,
		)
	})?;

	if ready == 0 && events.is_empty() && timeout.is_some() {
		// The timeout fired before any descriptor became ready.
		events.push(Event::new(clock_userdata, EventType::Clock));
	} else {
		for (pollfd, (sub, event_type, object)) in pollfds.iter().zip(&acquired) {
			let revents = pollfd.revents;
			if revents == 0 {
				continue;
			}
			let mut event = Event::new(sub.userdata, *event_type);
			if revents & libc::POLLNVAL != 0 {
				event.error = Some(Errno::Badf);
			} else if revents & libc::POLLERR != 0 {
				// Error dominates hangup.
				event.error = Some(Errno::Io);
			} else if revents & libc::POLLHUP != 0 {
				// Hangup dominates plain readiness; buffered bytes are
				// still reported so readers can drain.
				event.hangup = true;
				if *event_type == EventType::FdRead {
					event.nbytes = bytes_readable(object.host_fd().unwrap_or(-1));
				}
			} else if *event_type == EventType::FdRead {
				event.nbytes = bytes_readable(object.host_fd().unwrap_or(-1));
			}
			events.push(event);
		}
	}

	drop(acquired);
	Ok(events.len())
}

/// Sleeps on a guest clock, absolutely or relatively.
fn sleep_on_clock(clock_id: ClockId, timeout: Timestamp, flags: SubClockFlags) -> Result<()> {
	#[cfg(any(target_os = "linux", target_os = "freebsd"))]
	{
		let ts = time::timestamp_to_timespec(timeout);
		let host_flags = if flags.contains(SubClockFlags::ABSTIME) {
			libc::TIMER_ABSTIME
		} else {
			0
		};
		loop {
			let err = unsafe {
				libc::clock_nanosleep(
					time::host_clock_id(clock_id),
					host_flags,
					&ts,
					core::ptr::null_mut(),
				)
			};
			match err {
				0 => return Ok(()),
				libc::EINTR => continue,
				_ => return Err(Errno::from_host(err)),
			}
		}
	}
	#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
	{
		// No clock_nanosleep on this host: turn absolute timeouts into
		// relative ones against the subscribed clock.
		let relative = if flags.contains(SubClockFlags::ABSTIME) {
			timeout.saturating_sub(time::clock_now(clock_id)?)
		} else {
			timeout
		};
		let ts = time::timestamp_to_timespec(relative);
		cvt(unsafe { libc::nanosleep(&ts, core::ptr::null_mut()) })?;
		Ok(())
	}
}

/// Bytes buffered for reading on a host descriptor; zero when the host
/// cannot tell.
fn bytes_readable(host_fd: libc::c_int) -> u64 {
	let mut count: libc::c_int = 0;
	let ret = unsafe { libc::ioctl(host_fd, libc::FIONREAD, &mut count) };
	if ret < 0 || count < 0 {
		0
	} else {
		count as u64
	}
}
