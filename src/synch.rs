//! The seam towards the futex/condvar scheduler collaborator.
//!
//! The emulator core never parks guest threads on lock words itself; it
//! hands those operations to an implementation of [`Scheduler`] installed
//! once per process. The event multiplexer offers every `poll` call to the
//! scheduler first so that pure futex waits never touch the host poll
//! machinery.

use core::sync::atomic::AtomicU32;
use std::sync::OnceLock;

use crate::abi::{Event, Scope, Subscription, Tid, Timestamp};
use crate::errno::{Errno, Result};

/// The operations the futex/condvar collaborator must provide.
pub trait Scheduler: Send + Sync {
	/// Releases a guest lock, waking one blocked writer or all blocked
	/// readers.
	fn lock_unlock(&self, tid: Tid, lock: &AtomicU32, scope: Scope) -> Result<()>;

	/// Wakes up to `nwaiters` threads blocked on a condition variable,
	/// moving them onto the associated lock's wait queue.
	fn condvar_signal(&self, condvar: &AtomicU32, scope: Scope, nwaiters: u32) -> Result<()>;

	/// Blocks on a condition variable with a timeout.
	#[allow(clippy::too_many_arguments)]
	fn cond_timedwait(
		&self,
		tid: Tid,
		condvar: &AtomicU32,
		lock: &AtomicU32,
		scope: Scope,
		timeout: Timestamp,
		abstime: bool,
	) -> Result<()>;

	/// Offers an entire subscription list to the scheduler.
	///
	/// Returns `Ok(Some(nevents))` if the scheduler claimed the call (all
	/// subscriptions were futex-related) and filled `events`, `Ok(None)` if
	/// the multiplexer should handle the call itself.
	fn poll(
		&self,
		tid: Tid,
		subs: &[Subscription],
		events: &mut Vec<Event>,
	) -> Result<Option<usize>>;
}

static SCHEDULER: OnceLock<Box<dyn Scheduler>> = OnceLock::new();

/// Installs the process-wide scheduler. Fails if one is already installed.
pub fn set_scheduler(scheduler: Box<dyn Scheduler>) -> core::result::Result<(), Box<dyn Scheduler>> {
	SCHEDULER.set(scheduler)
}

pub(crate) fn scheduler() -> Option<&'static dyn Scheduler> {
	SCHEDULER.get().map(|s| &**s)
}

/// Like [`scheduler`], for callers that cannot make progress without one.
pub(crate) fn required() -> Result<&'static dyn Scheduler> {
	scheduler().ok_or(Errno::Nosys)
}
