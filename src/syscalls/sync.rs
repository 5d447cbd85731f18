//! Lock and condition-variable syscalls, delegated to the scheduler
//! collaborator.

use core::sync::atomic::AtomicU32;

use crate::abi::{enum_from_raw, Scope};
use crate::errno::Result;
use crate::synch;
use crate::thread::current_tid;

/// Releases a guest lock, waking blocked threads.
pub fn lock_unlock(lock: &AtomicU32, scope: u8) -> Result<()> {
	let scope: Scope = enum_from_raw(scope)?;
	synch::required()?.lock_unlock(current_tid(), lock, scope)
}

/// Wakes up to `nwaiters` threads blocked on a condition variable.
pub fn condvar_signal(condvar: &AtomicU32, scope: u8, nwaiters: u32) -> Result<()> {
	let scope: Scope = enum_from_raw(scope)?;
	synch::required()?.condvar_signal(condvar, scope, nwaiters)
}
