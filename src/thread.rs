//! Thread spawning glue and the per-thread emulation state.
//!
//! Two pieces of state are thread-local: the current descriptor table and
//! the current guest thread id. Both are published by the trampoline before
//! the first guest instruction runs, and never reassigned afterwards. The
//! table pointer is per-thread rather than process-global so that one host
//! process can host several guest processes; within a single guest process
//! it is invariant across its threads.

use core::cell::{Cell, RefCell};
use core::ffi::c_void;
use core::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::thread;

use crate::abi::{Scope, Tid};
use crate::errno::{Errno, Result};
use crate::fd::FdTable;
use crate::{synch, tid};

thread_local! {
	static CURFDS: RefCell<Option<Arc<FdTable>>> = const { RefCell::new(None) };
	static CURTID: Cell<Tid> = const { Cell::new(0) };
}

/// The entry point of a guest thread. Receives the thread's id and the
/// argument passed to `thread_create`. Must not return.
pub type ThreadEntry = unsafe extern "C" fn(tid: Tid, argument: *mut c_void);

/// Installs the emulation state for the calling thread.
///
/// The launcher calls this once for the initial guest thread; the
/// trampoline calls it for every spawned one.
pub fn install(table: Arc<FdTable>, tid: Tid) {
	CURFDS.with(|t| *t.borrow_mut() = Some(table));
	CURTID.with(|t| t.set(tid));
}

/// The calling thread's descriptor table.
///
/// Panics if no table was installed; issuing guest syscalls on a thread the
/// trampoline never saw is an embedder bug, not a guest-visible error.
pub(crate) fn current_table() -> Arc<FdTable> {
	CURFDS.with(|t| t.borrow().clone())
		.expect("no descriptor table installed for this thread")
}

pub(crate) fn current_tid() -> Tid {
	CURTID.with(Cell::get)
}

/// Spawns a guest thread.
///
/// The new host thread installs the parent's descriptor table and a fresh
/// thread id, then jumps to the guest entry point. A guest entry point
/// returning is a contract violation and aborts the process.
///
/// # Safety
///
/// `entry` must be a valid guest entry point and `argument` must stay valid
/// until the new thread has consumed it.
pub unsafe fn thread_create(
	entry: ThreadEntry,
	argument: *mut c_void,
	stack_len: usize,
) -> Result<Tid> {
	let table = current_table();
	let new_tid = tid::allocate();
	// Raw pointers are not Send; the address is.
	let argument = argument as usize;

	let mut builder = thread::Builder::new();
	if stack_len > 0 {
		builder = builder.stack_size(stack_len);
	}
	builder
		.spawn(move || {
			install(table, new_tid);
			unsafe {
				entry(new_tid, argument as *mut c_void);
			}
			// The guest ABI requires entry points to terminate through
			// thread_exit.
			std::process::abort();
		})
		.map_err(|_| Errno::Again)?;
	// Guest threads are detached; joining happens through guest locks.
	Ok(new_tid)
}

/// Terminates the calling guest thread, first releasing `lock` through the
/// futex scheduler so joiners wake up.
pub fn thread_exit(lock: &AtomicU32, scope: Scope) -> ! {
	if let Ok(scheduler) = synch::required() {
		if let Err(err) = scheduler.lock_unlock(current_tid(), lock, scope) {
			warn!("thread_exit: unlocking the join lock failed: {err}");
		}
	}
	// Ends only this host thread, without unwinding through guest frames.
	unsafe { libc::pthread_exit(core::ptr::null_mut()) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn install_publishes_table_and_tid() {
		install(Arc::new(FdTable::new()), 7);
		assert_eq!(current_tid(), 7);
		let _ = current_table();
	}

	#[test]
	fn spawned_guest_threads_share_the_table() {
		use std::sync::atomic::{AtomicBool, Ordering};
		static RAN: AtomicBool = AtomicBool::new(false);

		unsafe extern "C" fn entry(tid: Tid, argument: *mut c_void) {
			assert!(tid >= 2);
			assert!(argument.is_null());
			let _ = current_table();
			RAN.store(true, Ordering::SeqCst);
			unsafe { libc::pthread_exit(core::ptr::null_mut()) }
		}

		install(Arc::new(FdTable::new()), 1);
		let tid = unsafe { thread_create(entry, core::ptr::null_mut(), 0) }.unwrap();
		assert!(tid >= 2);
		// The thread is detached; give it a moment.
		for _ in 0..200 {
			if RAN.load(Ordering::SeqCst) {
				return;
			}
			thread::sleep(core::time::Duration::from_millis(5));
		}
		panic!("guest thread never ran");
	}
}
