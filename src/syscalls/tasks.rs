//! Thread and process syscalls.

use core::ffi::c_void;
use core::sync::atomic::AtomicU32;

use crate::abi::{enum_from_raw, Scope, Signal, Tid};
use crate::errno::{cvt, Errno, Result};
use crate::thread::{self, ThreadEntry};

/// Spawns a guest thread; see [`thread::thread_create`].
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
	strace!("thread_create");
	unsafe { thread::thread_create(entry, argument, stack_len) }
}

/// Terminates the calling guest thread after releasing its join lock.
pub fn thread_exit(lock: &AtomicU32, scope: u8) -> Result<()> {
	let scope: Scope = enum_from_raw(scope)?;
	thread::thread_exit(lock, scope)
}

/// Yields the processor.
pub fn thread_yield() -> Result<()> {
	cvt(unsafe { libc::sched_yield() })?;
	Ok(())
}

/// Delivers a signal to the guest process.
pub fn proc_raise(signal: u8) -> Result<()> {
	let signal: Signal = enum_from_raw(signal)?;
	let host_signal = match signal {
		Signal::Abrt => libc::SIGABRT,
		Signal::Alrm => libc::SIGALRM,
		Signal::Bus => libc::SIGBUS,
		Signal::Chld => libc::SIGCHLD,
		Signal::Cont => libc::SIGCONT,
		Signal::Fpe => libc::SIGFPE,
		Signal::Hup => libc::SIGHUP,
		Signal::Ill => libc::SIGILL,
		Signal::Int => libc::SIGINT,
		Signal::Kill => libc::SIGKILL,
		Signal::Pipe => libc::SIGPIPE,
		Signal::Quit => libc::SIGQUIT,
		Signal::Segv => libc::SIGSEGV,
		Signal::Stop => libc::SIGSTOP,
		Signal::Sys => libc::SIGSYS,
		Signal::Term => libc::SIGTERM,
		Signal::Trap => libc::SIGTRAP,
		Signal::Tstp => libc::SIGTSTP,
		Signal::Ttin => libc::SIGTTIN,
		Signal::Ttou => libc::SIGTTOU,
		Signal::Urg => libc::SIGURG,
		Signal::Usr1 => libc::SIGUSR1,
		Signal::Usr2 => libc::SIGUSR2,
		Signal::Vtalrm => libc::SIGVTALRM,
		Signal::Xcpu => libc::SIGXCPU,
		Signal::Xfsz => libc::SIGXFSZ,
	};
	cvt(unsafe { libc::raise(host_signal) })?;
	Ok(())
}

/// Terminates the guest process with the given exit code.
pub fn proc_exit(code: u32) -> ! {
	std::process::exit(code as i32)
}

/// The guest ABI forbids exec in this mode.
pub fn proc_exec(_fd: crate::abi::Fd, _data: &[u8], _fds: &[crate::abi::Fd]) -> Result<()> {
	Err(Errno::Nosys)
}

/// The guest ABI forbids fork in this mode.
pub fn proc_fork() -> Result<(crate::abi::Fd, Tid)> {
	Err(Errno::Nosys)
}
