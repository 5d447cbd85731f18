//! Memory management syscalls.
//!
//! These wrap the host's `mmap` family. Addresses and lengths come straight
//! from the guest, so the mapping entry points are unsafe: the emulator
//! trusts the launcher to have given the guest a coherent address space.

use core::ffi::c_void;

use crate::abi::{enum_from_raw, Advice, Fd, Filesize, Rights, MAP_ANON_FD};
use crate::errno::{cvt, last_host, Errno, Result};
use crate::thread::current_table;

bitflags! {
	/// Guest memory protection bits.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct MProt: u8 {
		const READ = 1 << 0;
		const WRITE = 1 << 1;
		const EXEC = 1 << 2;
	}
}

bitflags! {
	/// Guest mapping flags.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct MFlags: u8 {
		const PRIVATE = 1 << 0;
		const SHARED = 1 << 1;
		const FIXED = 1 << 2;
		const ANON = 1 << 3;
	}
}

bitflags! {
	/// Guest msync flags.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct MsFlags: u8 {
		const ASYNC = 1 << 0;
		const SYNC = 1 << 1;
		const INVALIDATE = 1 << 2;
	}
}

fn host_prot(prot: u8) -> Result<libc::c_int> {
	let prot = MProt::from_bits(prot).ok_or(Errno::Inval)?;
	// Writable and executable at once is never granted.
	if prot.contains(MProt::WRITE | MProt::EXEC) {
		return Err(Errno::Notsup);
	}
	let mut host = libc::PROT_NONE;
	if prot.contains(MProt::READ) {
		host |= libc::PROT_READ;
	}
	if prot.contains(MProt::WRITE) {
		host |= libc::PROT_WRITE;
	}
	if prot.contains(MProt::EXEC) {
		host |= libc::PROT_EXEC;
	}
	Ok(host)
}

/// Maps memory, optionally backed by a descriptor with the mem-map right.
///
/// # Safety
///
/// With `FIXED` the call replaces whatever was mapped at `addr`; the caller
/// must own that range.
pub unsafe fn mem_map(
	addr: *mut c_void,
	len: usize,
	prot: u8,
	flags: u8,
	fd: Fd,
	off: Filesize,
) -> Result<*mut c_void> {
	let flags = MFlags::from_bits(flags).ok_or(Errno::Inval)?;
	// Exactly one sharing mode.
	if flags.contains(MFlags::PRIVATE) == flags.contains(MFlags::SHARED) {
		return Err(Errno::Inval);
	}
	let mut host_flags = if flags.contains(MFlags::PRIVATE) {
		libc::MAP_PRIVATE
	} else {
		libc::MAP_SHARED
	};
	if flags.contains(MFlags::FIXED) {
		host_flags |= libc::MAP_FIXED;
	}

	let needed = if MProt::from_bits(prot)
		.is_some_and(|prot| prot.contains(MProt::EXEC))
	{
		Rights::MEM_MAP | Rights::MEM_MAP_EXEC
	} else {
		Rights::MEM_MAP
	};
	let host_prot = host_prot(prot)?;

	let (host_fd, _object) = if flags.contains(MFlags::ANON) {
		if fd != MAP_ANON_FD || off != 0 {
			return Err(Errno::Inval);
		}
		host_flags |= libc::MAP_ANON;
		(-1, None)
	} else {
		let object = current_table().acquire(fd, needed, Rights::empty())?;
		(object.require_host_fd()?, Some(object))
	};

	let ret = unsafe {
		libc::mmap(
			addr,
			len,
			host_prot,
			host_flags,
			host_fd,
			off as libc::off_t,
		)
	};
	if ret == libc::MAP_FAILED {
		return Err(last_host());
	}
	Ok(ret)
}

/// Changes the protection of a mapped region.
///
/// # Safety
///
/// `addr..addr+len` must be a mapping owned by the guest.
pub unsafe fn mem_protect(addr: *mut c_void, len: usize, prot: u8) -> Result<()> {
	let host_prot = host_prot(prot)?;
	cvt(unsafe { libc::mprotect(addr, len, host_prot) })?;
	Ok(())
}

/// Flushes a mapped region to its backing store.
///
/// # Safety
///
/// `addr..addr+len` must be a mapping owned by the guest.
pub unsafe fn mem_sync(addr: *mut c_void, len: usize, flags: u8) -> Result<()> {
	let flags = MsFlags::from_bits(flags).ok_or(Errno::Inval)?;
	// Exactly one flush mode.
	if flags.contains(MsFlags::ASYNC) == flags.contains(MsFlags::SYNC) {
		return Err(Errno::Inval);
	}
	let mut host_flags = if flags.contains(MsFlags::ASYNC) {
		libc::MS_ASYNC
	} else {
		libc::MS_SYNC
	};
	if flags.contains(MsFlags::INVALIDATE) {
		host_flags |= libc::MS_INVALIDATE;
	}
	cvt(unsafe { libc::msync(addr, len, host_flags) })?;
	Ok(())
}

/// Advises the host about the access pattern of a mapped region.
///
/// # Safety
///
/// `addr..addr+len` must be a mapping owned by the guest.
pub unsafe fn mem_advise(addr: *mut c_void, len: usize, advice: u8) -> Result<()> {
	let advice: Advice = enum_from_raw(advice)?;
	let host_advice = match advice {
		Advice::Normal => libc::MADV_NORMAL,
		Advice::Random => libc::MADV_RANDOM,
		Advice::Sequential => libc::MADV_SEQUENTIAL,
		Advice::WillNeed => libc::MADV_WILLNEED,
		Advice::DontNeed => libc::MADV_DONTNEED,
		// No host counterpart; the advice is discardable by definition.
		Advice::NoReuse => return Ok(()),
	};
	cvt(unsafe { libc::madvise(addr, len, host_advice) })?;
	Ok(())
}

/// Unmaps a region.
///
/// # Safety
///
/// `addr..addr+len` must be a mapping owned by the guest.
pub unsafe fn mem_unmap(addr: *mut c_void, len: usize) -> Result<()> {
	cvt(unsafe { libc::munmap(addr, len) })?;
	Ok(())
}
