//! Syscalls operating on a descriptor by number.

use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;

use crate::abi::{
	enum_from_raw, flags_from_raw, Fd, FdFlags, Fdstat, FdstatPut, FileType, Filesize, Rights,
	Whence, RIGHTS_SHARED_MEMORY_BASE, RIGHTS_SOCKET_BASE,
};
use crate::errno::{cvt, cvt_off, cvt_ssize, Errno, Result};
use crate::fd::FdObject;
use crate::thread::current_table;

/// Closes a guest descriptor.
pub fn fd_close(fd: Fd) -> Result<()> {
	strace!("fd_close({fd})");
	current_table().close(fd)
}

/// Duplicates a guest descriptor onto a fresh random number.
pub fn fd_dup(fd: Fd) -> Result<Fd> {
	strace!("fd_dup({fd})");
	current_table().dup(fd)
}

/// Atomically replaces descriptor `to` with a new reference to `from`.
pub fn fd_replace(from: Fd, to: Fd) -> Result<()> {
	strace!("fd_replace({from}, {to})");
	current_table().replace(from, to)
}

/// Synchronises a descriptor's data to stable storage.
pub fn fd_datasync(fd: Fd) -> Result<()> {
	let object = current_table().acquire(fd, Rights::FD_DATASYNC, Rights::empty())?;
	let host_fd = object.require_host_fd()?;
	#[cfg(any(target_os = "linux", target_os = "freebsd"))]
	{
		cvt(unsafe { libc::fdatasync(host_fd) })?;
	}
	#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
	{
		cvt(unsafe { libc::fsync(host_fd) })?;
	}
	Ok(())
}

/// Synchronises a descriptor's data and metadata to stable storage.
pub fn fd_sync(fd: Fd) -> Result<()> {
	let object = current_table().acquire(fd, Rights::FD_SYNC, Rights::empty())?;
	cvt(unsafe { libc::fsync(object.require_host_fd()?) })?;
	Ok(())
}

/// Moves the file position.
///
/// Reading the current position (`offset == 0`, whence current) only needs
/// the tell right; everything else needs seek as well.
pub fn fd_seek(fd: Fd, offset: i64, whence: u8) -> Result<Filesize> {
	let whence: Whence = enum_from_raw(whence)?;
	let rights = if offset == 0 && whence == Whence::Current {
		Rights::FD_TELL
	} else {
		Rights::FD_SEEK | Rights::FD_TELL
	};
	let object = current_table().acquire(fd, rights, Rights::empty())?;
	let host_whence = match whence {
		Whence::Set => libc::SEEK_SET,
		Whence::Current => libc::SEEK_CUR,
		Whence::End => libc::SEEK_END,
	};
	cvt_off(unsafe {
		libc::lseek(
			object.require_host_fd()?,
			offset as libc::off_t,
			host_whence,
		)
	})
}

/// Scatter-reads from the current file position.
pub fn fd_read(fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<usize> {
	let object = current_table().acquire(fd, Rights::FD_READ, Rights::empty())?;
	cvt_ssize(unsafe {
		libc::readv(
			object.require_host_fd()?,
			iovs.as_mut_ptr().cast::<libc::iovec>(),
			iovs.len() as libc::c_int,
		)
	})
}

/// Gather-writes at the current file position.
pub fn fd_write(fd: Fd, iovs: &[IoSlice<'_>]) -> Result<usize> {
	let object = current_table().acquire(fd, Rights::FD_WRITE, Rights::empty())?;
	cvt_ssize(unsafe {
		libc::writev(
			object.require_host_fd()?,
			iovs.as_ptr() as *const libc::iovec,
			iovs.len() as libc::c_int,
		)
	})
}

/// Scatter-reads at an explicit offset, leaving the file position alone.
pub fn fd_pread(fd: Fd, iovs: &mut [IoSliceMut<'_>], offset: Filesize) -> Result<usize> {
	if iovs.is_empty() {
		return Err(Errno::Inval);
	}
	let object = current_table().acquire(fd, Rights::FD_READ | Rights::FD_SEEK, Rights::empty())?;
	let host_fd = object.require_host_fd()?;
	#[cfg(any(target_os = "linux", target_os = "freebsd"))]
	{
		cvt_ssize(unsafe {
			libc::preadv(
				host_fd,
				iovs.as_mut_ptr().cast::<libc::iovec>(),
				iovs.len() as libc::c_int,
				offset as libc::off_t,
			)
		})
	}
	#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
	{
		// No positional vectored read on this host: read into one buffer
		// and redistribute the bytes actually read.
		let total: usize = iovs.iter().map(|iov| iov.len()).sum();
		let mut buf = vec![0u8; total];
		let n = cvt_ssize(unsafe {
			libc::pread(
				host_fd,
				buf.as_mut_ptr().cast(),
				buf.len(),
				offset as libc::off_t,
			)
		})?;
		let mut copied = 0;
		for iov in iovs.iter_mut() {
			if copied == n {
				break;
			}
			let take = iov.len().min(n - copied);
			iov[..take].copy_from_slice(&buf[copied..copied + take]);
			copied += take;
		}
		Ok(n)
	}
}

/// Gather-writes at an explicit offset, leaving the file position alone.
pub fn fd_pwrite(fd: Fd, iovs: &[IoSlice<'_>], offset: Filesize) -> Result<usize> {
	if iovs.is_empty() {
		return Err(Errno::Inval);
	}
	let object = current_table().acquire(fd, Rights::FD_WRITE | Rights::FD_SEEK, Rights::empty())?;
	let host_fd = object.require_host_fd()?;
	#[cfg(any(target_os = "linux", target_os = "freebsd"))]
	{
		cvt_ssize(unsafe {
			libc::pwritev(
				host_fd,
				iovs.as_ptr() as *const libc::iovec,
				iovs.len() as libc::c_int,
				offset as libc::off_t,
			)
		})
	}
	#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
	{
		// No positional vectored write on this host: concatenate first.
		let mut buf = Vec::with_capacity(iovs.iter().map(|iov| iov.len()).sum());
		for iov in iovs {
			buf.extend_from_slice(iov);
		}
		cvt_ssize(unsafe {
			libc::pwrite(
				host_fd,
				buf.as_ptr().cast(),
				buf.len(),
				offset as libc::off_t,
			)
		})
	}
}

/// Creates a descriptor that needs no underlying file: currently anonymous
/// shared memory.
pub fn fd_create1(file_type: u8) -> Result<Fd> {
	let file_type: FileType = enum_from_raw(file_type)?;
	strace!("fd_create1({file_type:?})");
	match file_type {
		FileType::SharedMemory => {
			let host_fd = shared_memory_fd()?;
			Ok(current_table().insert(
				Arc::new(FdObject::new(FileType::SharedMemory, host_fd)),
				RIGHTS_SHARED_MEMORY_BASE,
				Rights::empty(),
			))
		}
		_ => Err(Errno::Inval),
	}
}

/// Creates a pair of connected descriptors: a stream or datagram socket
/// pair.
pub fn fd_create2(file_type: u8) -> Result<(Fd, Fd)> {
	let file_type: FileType = enum_from_raw(file_type)?;
	strace!("fd_create2({file_type:?})");
	let sock_type = match file_type {
		FileType::SocketStream => libc::SOCK_STREAM,
		FileType::SocketDgram => libc::SOCK_DGRAM,
		_ => return Err(Errno::Inval),
	};
	let mut sv = [0 as libc::c_int; 2];
	#[cfg(any(target_os = "linux", target_os = "freebsd"))]
	let sock_type = sock_type | libc::SOCK_CLOEXEC;
	cvt(unsafe { libc::socketpair(libc::AF_UNIX, sock_type, 0, sv.as_mut_ptr()) })?;
	#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
	for fd in sv {
		unsafe {
			libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
		}
	}
	Ok(current_table().insert_pair(
		Arc::new(FdObject::new(file_type, sv[0])),
		Arc::new(FdObject::new(file_type, sv[1])),
		RIGHTS_SOCKET_BASE,
		RIGHTS_SOCKET_BASE,
		Rights::empty(),
	))
}

#[cfg(target_os = "linux")]
fn shared_memory_fd() -> Result<libc::c_int> {
	cvt(unsafe { libc::memfd_create(c"capemu-shm".as_ptr(), libc::MFD_CLOEXEC) })
}

#[cfg(not(target_os = "linux"))]
fn shared_memory_fd() -> Result<libc::c_int> {
	// No anonymous shm object on this host: create a named one and unlink
	// it immediately.
	let mut suffix = [0u8; 8];
	crate::entropy::buf(&mut suffix);
	let name = format!("/capemu-{:016x}\0", u64::from_le_bytes(suffix));
	let fd = cvt(unsafe {
		libc::shm_open(
			name.as_ptr().cast(),
			libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
			0o600 as libc::c_uint,
		)
	})?;
	unsafe {
		libc::shm_unlink(name.as_ptr().cast());
	}
	Ok(fd)
}

/// Returns the descriptor's type, status flags and rights pair.
pub fn fd_stat_get(fd: Fd) -> Result<Fdstat> {
	let entry = current_table().stat(fd)?;
	// Status flags come straight from the host, for every descriptor type.
	let fs_flags = match entry.object.host_fd() {
		Some(host_fd) => host_to_fdflags(cvt(unsafe { libc::fcntl(host_fd, libc::F_GETFL) })?),
		None => FdFlags::empty(),
	};
	Ok(Fdstat {
		fs_filetype: entry.object.file_type(),
		fs_flags,
		fs_rights_base: entry.base,
		fs_rights_inheriting: entry.inheriting,
	})
}

/// Stores descriptor status flags or narrows the rights pair, depending on
/// `flags`.
pub fn fd_stat_put(fd: Fd, stat: &Fdstat, flags: u16) -> Result<()> {
	let flags: FdstatPut = flags_from_raw(flags)?;
	if flags == FdstatPut::FLAGS {
		let host_flags = fdflags_to_host(stat.fs_flags)?;
		let object = current_table().acquire(fd, Rights::FD_STAT_PUT_FLAGS, Rights::empty())?;
		cvt(unsafe { libc::fcntl(object.require_host_fd()?, libc::F_SETFL, host_flags) })?;
		Ok(())
	} else if flags == FdstatPut::RIGHTS {
		current_table().restrict_rights(fd, stat.fs_rights_base, stat.fs_rights_inheriting)
	} else {
		Err(Errno::Inval)
	}
}

/// Maps guest descriptor flags onto host `O_*` flags.
pub(crate) fn fdflags_to_host(flags: FdFlags) -> Result<libc::c_int> {
	let mut host = 0;
	if flags.contains(FdFlags::APPEND) {
		host |= libc::O_APPEND;
	}
	if flags.contains(FdFlags::DSYNC) {
		host |= libc::O_DSYNC;
	}
	if flags.contains(FdFlags::NONBLOCK) {
		host |= libc::O_NONBLOCK;
	}
	if flags.contains(FdFlags::RSYNC) {
		#[cfg(target_os = "linux")]
		{
			host |= libc::O_RSYNC;
		}
		#[cfg(not(target_os = "linux"))]
		return Err(Errno::Inval);
	}
	if flags.contains(FdFlags::SYNC) {
		host |= libc::O_SYNC;
	}
	Ok(host)
}

pub(crate) fn host_to_fdflags(host: libc::c_int) -> FdFlags {
	let mut flags = FdFlags::empty();
	if host & libc::O_APPEND != 0 {
		flags |= FdFlags::APPEND;
	}
	if host & libc::O_DSYNC != 0 {
		flags |= FdFlags::DSYNC;
	}
	if host & libc::O_NONBLOCK != 0 {
		flags |= FdFlags::NONBLOCK;
	}
	if (host & libc::O_SYNC) == libc::O_SYNC {
		flags |= FdFlags::SYNC;
	}
	flags
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::fd::FdTable;
	use crate::thread::install;

	fn fresh_process() -> Arc<FdTable> {
		let table = Arc::new(FdTable::new());
		install(Arc::clone(&table), 1);
		table
	}

	#[test]
	fn pread_rejects_empty_iovec_lists() {
		fresh_process();
		assert_eq!(fd_pread(0, &mut [], 0).err(), Some(Errno::Inval));
		assert_eq!(fd_pwrite(0, &[], 0).err(), Some(Errno::Inval));
	}

	#[test]
	fn socket_pairs_transport_data() {
		fresh_process();
		let (a, b) = fd_create2(FileType::SocketStream as u8).unwrap();
		assert_ne!(a, b);
		let written = fd_write(a, &[IoSlice::new(b"ping")]).unwrap();
		assert_eq!(written, 4);
		let mut buf = [0u8; 8];
		let read = fd_read(b, &mut [IoSliceMut::new(&mut buf)]).unwrap();
		assert_eq!(&buf[..read], b"ping");
	}

	#[test]
	fn shared_memory_objects_can_be_created() {
		fresh_process();
		let fd = fd_create1(FileType::SharedMemory as u8).unwrap();
		let stat = fd_stat_get(fd).unwrap();
		assert_eq!(stat.fs_filetype, FileType::SharedMemory);
		assert!(stat.fs_rights_base.contains(Rights::MEM_MAP));
		fd_close(fd).unwrap();
	}

	#[test]
	fn create_with_unknown_types_is_invalid() {
		fresh_process();
		assert_eq!(fd_create1(FileType::RegularFile as u8).err(), Some(Errno::Inval));
		assert_eq!(fd_create2(200).err(), Some(Errno::Inval));
	}

	#[test]
	fn seek_with_zero_current_only_needs_tell() {
		let table = fresh_process();
		let file = tempfile::tempfile().unwrap();
		use std::os::unix::io::IntoRawFd;
		let guest_fd = crate::fd::import(&table, file.into_raw_fd()).unwrap();
		table
			.restrict_rights(guest_fd, Rights::FD_TELL, Rights::empty())
			.unwrap();
		// Telling is allowed with only the tell right...
		assert_eq!(fd_seek(guest_fd, 0, Whence::Current as u8).unwrap(), 0);
		// ...but actual repositioning is not.
		assert_eq!(
			fd_seek(guest_fd, 1, Whence::Set as u8).err(),
			Some(Errno::Notcapable)
		);
	}

	#[test]
	fn stat_put_narrows_rights_but_never_widens() {
		let table = fresh_process();
		let file = tempfile::tempfile().unwrap();
		use std::os::unix::io::IntoRawFd;
		let guest_fd = crate::fd::import(&table, file.into_raw_fd()).unwrap();

		let mut stat = fd_stat_get(guest_fd).unwrap();
		stat.fs_rights_base = Rights::FD_READ;
		stat.fs_rights_inheriting = Rights::empty();
		fd_stat_put(guest_fd, &stat, FdstatPut::RIGHTS.bits()).unwrap();

		stat.fs_rights_base = Rights::FD_READ | Rights::FD_WRITE;
		assert_eq!(
			fd_stat_put(guest_fd, &stat, FdstatPut::RIGHTS.bits()).err(),
			Some(Errno::Notcapable)
		);
	}

	#[test]
	fn pread_leaves_the_file_position_alone() {
		let table = fresh_process();
		let mut file = tempfile::tempfile().unwrap();
		use std::io::Write;
		use std::os::unix::io::IntoRawFd;
		file.write_all(b"abcdefgh").unwrap();
		let guest_fd = crate::fd::import(&table, file.into_raw_fd()).unwrap();

		let mut first = [0u8; 2];
		let mut second = [0u8; 2];
		let n = fd_pread(
			guest_fd,
			&mut [IoSliceMut::new(&mut first), IoSliceMut::new(&mut second)],
			2,
		)
		.unwrap();
		assert_eq!(n, 4);
		assert_eq!(&first, b"cd");
		assert_eq!(&second, b"ef");
		assert_eq!(fd_seek(guest_fd, 0, Whence::Current as u8).unwrap(), 0);
	}
}
