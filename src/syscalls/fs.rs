//! Syscalls operating on files by path, plus the descriptor-based file
//! maintenance calls.
//!
//! Every path-taking entry obtains a path-access lease from the confined
//! resolver with the rights and final-component policy appropriate to the
//! operation, performs the host call relative to the leased directory, and
//! translates errors through the canonical table followed by the
//! per-operation fix-ups. The fix-ups are a stable contract.

use core::mem;
use std::sync::Arc;

use crate::abi::{
	enum_from_raw, flags_from_raw, Advice, Dircookie, Dirent, Fd, Fdstat, FileType, Filesize,
	Filestat, FsFlags, LookupFlags, OFlags, Rights, Timestamp, UlFlags, DIRCOOKIE_START,
};
use crate::errno::{cvt, last_host, Errno, Result};
use crate::fd::FdObject;
use crate::path::{self, PathLease};
use crate::thread::current_table;
use crate::time;

use super::descriptor::fdflags_to_host;

/// Opens a file beneath a directory descriptor.
///
/// The requested rights pair decides the host access mode; the directory
/// must hold `FILE_OPEN` (plus `FILE_CREATE_FILE` when creating) in its
/// base set and the requested rights in its inheriting set.
pub fn file_open(
	dirfd: Fd,
	dirflags: u32,
	path: &[u8],
	oflags: u16,
	fdstat: &Fdstat,
) -> Result<Fd> {
	let dirflags: LookupFlags = flags_from_raw(dirflags)?;
	let oflags: OFlags = flags_from_raw(oflags)?;
	strace!("file_open({dirfd}, {oflags:?})");

	let requested_base = fdstat.fs_rights_base;
	let requested_inheriting = fdstat.fs_rights_inheriting;

	// Which host access mode the requested rights call for.
	let wants_read = requested_base
		.intersects(Rights::FD_READ | Rights::FILE_READDIR | Rights::MEM_MAP);
	let wants_write = requested_base.intersects(
		Rights::FD_DATASYNC | Rights::FD_WRITE | Rights::FILE_ALLOCATE,
	);
	let mut host_flags = libc::O_CLOEXEC
		| if wants_write {
			if wants_read {
				libc::O_RDWR
			} else {
				libc::O_WRONLY
			}
		} else {
			libc::O_RDONLY
		};

	let mut needed_base = Rights::FILE_OPEN;
	if oflags.contains(OFlags::CREAT) {
		host_flags |= libc::O_CREAT;
		needed_base |= Rights::FILE_CREATE_FILE;
	}
	if oflags.contains(OFlags::DIRECTORY) {
		host_flags |= libc::O_DIRECTORY;
	}
	if oflags.contains(OFlags::EXCL) {
		host_flags |= libc::O_EXCL;
	}
	if oflags.contains(OFlags::TRUNC) {
		host_flags |= libc::O_TRUNC;
	}
	host_flags |= fdflags_to_host(fdstat.fs_flags)?;

	let follow = dirflags.contains(LookupFlags::SYMLINK_FOLLOW);
	let lease = path::resolve(
		&current_table(),
		dirfd,
		path,
		needed_base,
		requested_base | requested_inheriting,
		follow,
		oflags.contains(OFlags::CREAT),
	)?;
	if !lease.follow() {
		host_flags |= libc::O_NOFOLLOW;
	}

	let host_fd = match cvt(unsafe {
		libc::openat(
			lease.host_dirfd(),
			lease.leaf().as_ptr(),
			host_flags,
			0o666 as libc::c_uint,
		)
	}) {
		Ok(host_fd) => host_fd,
		Err(Errno::Nxio) => {
			// Sockets cannot be opened by path; tell them apart from
			// genuinely defunct device nodes.
			let mut st: libc::stat = unsafe { mem::zeroed() };
			let ret = unsafe {
				libc::fstatat(
					lease.host_dirfd(),
					lease.leaf().as_ptr(),
					&mut st,
					libc::AT_SYMLINK_NOFOLLOW,
				)
			};
			if ret == 0 && (st.st_mode & libc::S_IFMT) == libc::S_IFSOCK {
				return Err(Errno::Notsup);
			}
			return Err(Errno::Nxio);
		}
		// Hosts that report a refused symlink as "too many links".
		Err(Errno::Mlink) => return Err(Errno::Loop),
		Err(err) => return Err(err),
	};
	drop(lease);

	// The object's actual type caps the rights the new entry stores.
	let (file_type, max_base, max_inheriting) = match FdObject::probe(host_fd) {
		Ok(probe) => probe,
		Err(err) => {
			unsafe {
				libc::close(host_fd);
			}
			return Err(err);
		}
	};
	Ok(current_table().insert(
		Arc::new(FdObject::new(file_type, host_fd)),
		requested_base & max_base,
		requested_inheriting & max_inheriting,
	))
}

/// Creates a directory beneath a directory descriptor. Other file types
/// cannot be created by path.
pub fn file_create(dirfd: Fd, path: &[u8], file_type: u8) -> Result<()> {
	let file_type: FileType = enum_from_raw(file_type)?;
	strace!("file_create({dirfd}, {file_type:?})");
	match file_type {
		FileType::Directory => {
			let lease = path::resolve(
				&current_table(),
				dirfd,
				path,
				Rights::FILE_CREATE_DIRECTORY,
				Rights::empty(),
				false,
				true,
			)?;
			cvt(unsafe {
				libc::mkdirat(lease.host_dirfd(), lease.leaf().as_ptr(), 0o777)
			})?;
			Ok(())
		}
		_ => Err(Errno::Inval),
	}
}

/// Creates a hard link.
///
/// Hosts that refuse hard links to symlinks get the link re-expressed as a
/// fresh symlink with the same target at the destination.
pub fn file_link(
	source_dirfd: Fd,
	source_dirflags: u32,
	source_path: &[u8],
	target_dirfd: Fd,
	target_path: &[u8],
) -> Result<()> {
	let dirflags: LookupFlags = flags_from_raw(source_dirflags)?;
	let follow = dirflags.contains(LookupFlags::SYMLINK_FOLLOW);
	let table = current_table();
	let source = path::resolve(
		&table,
		source_dirfd,
		source_path,
		Rights::FILE_LINK_SOURCE,
		Rights::empty(),
		follow,
		false,
	)?;
	let target = path::resolve(
		&table,
		target_dirfd,
		target_path,
		Rights::FILE_LINK_TARGET,
		Rights::empty(),
		false,
		true,
	)?;

	let host_flags = if follow { libc::AT_SYMLINK_FOLLOW } else { 0 };
	match cvt(unsafe {
		libc::linkat(
			source.host_dirfd(),
			source.leaf().as_ptr(),
			target.host_dirfd(),
			target.leaf().as_ptr(),
			host_flags,
		)
	}) {
		Ok(_) => Ok(()),
		Err(err @ (Errno::Perm | Errno::Notsup | Errno::Xdev)) if !follow => {
			// Only worth retrying when the source really is a symlink.
			let mut st: libc::stat = unsafe { mem::zeroed() };
			let ret = unsafe {
				libc::fstatat(
					source.host_dirfd(),
					source.leaf().as_ptr(),
					&mut st,
					libc::AT_SYMLINK_NOFOLLOW,
				)
			};
			if ret != 0 || (st.st_mode & libc::S_IFMT) != libc::S_IFLNK {
				return Err(err);
			}
			let contents = read_link_contents(&source)?;
			cvt(unsafe {
				libc::symlinkat(
					contents.as_ptr().cast(),
					target.host_dirfd(),
					target.leaf().as_ptr(),
				)
			})?;
			Ok(())
		}
		Err(err) => Err(err),
	}
}

/// Removes a file or, with the removedir flag, an empty directory.
pub fn file_unlink(dirfd: Fd, path: &[u8], flags: u8) -> Result<()> {
	let flags: UlFlags = flags_from_raw(flags)?;
	let lease = path::resolve(
		&current_table(),
		dirfd,
		path,
		Rights::FILE_UNLINK,
		Rights::empty(),
		false,
		true,
	)?;
	let host_flags = if flags.contains(UlFlags::REMOVEDIR) {
		libc::AT_REMOVEDIR
	} else {
		0
	};
	match cvt(unsafe { libc::unlinkat(lease.host_dirfd(), lease.leaf().as_ptr(), host_flags) }) {
		Ok(_) => Ok(()),
		// Hosts that report unlinking a directory as EISDIR.
		Err(Errno::Isdir) => Err(Errno::Perm),
		Err(err) => Err(err),
	}
}

/// Renames a file across two directory descriptors.
pub fn file_rename(
	source_dirfd: Fd,
	source_path: &[u8],
	target_dirfd: Fd,
	target_path: &[u8],
) -> Result<()> {
	let table = current_table();
	let source = path::resolve(
		&table,
		source_dirfd,
		source_path,
		Rights::FILE_RENAME_SOURCE,
		Rights::empty(),
		false,
		true,
	)?;
	let target = path::resolve(
		&table,
		target_dirfd,
		target_path,
		Rights::FILE_RENAME_TARGET,
		Rights::empty(),
		false,
		true,
	)?;
	match cvt(unsafe {
		libc::renameat(
			source.host_dirfd(),
			source.leaf().as_ptr(),
			target.host_dirfd(),
			target.leaf().as_ptr(),
		)
	}) {
		Ok(_) => Ok(()),
		// Hosts that report impossible renames as "resource busy".
		Err(Errno::Busy) => Err(Errno::Inval),
		Err(err) => Err(err),
	}
}

/// Creates a symbolic link with the given contents.
pub fn file_symlink(contents: &[u8], dirfd: Fd, path: &[u8]) -> Result<()> {
	let contents = path::null_terminate(contents)?;
	let lease = path::resolve(
		&current_table(),
		dirfd,
		path,
		Rights::FILE_SYMLINK,
		Rights::empty(),
		false,
		true,
	)?;
	cvt(unsafe {
		libc::symlinkat(contents.as_ptr(), lease.host_dirfd(), lease.leaf().as_ptr())
	})?;
	Ok(())
}

/// Reads the contents of a symbolic link into `buf`, truncating silently.
pub fn file_readlink(dirfd: Fd, path: &[u8], buf: &mut [u8]) -> Result<usize> {
	let lease = path::resolve(
		&current_table(),
		dirfd,
		path,
		Rights::FILE_READLINK,
		Rights::empty(),
		false,
		false,
	)?;
	let n = unsafe {
		libc::readlinkat(
			lease.host_dirfd(),
			lease.leaf().as_ptr(),
			buf.as_mut_ptr().cast::<libc::c_char>(),
			buf.len(),
		)
	};
	if n < 0 {
		return Err(last_host());
	}
	Ok(n as usize)
}

/// Returns the attributes of the file a path names.
pub fn file_stat_get(dirfd: Fd, dirflags: u32, path: &[u8]) -> Result<Filestat> {
	let dirflags: LookupFlags = flags_from_raw(dirflags)?;
	let lease = path::resolve(
		&current_table(),
		dirfd,
		path,
		Rights::FILE_STAT_GET,
		Rights::empty(),
		dirflags.contains(LookupFlags::SYMLINK_FOLLOW),
		false,
	)?;
	let mut st: libc::stat = unsafe { mem::zeroed() };
	let host_flags = if lease.follow() {
		0
	} else {
		libc::AT_SYMLINK_NOFOLLOW
	};
	cvt(unsafe {
		libc::fstatat(lease.host_dirfd(), lease.leaf().as_ptr(), &mut st, host_flags)
	})?;
	Ok(convert_stat(&st))
}

/// Adjusts the timestamps of the file a path names.
pub fn file_stat_put(
	dirfd: Fd,
	dirflags: u32,
	path: &[u8],
	stat: &Filestat,
	fsflags: u16,
) -> Result<()> {
	let dirflags: LookupFlags = flags_from_raw(dirflags)?;
	let fsflags: FsFlags = flags_from_raw(fsflags)?;
	if fsflags.contains(FsFlags::ATIM | FsFlags::ATIM_NOW)
		|| fsflags.contains(FsFlags::MTIM | FsFlags::MTIM_NOW)
	{
		return Err(Errno::Inval);
	}
	let times = [
		pick_timespec(fsflags, FsFlags::ATIM, FsFlags::ATIM_NOW, stat.st_atim),
		pick_timespec(fsflags, FsFlags::MTIM, FsFlags::MTIM_NOW, stat.st_mtim),
	];
	let lease = path::resolve(
		&current_table(),
		dirfd,
		path,
		Rights::FILE_STAT_PUT_TIMES,
		Rights::empty(),
		dirflags.contains(LookupFlags::SYMLINK_FOLLOW),
		false,
	)?;
	let host_flags = if lease.follow() {
		0
	} else {
		libc::AT_SYMLINK_NOFOLLOW
	};
	cvt(unsafe {
		libc::utimensat(
			lease.host_dirfd(),
			lease.leaf().as_ptr(),
			times.as_ptr(),
			host_flags,
		)
	})?;
	Ok(())
}

/// Reads directory entries into the guest's buffer.
///
/// The host descriptor is promoted to a directory stream on first use,
/// which transfers close responsibility to the stream. Entries are
/// serialised as a 24-byte header followed by the name; the last entry is
/// truncated rather than dropped when the buffer fills up. A host error
/// after at least one serialised entry is deferred to the next call.
pub fn file_readdir(fd: Fd, buf: &mut [u8], cookie: Dircookie) -> Result<usize> {
	let object = current_table().acquire(fd, Rights::FILE_READDIR, Rights::empty())?;
	let state = object.dir_state()?;
	let mut state = state.lock();

	if state.stream.is_none() {
		state.stream = Some(crate::fd::DirStream::open(object.require_host_fd()?)?);
		state.cookie = DIRCOOKIE_START;
	}
	let dirp = state.stream.as_ref().unwrap().as_ptr();

	if state.cookie != cookie {
		if cookie == DIRCOOKIE_START {
			unsafe { libc::rewinddir(dirp) };
		} else {
			unsafe { libc::seekdir(dirp, cookie as libc::c_long) };
		}
		state.cookie = cookie;
	}

	let mut used = 0usize;
	while used < buf.len() {
		errno_clear();
		let entry = unsafe { libc::readdir(dirp) };
		if entry.is_null() {
			let err = std::io::Error::last_os_error()
				.raw_os_error()
				.unwrap_or(0);
			if err != 0 && used == 0 {
				return Err(Errno::from_host(err));
			}
			// End of directory, or an error deferred to the next call.
			break;
		}
		let entry = unsafe { &*entry };
		let name = unsafe { core::ffi::CStr::from_ptr(entry.d_name.as_ptr()) }.to_bytes();
		state.cookie = unsafe { libc::telldir(dirp) } as Dircookie;
		// The guest ABI has no use for the dot entries.
		if name == b"." || name == b".." {
			continue;
		}
		let header = Dirent {
			d_next: state.cookie,
			d_ino: entry.d_ino as u64,
			d_namlen: name.len() as u32,
			d_type: dirent_file_type(entry.d_type),
		}
		.to_wire();
		used += copy_truncated(&mut buf[used..], &header);
		if used == buf.len() {
			break;
		}
		used += copy_truncated(&mut buf[used..], name);
	}
	Ok(used)
}

/// Advises the host about the access pattern of a file region.
pub fn file_advise(fd: Fd, offset: Filesize, len: Filesize, advice: u8) -> Result<()> {
	let advice: Advice = enum_from_raw(advice)?;
	let object = current_table().acquire(fd, Rights::FILE_ADVISE, Rights::empty())?;
	let host_fd = object.require_host_fd()?;
	#[cfg(any(target_os = "linux", target_os = "freebsd"))]
	{
		let host_advice = match advice {
			Advice::Normal => libc::POSIX_FADV_NORMAL,
			Advice::Random => libc::POSIX_FADV_RANDOM,
			Advice::Sequential => libc::POSIX_FADV_SEQUENTIAL,
			Advice::WillNeed => libc::POSIX_FADV_WILLNEED,
			Advice::DontNeed => libc::POSIX_FADV_DONTNEED,
			Advice::NoReuse => libc::POSIX_FADV_NOREUSE,
		};
		let err = unsafe {
			libc::posix_fadvise(host_fd, offset as libc::off_t, len as libc::off_t, host_advice)
		};
		if err != 0 {
			return Err(Errno::from_host(err));
		}
	}
	#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
	{
		// Advice is a hint; hosts without posix_fadvise just validated it.
		let _ = (host_fd, advice);
	}
	Ok(())
}

/// Ensures storage is allocated for a file region.
pub fn file_allocate(fd: Fd, offset: Filesize, len: Filesize) -> Result<()> {
	let object = current_table().acquire(fd, Rights::FILE_ALLOCATE, Rights::empty())?;
	let host_fd = object.require_host_fd()?;
	offset.checked_add(len).ok_or(Errno::Fbig)?;
	#[cfg(any(target_os = "linux", target_os = "freebsd"))]
	{
		let err = unsafe {
			libc::posix_fallocate(host_fd, offset as libc::off_t, len as libc::off_t)
		};
		if err != 0 {
			return Err(Errno::from_host(err));
		}
	}
	#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
	{
		// Emulated: growing the file is the observable part.
		let end = offset + len;
		let mut st: libc::stat = unsafe { mem::zeroed() };
		cvt(unsafe { libc::fstat(host_fd, &mut st) })?;
		if (st.st_size as u64) < end {
			cvt(unsafe { libc::ftruncate(host_fd, end as libc::off_t) })?;
		}
	}
	Ok(())
}

/// Reads a symlink's contents through a lease, for the hard-link fallback.
fn read_link_contents(lease: &PathLease) -> Result<std::ffi::CString> {
	let mut buf = vec![0u8; 256];
	loop {
		let n = unsafe {
			libc::readlinkat(
				lease.host_dirfd(),
				lease.leaf().as_ptr(),
				buf.as_mut_ptr().cast::<libc::c_char>(),
				buf.len(),
			)
		};
		if n < 0 {
			return Err(last_host());
		}
		let n = n as usize;
		if n < buf.len() {
			buf.truncate(n);
			return path::null_terminate(&buf);
		}
		buf.resize(buf.len() * 2, 0);
	}
}

fn pick_timespec(
	fsflags: FsFlags,
	set: FsFlags,
	set_now: FsFlags,
	value: Timestamp,
) -> libc::timespec {
	if fsflags.contains(set) {
		time::timestamp_to_timespec(value)
	} else if fsflags.contains(set_now) {
		libc::timespec {
			tv_sec: 0,
			tv_nsec: libc::UTIME_NOW,
		}
	} else {
		libc::timespec {
			tv_sec: 0,
			tv_nsec: libc::UTIME_OMIT,
		}
	}
}

/// Converts a host stat record into the guest representation.
pub(crate) fn convert_stat(st: &libc::stat) -> Filestat {
	let st_filetype = match st.st_mode & libc::S_IFMT {
		libc::S_IFBLK => FileType::BlockDevice,
		libc::S_IFCHR => FileType::CharacterDevice,
		libc::S_IFDIR => FileType::Directory,
		libc::S_IFIFO | libc::S_IFSOCK => FileType::SocketStream,
		libc::S_IFREG => FileType::RegularFile,
		libc::S_IFLNK => FileType::SymbolicLink,
		_ => FileType::Unknown,
	};
	Filestat {
		st_dev: st.st_dev as u64,
		st_ino: st.st_ino as u64,
		st_filetype,
		st_nlink: st.st_nlink as u32,
		st_size: st.st_size as u64,
		st_atim: time::timespec_to_timestamp(libc::timespec {
			tv_sec: st.st_atime,
			tv_nsec: st.st_atime_nsec,
		}),
		st_mtim: time::timespec_to_timestamp(libc::timespec {
			tv_sec: st.st_mtime,
			tv_nsec: st.st_mtime_nsec,
		}),
		st_ctim: time::timespec_to_timestamp(libc::timespec {
			tv_sec: st.st_ctime,
			tv_nsec: st.st_ctime_nsec,
		}),
	}
}

fn dirent_file_type(d_type: u8) -> FileType {
	match d_type {
		libc::DT_BLK => FileType::BlockDevice,
		libc::DT_CHR => FileType::CharacterDevice,
		libc::DT_DIR => FileType::Directory,
		libc::DT_FIFO | libc::DT_SOCK => FileType::SocketStream,
		libc::DT_REG => FileType::RegularFile,
		libc::DT_LNK => FileType::SymbolicLink,
		_ => FileType::Unknown,
	}
}

/// Copies as much of `src` as fits, returning the number of bytes copied.
fn copy_truncated(dst: &mut [u8], src: &[u8]) -> usize {
	let n = dst.len().min(src.len());
	dst[..n].copy_from_slice(&src[..n]);
	n
}

/// readdir distinguishes end-of-stream from failure only via errno.
fn errno_clear() {
	#[cfg(target_os = "linux")]
	unsafe {
		*libc::__errno_location() = 0;
	}
	#[cfg(any(target_os = "macos", target_os = "freebsd"))]
	unsafe {
		*libc::__error() = 0;
	}
}

#[cfg(test)]
mod tests {
	use std::fs;
	use std::sync::Arc;

	use super::*;
	use crate::fd::FdTable;
	use crate::thread::install;

	const BASE: Fd = 3;

	fn sandbox() -> (tempfile::TempDir, Arc<FdTable>) {
		let tmp = tempfile::tempdir().unwrap();
		let table = Arc::new(FdTable::new());
		install(Arc::clone(&table), 1);
		let c = std::ffi::CString::new(tmp.path().as_os_str().as_encoded_bytes()).unwrap();
		let fd = unsafe { libc::open(c.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
		assert!(fd >= 0);
		let (file_type, base, inheriting) = FdObject::probe(fd).unwrap();
		table.insert_at(BASE, Arc::new(FdObject::new(file_type, fd)), base, inheriting);
		(tmp, table)
	}

	fn read_fdstat(rights: Rights) -> Fdstat {
		Fdstat {
			fs_filetype: FileType::Unknown,
			fs_flags: crate::abi::FdFlags::empty(),
			fs_rights_base: rights,
			fs_rights_inheriting: Rights::empty(),
		}
	}

	#[test]
	fn open_read_write_roundtrip() {
		let (_tmp, _table) = sandbox();
		let fd = file_open(
			BASE,
			0,
			b"data.txt",
			(OFlags::CREAT | OFlags::EXCL).bits(),
			&read_fdstat(Rights::FD_READ | Rights::FD_WRITE | Rights::FD_SEEK | Rights::FD_TELL),
		)
		.unwrap();
		let written =
			super::super::descriptor::fd_write(fd, &[std::io::IoSlice::new(b"hello")]).unwrap();
		assert_eq!(written, 5);
		super::super::descriptor::fd_seek(fd, 0, crate::abi::Whence::Set as u8).unwrap();
		let mut buf = [0u8; 16];
		let read =
			super::super::descriptor::fd_read(fd, &mut [std::io::IoSliceMut::new(&mut buf)])
				.unwrap();
		assert_eq!(&buf[..read], b"hello");
		super::super::descriptor::fd_close(fd).unwrap();
	}

	#[test]
	fn open_strips_rights_to_the_file_type() {
		let (tmp, _table) = sandbox();
		fs::write(tmp.path().join("f"), b"x").unwrap();
		let fd = file_open(
			BASE,
			0,
			b"f",
			0,
			&read_fdstat(Rights::FD_READ | Rights::SOCK_SHUTDOWN),
		)
		.unwrap();
		let stat = super::super::descriptor::fd_stat_get(fd).unwrap();
		assert!(stat.fs_rights_base.contains(Rights::FD_READ));
		// A regular file can never carry socket rights.
		assert!(!stat.fs_rights_base.contains(Rights::SOCK_SHUTDOWN));
	}

	#[test]
	fn create_and_remove_a_directory_is_an_identity() {
		let (tmp, _table) = sandbox();
		let before = fs::read_dir(tmp.path()).unwrap().count();
		file_create(BASE, b"d", FileType::Directory as u8).unwrap();
		assert!(tmp.path().join("d").is_dir());
		file_unlink(BASE, b"d", UlFlags::REMOVEDIR.bits()).unwrap();
		let after = fs::read_dir(tmp.path()).unwrap().count();
		assert_eq!(before, after);
		assert!(!tmp.path().join("d").exists());
	}

	#[test]
	fn unlinking_a_directory_without_the_flag_is_perm() {
		let (_tmp, _table) = sandbox();
		file_create(BASE, b"d", FileType::Directory as u8).unwrap();
		assert_eq!(file_unlink(BASE, b"d", 0).err(), Some(Errno::Perm));
	}

	#[test]
	fn rename_and_stat() {
		let (tmp, _table) = sandbox();
		fs::write(tmp.path().join("old"), b"abc").unwrap();
		file_rename(BASE, b"old", BASE, b"new").unwrap();
		assert!(!tmp.path().join("old").exists());
		let stat = file_stat_get(BASE, 0, b"new").unwrap();
		assert_eq!(stat.st_filetype, FileType::RegularFile);
		assert_eq!(stat.st_size, 3);
	}

	#[test]
	fn symlink_and_readlink_roundtrip() {
		let (_tmp, _table) = sandbox();
		file_symlink(b"the/target", BASE, b"link").unwrap();
		let mut buf = [0u8; 32];
		let n = file_readlink(BASE, b"link", &mut buf).unwrap();
		assert_eq!(&buf[..n], b"the/target");

		// Without following, stat sees the link itself.
		let stat = file_stat_get(BASE, 0, b"link").unwrap();
		assert_eq!(stat.st_filetype, FileType::SymbolicLink);
	}

	#[test]
	fn stat_put_times_are_observable() {
		let (tmp, _table) = sandbox();
		fs::write(tmp.path().join("f"), b"x").unwrap();
		let stat = Filestat {
			st_dev: 0,
			st_ino: 0,
			st_filetype: FileType::RegularFile,
			st_nlink: 1,
			st_size: 0,
			st_atim: 1_000_000_000,
			st_mtim: 5_000_000_000,
			st_ctim: 0,
		};
		file_stat_put(
			BASE,
			0,
			b"f",
			&stat,
			(FsFlags::ATIM | FsFlags::MTIM).bits(),
		)
		.unwrap();
		let read_back = file_stat_get(BASE, 0, b"f").unwrap();
		assert_eq!(read_back.st_mtim, 5_000_000_000);
	}

	#[test]
	fn conflicting_time_flags_are_invalid() {
		let (_tmp, _table) = sandbox();
		let stat = Filestat {
			st_dev: 0,
			st_ino: 0,
			st_filetype: FileType::RegularFile,
			st_nlink: 0,
			st_size: 0,
			st_atim: 0,
			st_mtim: 0,
			st_ctim: 0,
		};
		assert_eq!(
			file_stat_put(
				BASE,
				0,
				b"f",
				&stat,
				(FsFlags::ATIM | FsFlags::ATIM_NOW).bits(),
			)
			.err(),
			Some(Errno::Inval)
		);
	}

	#[test]
	fn readdir_paginates_with_cookies() {
		let (tmp, _table) = sandbox();
		for i in 0..10 {
			fs::write(tmp.path().join(format!("file{i:04}")), b"").unwrap();
		}
		// Reopen the directory with readdir rights through the table.
		let fd = file_open(
			BASE,
			0,
			b".",
			OFlags::DIRECTORY.bits(),
			&read_fdstat(Rights::FILE_READDIR),
		)
		.unwrap();

		// Each serialised entry is 24 + 8 bytes; exactly four fit.
		let mut buf = [0u8; 128];
		let used = file_readdir(fd, &mut buf, DIRCOOKIE_START).unwrap();
		assert_eq!(used, 128);

		let mut names = Vec::new();
		let mut last_cookie = DIRCOOKIE_START;
		let mut parsed = 0;
		while parsed < used {
			let header: [u8; 24] = buf[parsed..parsed + 24].try_into().unwrap();
			last_cookie = u64::from_le_bytes(header[0..8].try_into().unwrap());
			let namlen = u32::from_le_bytes(header[16..20].try_into().unwrap()) as usize;
			names.push(buf[parsed + 24..parsed + 24 + namlen].to_vec());
			parsed += 24 + namlen;
		}
		assert_eq!(names.len(), 4);

		// The rest arrives on the second call.
		let mut buf2 = [0u8; 1024];
		let used2 = file_readdir(fd, &mut buf2, last_cookie).unwrap();
		let mut parsed = 0;
		while parsed < used2 {
			let header: [u8; 24] = buf2[parsed..parsed + 24].try_into().unwrap();
			let namlen = u32::from_le_bytes(header[16..20].try_into().unwrap()) as usize;
			names.push(buf2[parsed + 24..parsed + 24 + namlen].to_vec());
			parsed += 24 + namlen;
		}
		assert_eq!(names.len(), 10);
		names.sort();
		names.dedup();
		assert_eq!(names.len(), 10);
	}

	#[test]
	fn readdir_truncates_an_entry_that_does_not_fit() {
		let (tmp, _table) = sandbox();
		fs::write(tmp.path().join("averylongfilename"), b"").unwrap();
		let fd = file_open(
			BASE,
			0,
			b".",
			OFlags::DIRECTORY.bits(),
			&read_fdstat(Rights::FILE_READDIR),
		)
		.unwrap();
		let mut buf = [0u8; 16];
		let used = file_readdir(fd, &mut buf, DIRCOOKIE_START).unwrap();
		// The first entry does not fit completely; the buffer is filled
		// with its truncated header.
		assert_eq!(used, 16);
	}

	#[test]
	fn advise_and_allocate() {
		let (tmp, _table) = sandbox();
		fs::write(tmp.path().join("f"), b"").unwrap();
		let fd = file_open(
			BASE,
			0,
			b"f",
			0,
			&read_fdstat(
				Rights::FD_READ | Rights::FD_WRITE | Rights::FILE_ADVISE | Rights::FILE_ALLOCATE,
			),
		)
		.unwrap();
		file_advise(fd, 0, 4096, Advice::Sequential as u8).unwrap();
		file_allocate(fd, 0, 4096).unwrap();
		let stat = file_stat_get(BASE, 0, b"f").unwrap();
		assert_eq!(stat.st_size, 4096);
		assert_eq!(file_advise(fd, 0, 0, 42).err(), Some(Errno::Inval));
	}
}
