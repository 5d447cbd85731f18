//! Confined path resolution.
//!
//! The host kernels we run on have no "openat confined to this directory"
//! primitive that also yields a `(dirfd, leaf)` pair usable for create,
//! rename and unlink operations, so confinement is emulated in user space:
//! the path is walked one component at a time with `O_NOFOLLOW`, symlinks
//! are expanded by hand onto a bounded stack, and `..` never climbs past
//! the directory the resolution started from. Shortcuts through `realpath`
//! or lexical normalisation would be vulnerable to TOCTOU games with
//! symlinks; the walk is the only correct approach.

use std::ffi::{CStr, CString};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::abi::{Fd, FileType, Rights};
use crate::errno::{cvt, last_host, Errno, Result};
use crate::fd::{FdObject, FdTable};

/// Hard cap on symlink expansions across one resolution.
const MAX_SYMLINK_EXPANSIONS: usize = 128;
/// Bound of the directory-descriptor stack.
const MAX_DIR_DEPTH: usize = 128;
/// Bound of the pending-path stack.
const MAX_PATH_DEPTH: usize = 32;

/// Copies guest path bytes into a null-terminated string.
///
/// Interior NUL bytes are *invalid-argument*: the guest cannot smuggle a
/// shorter path past the rights checks.
pub(crate) fn null_terminate(bytes: &[u8]) -> Result<CString> {
	CString::new(bytes).map_err(|_| Errno::Inval)
}

/// The transient result of a resolution, owned by the caller for the
/// duration of one path-using syscall.
///
/// The leaf is a single pathname component, `"."` when the path named the
/// directory itself, with at most a trailing `/` marking must-be-directory.
pub struct PathLease {
	dir: Arc<FdObject>,
	host_dirfd: RawFd,
	owned: bool,
	leaf: CString,
	follow: bool,
}

impl PathLease {
	/// The host directory descriptor the leaf is relative to.
	pub fn host_dirfd(&self) -> RawFd {
		self.host_dirfd
	}

	/// The final pathname component.
	pub fn leaf(&self) -> &CStr {
		&self.leaf
	}

	/// Whether the host call should follow a symlink at the leaf. Always
	/// false for the user-space walk, which pre-expands final symlinks.
	pub fn follow(&self) -> bool {
		self.follow
	}

	/// The directory object the resolution was rooted in.
	pub fn directory(&self) -> &Arc<FdObject> {
		&self.dir
	}
}

impl Drop for PathLease {
	fn drop(&mut self) {
		if self.owned {
			unsafe {
				libc::close(self.host_dirfd);
			}
		}
	}
}

/// The bounded stack of directory descriptors.
///
/// Index 0 is the descriptor of the confinement root, borrowed from the
/// directory object; everything above it was opened during the walk and is
/// owned here. Dropping the stack closes every owned descriptor, so error
/// paths cannot leak.
struct FdStack {
	fds: SmallVec<[RawFd; 8]>,
}

impl FdStack {
	fn new(base: RawFd) -> Self {
		let mut fds = SmallVec::new();
		fds.push(base);
		Self { fds }
	}

	fn top(&self) -> RawFd {
		*self.fds.last().unwrap()
	}

	fn push(&mut self, fd: RawFd) -> Result<()> {
		if self.fds.len() == MAX_DIR_DEPTH {
			unsafe {
				libc::close(fd);
			}
			return Err(Errno::Nametoolong);
		}
		self.fds.push(fd);
		Ok(())
	}

	/// Leaves the directory on top of the stack. Popping the confinement
	/// root means the path escapes; that is *not-capable*.
	fn pop(&mut self) -> Result<()> {
		if self.fds.len() == 1 {
			return Err(Errno::Notcapable);
		}
		let fd = self.fds.pop().unwrap();
		unsafe {
			libc::close(fd);
		}
		Ok(())
	}

	/// Detaches the top descriptor; the drop of `self` closes the
	/// intermediate ones.
	fn take_top(mut self) -> (RawFd, bool) {
		if self.fds.len() == 1 {
			(self.fds[0], false)
		} else {
			(self.fds.pop().unwrap(), true)
		}
	}
}

impl Drop for FdStack {
	fn drop(&mut self) {
		for fd in self.fds.drain(..).skip(1) {
			unsafe {
				libc::close(fd);
			}
		}
	}
}

/// Splits the next component off a pending path: the component itself, a
/// flag telling whether one or more `/` followed it, and the remainder
/// with the separator run removed.
fn split_component(path: &[u8]) -> (&[u8], bool, &[u8]) {
	match path.iter().position(|&b| b == b'/') {
		None => (path, false, &[]),
		Some(i) => {
			let mut j = i;
			while j < path.len() && path[j] == b'/' {
				j += 1;
			}
			(&path[..i], true, &path[j..])
		}
	}
}

fn open_directory_at(dirfd: RawFd, name: &CStr) -> Result<RawFd> {
	cvt(unsafe {
		libc::openat(
			dirfd,
			name.as_ptr(),
			libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
		)
	})
}

/// Reads a symlink relative to `dirfd`, growing the buffer as needed.
fn read_link_at(dirfd: RawFd, name: &CStr) -> Result<Vec<u8>> {
	let mut buf = vec![0u8; 128];
	loop {
		let n = unsafe {
			libc::readlinkat(
				dirfd,
				name.as_ptr(),
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
			return Ok(buf);
		}
		buf.resize(buf.len() * 2, 0);
	}
}

/// Pushes a symlink target onto the pending-path stack, charging it
/// against the expansion and depth bounds.
fn push_expansion(
	path_stack: &mut Vec<Vec<u8>>,
	mut target: Vec<u8>,
	trailing_slash: bool,
	expansions: &mut usize,
) -> Result<()> {
	*expansions += 1;
	if *expansions > MAX_SYMLINK_EXPANSIONS || path_stack.len() >= MAX_PATH_DEPTH {
		return Err(Errno::Loop);
	}
	if trailing_slash {
		target.push(b'/');
	}
	path_stack.push(target);
	Ok(())
}

/// Resolves `(dirfd, path)` to a path-access lease, confined to the
/// directory named by `dirfd`.
///
/// `need_base` and `need_inheriting` are checked against the directory's
/// table entry. `follow` asks for symlink expansion of the final component;
/// `needs_final_component` distinguishes create/rename/unlink-style
/// callers, which must end up with a real leaf, from stat-style callers
/// that tolerate a result of `"."`.
pub fn resolve(
	table: &FdTable,
	dirfd: Fd,
	path: &[u8],
	need_base: Rights,
	need_inheriting: Rights,
	follow: bool,
	needs_final_component: bool,
) -> Result<PathLease> {
	// Fail on interior NUL before anything is acquired.
	null_terminate(path)?;

	let dir = table.acquire(dirfd, need_base, need_inheriting)?;
	if dir.file_type() != FileType::Directory {
		return Err(Errno::Notdir);
	}
	let base_fd = dir.require_host_fd()?;

	let mut stack = FdStack::new(base_fd);
	let mut path_stack: Vec<Vec<u8>> = vec![path.to_vec()];
	let mut expansions = 0usize;

	loop {
		let Some(cur) = path_stack.pop() else {
			// The whole path was consumed; the lease names the directory
			// currently on top of the stack.
			return Ok(finish(dir, stack, c".".to_owned()));
		};
		let (file, ends_with_slashes, rest) = split_component(&cur);
		if !rest.is_empty() {
			path_stack.push(rest.to_vec());
		}
		let more = !path_stack.is_empty();

		if file.is_empty() {
			// A leading `/`: absolute paths cannot be confined. A lone
			// empty path names nothing.
			return Err(if ends_with_slashes {
				Errno::Notcapable
			} else {
				Errno::Noent
			});
		} else if file == b"." {
			// Nothing to do.
		} else if file == b".." {
			stack.pop()?;
		} else if more || (ends_with_slashes && !needs_final_component) {
			// An intermediate component, or a trailing-slash component a
			// stat-style caller wants entered: must be a directory.
			let name = null_terminate(file)?;
			match open_directory_at(stack.top(), &name) {
				Ok(fd) => stack.push(fd)?,
				// O_NOFOLLOW reports a symlink as ELOOP, or EMLINK on
				// hosts that misreport. Expand it ourselves.
				Err(Errno::Loop | Errno::Mlink) => {
					let target = read_link_at(stack.top(), &name)?;
					push_expansion(&mut path_stack, target, ends_with_slashes, &mut expansions)?;
				}
				Err(err) => return Err(err),
			}
		} else if ends_with_slashes || follow {
			// The final component, and the caller wants symlinks at the
			// leaf expanded (or marked it must-be-directory).
			let name = null_terminate(file)?;
			match read_link_at(stack.top(), &name) {
				Ok(target) => {
					push_expansion(&mut path_stack, target, ends_with_slashes, &mut expansions)?;
				}
				// Not a symlink, or nothing there: this name is the leaf.
				Err(Errno::Inval | Errno::Noent) => {
					let mut leaf = file.to_vec();
					if ends_with_slashes {
						leaf.push(b'/');
					}
					return Ok(finish(dir, stack, null_terminate(&leaf)?));
				}
				Err(err) => return Err(err),
			}
		} else {
			return Ok(finish(dir, stack, null_terminate(file)?));
		}
	}
}

fn finish(dir: Arc<FdObject>, stack: FdStack, leaf: CString) -> PathLease {
	let (host_dirfd, owned) = stack.take_top();
	PathLease {
		dir,
		host_dirfd,
		owned,
		leaf,
		follow: false,
	}
}
