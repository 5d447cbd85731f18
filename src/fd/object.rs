//! The reference-counted wrapper around a host descriptor.
//!
//! Objects are shared through `Arc`; the strong count is the reference
//! count the capability layer reasons about. Dropping the last reference
//! releases the host resource exactly once, through the directory stream
//! handle when one has been promoted.

use core::fmt;
use std::os::unix::io::RawFd;

use parking_lot::Mutex;

use crate::abi::{
	Dircookie, FileType, Rights, DIRCOOKIE_START, RIGHTS_BLOCK_DEVICE_BASE,
	RIGHTS_CHARACTER_DEVICE_BASE, RIGHTS_DIRECTORY_BASE, RIGHTS_DIRECTORY_INHERITING,
	RIGHTS_REGULAR_FILE_BASE, RIGHTS_REGULAR_FILE_INHERITING, RIGHTS_SOCKET_BASE, RIGHTS_TTY_BASE,
};
use crate::errno::{cvt, last_host, Errno, Result};

/// Sentinel host number of a virtual descriptor.
const HOST_FD_NONE: RawFd = -1;

/// A live host resource held by the guest.
///
/// The file type is immutable for the object's lifetime. Directories
/// additionally carry the lazily promoted directory stream and the guest's
/// view of the read position, both behind the object's mutex.
pub struct FdObject {
	file_type: FileType,
	host_fd: RawFd,
	dir: Option<Mutex<DirState>>,
}

/// Directory-only extension state.
pub(crate) struct DirState {
	pub stream: Option<DirStream>,
	pub cookie: Dircookie,
}

/// An owned host directory stream.
///
/// Promoting a raw descriptor into a stream transfers close responsibility:
/// once the stream exists, the descriptor is released via `closedir`.
pub(crate) struct DirStream(*mut libc::DIR);

// The stream pointer is only touched under the object's mutex.
unsafe impl Send for DirStream {}

impl DirStream {
	pub(crate) fn open(host_fd: RawFd) -> Result<Self> {
		let dirp = unsafe { libc::fdopendir(host_fd) };
		if dirp.is_null() {
			return Err(last_host());
		}
		Ok(Self(dirp))
	}

	pub(crate) fn as_ptr(&self) -> *mut libc::DIR {
		self.0
	}
}

impl Drop for DirStream {
	fn drop(&mut self) {
		// Closes the underlying host descriptor as a side effect.
		unsafe {
			libc::closedir(self.0);
		}
	}
}

impl FdObject {
	/// Wraps an owned host descriptor of a known guest type.
	pub fn new(file_type: FileType, host_fd: RawFd) -> Self {
		Self {
			file_type,
			host_fd,
			dir: (file_type == FileType::Directory).then(|| {
				Mutex::new(DirState {
					stream: None,
					cookie: DIRCOOKIE_START,
				})
			}),
		}
	}

	/// Creates a virtual object carrying no host descriptor.
	pub fn virtual_object(file_type: FileType) -> Self {
		Self::new(file_type, HOST_FD_NONE)
	}

	pub fn file_type(&self) -> FileType {
		self.file_type
	}

	/// The underlying host descriptor, or `None` for virtual objects.
	pub fn host_fd(&self) -> Option<RawFd> {
		(self.host_fd >= 0).then_some(self.host_fd)
	}

	/// Like [`FdObject::host_fd`], as a guest-visible error.
	pub(crate) fn require_host_fd(&self) -> Result<RawFd> {
		self.host_fd().ok_or(Errno::Badf)
	}

	pub(crate) fn dir_state(&self) -> Result<&Mutex<DirState>> {
		self.dir.as_ref().ok_or(Errno::Notdir)
	}

	/// Classifies a host descriptor and computes the maximum rights its
	/// type permits.
	///
	/// Sockets are told apart with `SO_TYPE`, terminals with `isatty`. If
	/// the host access mode excludes reading or writing, the corresponding
	/// right is stripped from the base set. An unknown mode is
	/// *invalid-argument*.
	pub fn probe(host_fd: RawFd) -> Result<(FileType, Rights, Rights)> {
		let mut st: libc::stat = unsafe { core::mem::zeroed() };
		cvt(unsafe { libc::fstat(host_fd, &mut st) })?;

		let (file_type, mut base, inheriting) = match st.st_mode & libc::S_IFMT {
			libc::S_IFBLK => (
				FileType::BlockDevice,
				RIGHTS_BLOCK_DEVICE_BASE,
				Rights::empty(),
			),
			libc::S_IFCHR => {
				if unsafe { libc::isatty(host_fd) } == 1 {
					(FileType::Tty, RIGHTS_TTY_BASE, Rights::empty())
				} else {
					(
						FileType::CharacterDevice,
						RIGHTS_CHARACTER_DEVICE_BASE,
						Rights::empty(),
					)
				}
			}
			libc::S_IFDIR => (
				FileType::Directory,
				RIGHTS_DIRECTORY_BASE,
				RIGHTS_DIRECTORY_INHERITING,
			),
			// The guest ABI has no pipe type; pipes behave as stream
			// sockets (byte stream, pollable, no file position).
			libc::S_IFIFO => (FileType::SocketStream, RIGHTS_SOCKET_BASE, Rights::empty()),
			libc::S_IFREG => (
				FileType::RegularFile,
				RIGHTS_REGULAR_FILE_BASE,
				RIGHTS_REGULAR_FILE_INHERITING,
			),
			libc::S_IFSOCK => {
				let mut ty: libc::c_int = 0;
				let mut len = core::mem::size_of::<libc::c_int>() as libc::socklen_t;
				cvt(unsafe {
					libc::getsockopt(
						host_fd,
						libc::SOL_SOCKET,
						libc::SO_TYPE,
						(&mut ty as *mut libc::c_int).cast(),
						&mut len,
					)
				})?;
				let file_type = match ty {
					libc::SOCK_STREAM => FileType::SocketStream,
					libc::SOCK_DGRAM => FileType::SocketDgram,
					_ => return Err(Errno::Inval),
				};
				(file_type, RIGHTS_SOCKET_BASE, Rights::empty())
			}
			_ => return Err(Errno::Inval),
		};

		match cvt(unsafe { libc::fcntl(host_fd, libc::F_GETFL) })? & libc::O_ACCMODE {
			libc::O_RDONLY => base.remove(Rights::FD_WRITE),
			libc::O_WRONLY => base.remove(Rights::FD_READ),
			_ => {}
		}

		Ok((file_type, base, inheriting))
	}
}

impl fmt::Debug for FdObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FdObject")
			.field("file_type", &self.file_type)
			.field("host_fd", &self.host_fd)
			.finish_non_exhaustive()
	}
}

impl Drop for FdObject {
	fn drop(&mut self) {
		if let Some(dir) = &self.dir {
			// A promoted stream owns the host descriptor; dropping it
			// closes. Without a stream the raw descriptor is ours to close.
			if dir.lock().stream.take().is_some() {
				return;
			}
		}
		if self.host_fd >= 0 {
			unsafe {
				libc::close(self.host_fd);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn host_open(path: &std::ffi::CStr, flags: libc::c_int) -> RawFd {
		let fd = unsafe { libc::open(path.as_ptr(), flags) };
		assert!(fd >= 0);
		fd
	}

	#[test]
	fn probe_classifies_a_directory() {
		let fd = host_open(c"/tmp", libc::O_RDONLY | libc::O_DIRECTORY);
		let (ft, base, inheriting) = FdObject::probe(fd).unwrap();
		assert_eq!(ft, FileType::Directory);
		assert!(base.contains(Rights::FILE_OPEN));
		assert!(inheriting.contains(Rights::FD_READ));
		drop(FdObject::new(ft, fd));
	}

	#[test]
	fn probe_strips_write_on_read_only_descriptors() {
		let file = tempfile::NamedTempFile::new().unwrap();
		let path = std::ffi::CString::new(file.path().as_os_str().as_encoded_bytes()).unwrap();
		let fd = host_open(&path, libc::O_RDONLY);
		let (ft, base, _) = FdObject::probe(fd).unwrap();
		assert_eq!(ft, FileType::RegularFile);
		assert!(base.contains(Rights::FD_READ));
		assert!(!base.contains(Rights::FD_WRITE));
		drop(FdObject::new(ft, fd));
	}

	#[test]
	fn virtual_objects_have_no_host_fd() {
		let fo = FdObject::virtual_object(FileType::SharedMemory);
		assert_eq!(fo.host_fd(), None);
		assert_eq!(fo.require_host_fd(), Err(Errno::Badf));
	}
}
