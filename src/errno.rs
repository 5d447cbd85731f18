//! Guest error kinds and the canonical host-errno translation table.
//!
//! Errors are values: every guest operation returns either success or
//! exactly one [`Errno`]. The numbering is dense and part of the guest ABI.

use num_enum::TryFromPrimitive;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Errno>;

/// An error kind as exposed to the guest.
///
/// The set is POSIX-derived plus [`Errno::Notcapable`], the capability
/// denial. Rights violations are indistinguishable from "operation not
/// permitted" for the purposes of the guest.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum Errno {
	#[error("Argument list too long")]
	Toobig = 1,
	#[error("Permission denied")]
	Acces = 2,
	#[error("Address in use")]
	Addrinuse = 3,
	#[error("Address not available")]
	Addrnotavail = 4,
	#[error("Address family not supported")]
	Afnosupport = 5,
	#[error("Resource unavailable, or operation would block")]
	Again = 6,
	#[error("Connection already in progress")]
	Already = 7,
	#[error("Bad descriptor")]
	Badf = 8,
	#[error("Bad message")]
	Badmsg = 9,
	#[error("Device or resource busy")]
	Busy = 10,
	#[error("Operation canceled")]
	Canceled = 11,
	#[error("No child processes")]
	Child = 12,
	#[error("Connection aborted")]
	Connaborted = 13,
	#[error("Connection refused")]
	Connrefused = 14,
	#[error("Connection reset")]
	Connreset = 15,
	#[error("Resource deadlock would occur")]
	Deadlk = 16,
	#[error("Destination address required")]
	Destaddrreq = 17,
	#[error("Mathematics argument out of domain of function")]
	Dom = 18,
	#[error("Reserved")]
	Dquot = 19,
	#[error("File exists")]
	Exist = 20,
	#[error("Bad address")]
	Fault = 21,
	#[error("File too large")]
	Fbig = 22,
	#[error("Host is unreachable")]
	Hostunreach = 23,
	#[error("Identifier removed")]
	Idrm = 24,
	#[error("Illegal byte sequence")]
	Ilseq = 25,
	#[error("Operation in progress")]
	Inprogress = 26,
	#[error("Interrupted function")]
	Intr = 27,
	#[error("Invalid argument")]
	Inval = 28,
	#[error("I/O error")]
	Io = 29,
	#[error("Socket is connected")]
	Isconn = 30,
	#[error("Is a directory")]
	Isdir = 31,
	#[error("Too many levels of symbolic links")]
	Loop = 32,
	#[error("Descriptor value too large")]
	Mfile = 33,
	#[error("Too many links")]
	Mlink = 34,
	#[error("Message too large")]
	Msgsize = 35,
	#[error("Reserved")]
	Multihop = 36,
	#[error("Filename too long")]
	Nametoolong = 37,
	#[error("Network is down")]
	Netdown = 38,
	#[error("Connection aborted by network")]
	Netreset = 39,
	#[error("Network unreachable")]
	Netunreach = 40,
	#[error("Too many files open in system")]
	Nfile = 41,
	#[error("No buffer space available")]
	Nobufs = 42,
	#[error("No such device")]
	Nodev = 43,
	#[error("No such file or directory")]
	Noent = 44,
	#[error("Executable file format error")]
	Noexec = 45,
	#[error("No locks available")]
	Nolck = 46,
	#[error("Reserved")]
	Nolink = 47,
	#[error("Not enough space")]
	Nomem = 48,
	#[error("No message of the desired type")]
	Nomsg = 49,
	#[error("Protocol not available")]
	Noprotoopt = 50,
	#[error("No space left on device")]
	Nospc = 51,
	#[error("Function not implemented")]
	Nosys = 52,
	#[error("The socket is not connected")]
	Notconn = 53,
	#[error("Not a directory or a symbolic link to a directory")]
	Notdir = 54,
	#[error("Directory not empty")]
	Notempty = 55,
	#[error("State not recoverable")]
	Notrecoverable = 56,
	#[error("Not a socket")]
	Notsock = 57,
	#[error("Not supported, or operation not supported on socket")]
	Notsup = 58,
	#[error("Inappropriate I/O control operation")]
	Notty = 59,
	#[error("No such device or address")]
	Nxio = 60,
	#[error("Value too large to be stored in data type")]
	Overflow = 61,
	#[error("Previous owner died")]
	Ownerdead = 62,
	#[error("Operation not permitted")]
	Perm = 63,
	#[error("Broken pipe")]
	Pipe = 64,
	#[error("Protocol error")]
	Proto = 65,
	#[error("Protocol not supported")]
	Protonosupport = 66,
	#[error("Protocol wrong type for socket")]
	Prototype = 67,
	#[error("Result too large")]
	Range = 68,
	#[error("Read-only file system")]
	Rofs = 69,
	#[error("Invalid seek")]
	Spipe = 70,
	#[error("No such process")]
	Srch = 71,
	#[error("Reserved")]
	Stale = 72,
	#[error("Connection timed out")]
	Timedout = 73,
	#[error("Text file busy")]
	Txtbsy = 74,
	#[error("Cross-device link")]
	Xdev = 75,
	#[error("Capabilities insufficient")]
	Notcapable = 76,
}

impl Errno {
	/// Translates a host error number into the canonical guest error kind.
	///
	/// Anything the table does not know becomes [`Errno::Nosys`]. On the
	/// hosts we target `EWOULDBLOCK` aliases `EAGAIN`, `EOPNOTSUPP` aliases
	/// `ENOTSUP` and `EDEADLOCK` aliases `EDEADLK`, so those spellings are
	/// covered by the arms below.
	pub fn from_host(errno: i32) -> Errno {
		match errno {
			libc::E2BIG => Errno::Toobig,
			libc::EACCES => Errno::Acces,
			libc::EADDRINUSE => Errno::Addrinuse,
			libc::EADDRNOTAVAIL => Errno::Addrnotavail,
			libc::EAFNOSUPPORT => Errno::Afnosupport,
			libc::EAGAIN => Errno::Again,
			libc::EALREADY => Errno::Already,
			libc::EBADF => Errno::Badf,
			libc::EBADMSG => Errno::Badmsg,
			libc::EBUSY => Errno::Busy,
			libc::ECANCELED => Errno::Canceled,
			libc::ECHILD => Errno::Child,
			libc::ECONNABORTED => Errno::Connaborted,
			libc::ECONNREFUSED => Errno::Connrefused,
			libc::ECONNRESET => Errno::Connreset,
			libc::EDEADLK => Errno::Deadlk,
			libc::EDESTADDRREQ => Errno::Destaddrreq,
			libc::EDOM => Errno::Dom,
			libc::EDQUOT => Errno::Dquot,
			libc::EEXIST => Errno::Exist,
			libc::EFAULT => Errno::Fault,
			libc::EFBIG => Errno::Fbig,
			libc::EHOSTUNREACH => Errno::Hostunreach,
			libc::EIDRM => Errno::Idrm,
			libc::EILSEQ => Errno::Ilseq,
			libc::EINPROGRESS => Errno::Inprogress,
			libc::EINTR => Errno::Intr,
			libc::EINVAL => Errno::Inval,
			libc::EIO => Errno::Io,
			libc::EISCONN => Errno::Isconn,
			libc::EISDIR => Errno::Isdir,
			libc::ELOOP => Errno::Loop,
			libc::EMFILE => Errno::Mfile,
			libc::EMLINK => Errno::Mlink,
			libc::EMSGSIZE => Errno::Msgsize,
			libc::EMULTIHOP => Errno::Multihop,
			libc::ENAMETOOLONG => Errno::Nametoolong,
			libc::ENETDOWN => Errno::Netdown,
			libc::ENETRESET => Errno::Netreset,
			libc::ENETUNREACH => Errno::Netunreach,
			libc::ENFILE => Errno::Nfile,
			libc::ENOBUFS => Errno::Nobufs,
			libc::ENODEV => Errno::Nodev,
			libc::ENOENT => Errno::Noent,
			libc::ENOEXEC => Errno::Noexec,
			libc::ENOLCK => Errno::Nolck,
			libc::ENOLINK => Errno::Nolink,
			libc::ENOMEM => Errno::Nomem,
			libc::ENOMSG => Errno::Nomsg,
			libc::ENOPROTOOPT => Errno::Noprotoopt,
			libc::ENOSPC => Errno::Nospc,
			libc::ENOSYS => Errno::Nosys,
			libc::ENOTCONN => Errno::Notconn,
			libc::ENOTDIR => Errno::Notdir,
			libc::ENOTEMPTY => Errno::Notempty,
			libc::ENOTRECOVERABLE => Errno::Notrecoverable,
			libc::ENOTSOCK => Errno::Notsock,
			libc::ENOTSUP => Errno::Notsup,
			libc::ENOTTY => Errno::Notty,
			libc::ENXIO => Errno::Nxio,
			libc::EOVERFLOW => Errno::Overflow,
			libc::EOWNERDEAD => Errno::Ownerdead,
			libc::EPERM => Errno::Perm,
			libc::EPIPE => Errno::Pipe,
			libc::EPROTO => Errno::Proto,
			libc::EPROTONOSUPPORT => Errno::Protonosupport,
			libc::EPROTOTYPE => Errno::Prototype,
			libc::ERANGE => Errno::Range,
			libc::EROFS => Errno::Rofs,
			libc::ESPIPE => Errno::Spipe,
			libc::ESRCH => Errno::Srch,
			libc::ESTALE => Errno::Stale,
			libc::ETIMEDOUT => Errno::Timedout,
			libc::ETXTBSY => Errno::Txtbsy,
			libc::EXDEV => Errno::Xdev,
			_ => Errno::Nosys,
		}
	}

	/// The guest ABI value of this error kind.
	pub fn raw(self) -> u16 {
		self as u16
	}
}

/// Reads the calling thread's host errno and translates it.
pub(crate) fn last_host() -> Errno {
	Errno::from_host(
		std::io::Error::last_os_error()
			.raw_os_error()
			.unwrap_or(libc::EIO),
	)
}

/// Converts the `-1`-on-failure result of a host call returning `c_int`.
pub(crate) fn cvt(ret: libc::c_int) -> Result<libc::c_int> {
	if ret == -1 {
		Err(last_host())
	} else {
		Ok(ret)
	}
}

/// Like [`cvt`], for host calls returning a byte count.
pub(crate) fn cvt_ssize(ret: libc::ssize_t) -> Result<usize> {
	if ret == -1 {
		Err(last_host())
	} else {
		Ok(ret as usize)
	}
}

/// Like [`cvt`], for host calls returning an offset.
pub(crate) fn cvt_off(ret: libc::off_t) -> Result<u64> {
	if ret == -1 {
		Err(last_host())
	} else {
		Ok(ret as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn host_translation_is_canonical() {
		assert_eq!(Errno::from_host(libc::EBADF), Errno::Badf);
		assert_eq!(Errno::from_host(libc::ENOENT), Errno::Noent);
		assert_eq!(Errno::from_host(libc::ELOOP), Errno::Loop);
		// EWOULDBLOCK aliases EAGAIN on every supported host.
		assert_eq!(Errno::from_host(libc::EWOULDBLOCK), Errno::Again);
		// EOPNOTSUPP maps to the canonical "not supported".
		assert_eq!(Errno::from_host(libc::EOPNOTSUPP), Errno::Notsup);
		// Unmapped host errors surface as "function not implemented".
		assert_eq!(Errno::from_host(libc::EL2NSYNC), Errno::Nosys);
	}

	#[test]
	fn raw_values_are_dense() {
		assert_eq!(Errno::Toobig.raw(), 1);
		assert_eq!(Errno::Xdev.raw(), 75);
		assert_eq!(Errno::Notcapable.raw(), 76);
		assert_eq!(Errno::try_from(8u16).unwrap(), Errno::Badf);
		assert!(Errno::try_from(77u16).is_err());
	}
}
