//! Guest ABI types: scalars, rights bitmasks, flag sets and the event
//! subscription model.
//!
//! Everything in here is part of the wire contract with guest programs.
//! Enum-like types reject unknown raw values with `Errno::Inval` through
//! their `TryFrom` conversions; bitmask types reject unknown bits through
//! `from_bits`.

use core::sync::atomic::AtomicU32;

use num_enum::TryFromPrimitive;

use crate::errno::{Errno, Result};

/// A guest file descriptor number.
pub type Fd = u32;
/// A guest thread identifier.
pub type Tid = u32;
/// A device identifier as reported by `file_stat_get`.
pub type Device = u64;
/// A file serial number.
pub type Inode = u64;
/// A file size or byte count.
pub type Filesize = u64;
/// A hard-link count.
pub type Linkcount = u32;
/// Nanoseconds since a clock's epoch.
pub type Timestamp = u64;
/// Opaque caller data carried through the event multiplexer.
pub type Userdata = u64;
/// An opaque position in a directory stream.
pub type Dircookie = u64;

/// The cookie denoting the start of a directory.
pub const DIRCOOKIE_START: Dircookie = 0;
/// The descriptor sentinel required by anonymous memory mappings.
pub const MAP_ANON_FD: Fd = Fd::MAX;

/// The type of a descriptor or file.
///
/// The symbolic-link variant only occurs as a transient result of
/// `file_stat_get`; an open descriptor never has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FileType {
	Unknown = 0,
	BlockDevice = 16,
	CharacterDevice = 17,
	Tty = 18,
	Directory = 32,
	RegularFile = 96,
	SharedMemory = 112,
	SocketDgram = 128,
	SocketStream = 130,
	SymbolicLink = 144,
}

bitflags! {
	/// The operations a descriptor authorises.
	///
	/// Rights are monotonically non-increasing over an entry's lifetime:
	/// no operation ever widens them.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct Rights: u64 {
		const FD_DATASYNC = 1 << 0;
		const FD_READ = 1 << 1;
		const FD_SEEK = 1 << 2;
		const FD_STAT_PUT_FLAGS = 1 << 3;
		const FD_SYNC = 1 << 4;
		const FD_TELL = 1 << 5;
		const FD_WRITE = 1 << 6;
		const FILE_ADVISE = 1 << 7;
		const FILE_ALLOCATE = 1 << 8;
		const FILE_CREATE_DIRECTORY = 1 << 9;
		const FILE_CREATE_FILE = 1 << 10;
		const FILE_LINK_SOURCE = 1 << 11;
		const FILE_LINK_TARGET = 1 << 12;
		const FILE_OPEN = 1 << 13;
		const FILE_READDIR = 1 << 14;
		const FILE_READLINK = 1 << 15;
		const FILE_RENAME_SOURCE = 1 << 16;
		const FILE_RENAME_TARGET = 1 << 17;
		const FILE_STAT_GET = 1 << 18;
		const FILE_STAT_PUT_TIMES = 1 << 19;
		const FILE_SYMLINK = 1 << 20;
		const FILE_UNLINK = 1 << 21;
		const MEM_MAP = 1 << 22;
		const MEM_MAP_EXEC = 1 << 23;
		const POLL_FD_READWRITE = 1 << 24;
		const SOCK_SHUTDOWN = 1 << 25;
	}
}

/// The maximum rights of a regular file.
pub const RIGHTS_REGULAR_FILE_BASE: Rights = Rights::from_bits_truncate(
	Rights::FD_DATASYNC.bits()
		| Rights::FD_READ.bits()
		| Rights::FD_SEEK.bits()
		| Rights::FD_STAT_PUT_FLAGS.bits()
		| Rights::FD_SYNC.bits()
		| Rights::FD_TELL.bits()
		| Rights::FD_WRITE.bits()
		| Rights::FILE_ADVISE.bits()
		| Rights::FILE_ALLOCATE.bits()
		| Rights::MEM_MAP.bits()
		| Rights::MEM_MAP_EXEC.bits()
		| Rights::POLL_FD_READWRITE.bits(),
);
pub const RIGHTS_REGULAR_FILE_INHERITING: Rights = Rights::empty();

/// The maximum base rights of a directory.
pub const RIGHTS_DIRECTORY_BASE: Rights = Rights::from_bits_truncate(
	Rights::FD_STAT_PUT_FLAGS.bits()
		| Rights::FD_SYNC.bits()
		| Rights::FILE_CREATE_DIRECTORY.bits()
		| Rights::FILE_CREATE_FILE.bits()
		| Rights::FILE_LINK_SOURCE.bits()
		| Rights::FILE_LINK_TARGET.bits()
		| Rights::FILE_OPEN.bits()
		| Rights::FILE_READDIR.bits()
		| Rights::FILE_READLINK.bits()
		| Rights::FILE_RENAME_SOURCE.bits()
		| Rights::FILE_RENAME_TARGET.bits()
		| Rights::FILE_STAT_GET.bits()
		| Rights::FILE_STAT_PUT_TIMES.bits()
		| Rights::FILE_SYMLINK.bits()
		| Rights::FILE_UNLINK.bits()
		| Rights::POLL_FD_READWRITE.bits(),
);
/// Directories may pass on their own rights plus everything a file under
/// them could carry.
pub const RIGHTS_DIRECTORY_INHERITING: Rights =
	Rights::from_bits_truncate(RIGHTS_DIRECTORY_BASE.bits() | RIGHTS_REGULAR_FILE_BASE.bits());

/// The maximum rights of a stream or datagram socket (and of pipes, which
/// classify as stream sockets in this ABI).
pub const RIGHTS_SOCKET_BASE: Rights = Rights::from_bits_truncate(
	Rights::FD_READ.bits()
		| Rights::FD_STAT_PUT_FLAGS.bits()
		| Rights::FD_WRITE.bits()
		| Rights::POLL_FD_READWRITE.bits()
		| Rights::SOCK_SHUTDOWN.bits(),
);

/// The maximum rights of a terminal: a character device without a file
/// position.
pub const RIGHTS_TTY_BASE: Rights = Rights::from_bits_truncate(
	Rights::FD_READ.bits()
		| Rights::FD_STAT_PUT_FLAGS.bits()
		| Rights::FD_WRITE.bits()
		| Rights::POLL_FD_READWRITE.bits(),
);

/// The maximum rights of a non-terminal character device.
pub const RIGHTS_CHARACTER_DEVICE_BASE: Rights = Rights::from_bits_truncate(
	RIGHTS_TTY_BASE.bits()
		| Rights::FD_SEEK.bits()
		| Rights::FD_SYNC.bits()
		| Rights::FD_TELL.bits(),
);

/// The maximum rights of a block device.
pub const RIGHTS_BLOCK_DEVICE_BASE: Rights = Rights::from_bits_truncate(
	Rights::FD_DATASYNC.bits()
		| Rights::FD_READ.bits()
		| Rights::FD_SEEK.bits()
		| Rights::FD_STAT_PUT_FLAGS.bits()
		| Rights::FD_SYNC.bits()
		| Rights::FD_TELL.bits()
		| Rights::FD_WRITE.bits()
		| Rights::FILE_ADVISE.bits()
		| Rights::MEM_MAP.bits()
		| Rights::MEM_MAP_EXEC.bits()
		| Rights::POLL_FD_READWRITE.bits(),
);

/// The maximum rights of an anonymous shared-memory object.
pub const RIGHTS_SHARED_MEMORY_BASE: Rights = Rights::from_bits_truncate(
	Rights::FD_READ.bits()
		| Rights::FD_STAT_PUT_FLAGS.bits()
		| Rights::FD_WRITE.bits()
		| Rights::FILE_ALLOCATE.bits()
		| Rights::MEM_MAP.bits()
		| Rights::MEM_MAP_EXEC.bits(),
);

bitflags! {
	/// Per-descriptor status flags, the guest view of `O_APPEND` and
	/// friends.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct FdFlags: u16 {
		const APPEND = 1 << 0;
		const DSYNC = 1 << 1;
		const NONBLOCK = 1 << 2;
		const RSYNC = 1 << 3;
		const SYNC = 1 << 4;
	}
}

bitflags! {
	/// Flags for `file_open`.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct OFlags: u16 {
		const CREAT = 1 << 0;
		const DIRECTORY = 1 << 1;
		const EXCL = 1 << 2;
		const TRUNC = 1 << 3;
	}
}

bitflags! {
	/// Flags determining how a path's final component is resolved.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct LookupFlags: u32 {
		const SYMLINK_FOLLOW = 1 << 0;
	}
}

bitflags! {
	/// Flags for `file_unlink`.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct UlFlags: u8 {
		const REMOVEDIR = 1 << 0;
	}
}

bitflags! {
	/// Which timestamps `file_stat_put` is asked to change.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct FsFlags: u16 {
		const ATIM = 1 << 0;
		const ATIM_NOW = 1 << 1;
		const MTIM = 1 << 2;
		const MTIM_NOW = 1 << 3;
	}
}

bitflags! {
	/// Which halves of an `Fdstat` a `fd_stat_put` call stores.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct FdstatPut: u16 {
		const FLAGS = 1 << 0;
		const RIGHTS = 1 << 1;
	}
}

bitflags! {
	/// Result flags of `sock_recv`.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct RoFlags: u16 {
		const FDS_TRUNCATED = 1 << 0;
		const DATA_TRUNCATED = 1 << 1;
	}
}

/// Whence values for `fd_seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Whence {
	Set = 0,
	Current = 1,
	End = 2,
}

/// Access-pattern advice for `file_advise` and `mem_advise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Advice {
	Normal = 0,
	Random = 1,
	Sequential = 2,
	WillNeed = 3,
	DontNeed = 4,
	NoReuse = 5,
}

/// The clocks of the guest ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum ClockId {
	Realtime = 0,
	Monotonic = 1,
	ProcessCputimeId = 2,
	ThreadCputimeId = 3,
}

/// How `sock_shutdown` closes a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum SdHow {
	Read = 1,
	Write = 2,
	ReadWrite = 3,
}

/// Whether a lock or condition variable may be shared across guest
/// processes through shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Scope {
	Private = 0,
	Shared = 1,
}

/// The signals `proc_raise` can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Signal {
	Abrt = 1,
	Alrm = 2,
	Bus = 3,
	Chld = 4,
	Cont = 5,
	Fpe = 6,
	Hup = 7,
	Ill = 8,
	Int = 9,
	Kill = 10,
	Pipe = 11,
	Quit = 12,
	Segv = 13,
	Stop = 14,
	Sys = 15,
	Term = 16,
	Trap = 17,
	Tstp = 18,
	Ttin = 19,
	Ttou = 20,
	Urg = 21,
	Usr1 = 22,
	Usr2 = 23,
	Vtalrm = 24,
	Xcpu = 25,
	Xfsz = 26,
}

/// The descriptor status record returned by `fd_stat_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fdstat {
	pub fs_filetype: FileType,
	pub fs_flags: FdFlags,
	pub fs_rights_base: Rights,
	pub fs_rights_inheriting: Rights,
}

/// The file attribute record returned by `file_stat_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filestat {
	pub st_dev: Device,
	pub st_ino: Inode,
	pub st_filetype: FileType,
	pub st_nlink: Linkcount,
	pub st_size: Filesize,
	pub st_atim: Timestamp,
	pub st_mtim: Timestamp,
	pub st_ctim: Timestamp,
}

/// A directory entry header as serialised by `file_readdir`.
///
/// The wire format is the 24-byte header followed by `d_namlen` name bytes,
/// back to back. Entries are truncated, not split-aborted, when the
/// caller's buffer fills up.
#[derive(Debug, Clone, Copy)]
pub struct Dirent {
	pub d_next: Dircookie,
	pub d_ino: Inode,
	pub d_namlen: u32,
	pub d_type: FileType,
}

impl Dirent {
	/// Serialised size of the header.
	pub const WIRE_SIZE: usize = 24;

	/// Encodes the header in the guest wire layout.
	pub fn to_wire(self) -> [u8; Self::WIRE_SIZE] {
		let mut buf = [0u8; Self::WIRE_SIZE];
		buf[0..8].copy_from_slice(&self.d_next.to_le_bytes());
		buf[8..16].copy_from_slice(&self.d_ino.to_le_bytes());
		buf[16..20].copy_from_slice(&self.d_namlen.to_le_bytes());
		buf[20] = self.d_type as u8;
		buf
	}
}

bitflags! {
	/// Flags of a clock subscription.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct SubClockFlags: u16 {
		/// The timeout is an absolute point on the subscribed clock.
		const ABSTIME = 1 << 0;
	}
}

/// One entry of the input list handed to `poll`.
#[derive(Debug, Clone, Copy)]
pub struct Subscription {
	pub userdata: Userdata,
	pub kind: SubscriptionKind,
}

/// What a subscription waits for.
#[derive(Debug, Clone, Copy)]
pub enum SubscriptionKind {
	Clock {
		clock_id: ClockId,
		timeout: Timestamp,
		precision: Timestamp,
		flags: SubClockFlags,
	},
	FdRead {
		fd: Fd,
	},
	FdWrite {
		fd: Fd,
	},
	/// A futex wait, delegated in its entirety to the scheduler
	/// collaborator. The pointers address 32-bit guest lock words.
	CondvarWait {
		condvar: *const AtomicU32,
		lock: *const AtomicU32,
		scope: Scope,
	},
}

/// The tag of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
	Clock = 1,
	Condvar = 2,
	FdRead = 3,
	FdWrite = 4,
}

/// One entry of the output list filled by `poll`.
#[derive(Debug, Clone, Copy)]
pub struct Event {
	pub userdata: Userdata,
	pub r#type: EventType,
	pub error: Option<Errno>,
	/// Bytes available for reading, for fd events.
	pub nbytes: Filesize,
	/// The peer hung up, for fd events.
	pub hangup: bool,
}

impl Event {
	pub(crate) fn new(userdata: Userdata, r#type: EventType) -> Self {
		Self {
			userdata,
			r#type,
			error: None,
			nbytes: 0,
			hangup: false,
		}
	}

	pub(crate) fn error(userdata: Userdata, r#type: EventType, error: Errno) -> Self {
		Self {
			userdata,
			r#type,
			error: Some(error),
			nbytes: 0,
			hangup: false,
		}
	}
}

/// Translates a raw enum-like scalar, rejecting unknown values.
pub(crate) fn enum_from_raw<T, R>(raw: R) -> Result<T>
where
	T: TryFrom<R>,
{
	T::try_from(raw).map_err(|_| Errno::Inval)
}

/// Translates a raw bitmask, rejecting unknown bits.
pub(crate) fn flags_from_raw<T: bitflags::Flags>(raw: T::Bits) -> Result<T> {
	T::from_bits(raw).ok_or(Errno::Inval)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_raw_values_are_rejected() {
		assert_eq!(enum_from_raw::<Whence, u8>(3), Err(Errno::Inval));
		assert_eq!(enum_from_raw::<Advice, u8>(6), Err(Errno::Inval));
		assert_eq!(enum_from_raw::<ClockId, u32>(4), Err(Errno::Inval));
		assert_eq!(flags_from_raw::<OFlags>(1 << 5), Err(Errno::Inval));
	}

	#[test]
	fn directory_rights_cover_file_rights() {
		assert!(RIGHTS_DIRECTORY_INHERITING.contains(RIGHTS_REGULAR_FILE_BASE));
		assert!(RIGHTS_DIRECTORY_INHERITING.contains(RIGHTS_DIRECTORY_BASE));
	}

	#[test]
	fn dirent_wire_layout() {
		let de = Dirent {
			d_next: 7,
			d_ino: 42,
			d_namlen: 8,
			d_type: FileType::RegularFile,
		};
		let wire = de.to_wire();
		assert_eq!(wire.len(), Dirent::WIRE_SIZE);
		assert_eq!(&wire[0..8], &7u64.to_le_bytes());
		assert_eq!(&wire[16..20], &8u32.to_le_bytes());
		assert_eq!(wire[20], FileType::RegularFile as u8);
		assert_eq!(&wire[21..24], &[0, 0, 0]);
	}
}
