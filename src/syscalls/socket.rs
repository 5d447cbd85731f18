//! Socket syscalls.

use std::io::{IoSlice, IoSliceMut};

use crate::abi::{enum_from_raw, Fd, Rights, RoFlags, SdHow};
use crate::errno::{cvt, Result};
use crate::fd::socket;
use crate::thread::current_table;

/// Receives data and descriptors from a stream socket.
///
/// Received descriptors are classified, inserted into the table at fresh
/// random numbers and reported through `fds`; an unclassifiable descriptor
/// leaves [`Fd::MAX`] in its slot.
pub fn sock_recv(
	sock: Fd,
	iovs: &mut [IoSliceMut<'_>],
	fds: &mut [Fd],
) -> Result<(usize, usize, RoFlags)> {
	strace!("sock_recv({sock})");
	socket::recv(&current_table(), sock, iovs, fds)
}

/// Sends data and descriptors on a stream socket.
pub fn sock_send(sock: Fd, iovs: &[IoSlice<'_>], fds: &[Fd]) -> Result<usize> {
	strace!("sock_send({sock}, {} fds)", fds.len());
	socket::send(&current_table(), sock, iovs, fds)
}

/// Shuts down a socket in one or both directions.
pub fn sock_shutdown(sock: Fd, how: u8) -> Result<()> {
	let how: SdHow = enum_from_raw(how)?;
	let object = current_table().acquire(sock, Rights::SOCK_SHUTDOWN, Rights::empty())?;
	let host_how = match how {
		SdHow::Read => libc::SHUT_RD,
		SdHow::Write => libc::SHUT_WR,
		SdHow::ReadWrite => libc::SHUT_RDWR,
	};
	cvt(unsafe { libc::shutdown(object.require_host_fd()?, host_how) })?;
	Ok(())
}
