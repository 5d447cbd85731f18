//! Descriptor passing over stream sockets.
//!
//! Guest descriptors travel as a single `SCM_RIGHTS` ancillary header of
//! host descriptor numbers. Outbound, one table reference per descriptor is
//! held across the `sendmsg` so a concurrent close cannot invalidate the
//! numbers. Inbound, every received host descriptor is classified and
//! inserted into the table with the maximum rights its type permits.

use core::mem;
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::abi::{Fd, Rights, RoFlags};
use crate::errno::{cvt_ssize, Result};
use crate::fd::{FdObject, FdTable};

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
const SEND_FLAGS: libc::c_int = 0;

/// An ancillary-data buffer with `cmsghdr` alignment.
struct CmsgBuffer {
	storage: Vec<u64>,
	len: usize,
}

impl CmsgBuffer {
	fn with_capacity_for_fds(count: usize) -> Self {
		let len = unsafe { libc::CMSG_SPACE((count * mem::size_of::<RawFd>()) as u32) } as usize;
		Self {
			storage: vec![0u64; len.div_ceil(mem::size_of::<u64>())],
			len,
		}
	}

	fn as_mut_ptr(&mut self) -> *mut libc::c_void {
		self.storage.as_mut_ptr().cast()
	}
}

/// Sends data and guest descriptors on a stream socket.
///
/// A descriptor whose object carries no host number cannot be expressed on
/// the wire; that is *bad-descriptor*, detected before anything is sent.
pub(crate) fn send(
	table: &FdTable,
	sock: Fd,
	iovs: &[IoSlice<'_>],
	fds: &[Fd],
) -> Result<usize> {
	let object = table.acquire(sock, Rights::FD_WRITE, Rights::empty())?;
	let sock_fd = object.require_host_fd()?;

	let mut passed: SmallVec<[Arc<FdObject>; 4]> = SmallVec::new();
	let mut host_fds: SmallVec<[RawFd; 4]> = SmallVec::new();
	for &fd in fds {
		let passed_object = table.acquire(fd, Rights::empty(), Rights::empty())?;
		host_fds.push(passed_object.require_host_fd()?);
		passed.push(passed_object);
	}

	let mut msg: libc::msghdr = unsafe { mem::zeroed() };
	msg.msg_iov = iovs.as_ptr() as *mut libc::iovec;
	msg.msg_iovlen = iovs.len() as _;

	let mut cmsg_buf;
	if !host_fds.is_empty() {
		cmsg_buf = CmsgBuffer::with_capacity_for_fds(host_fds.len());
		msg.msg_control = cmsg_buf.as_mut_ptr();
		msg.msg_controllen = cmsg_buf.len as _;
		unsafe {
			let cmsg = libc::CMSG_FIRSTHDR(&msg);
			(*cmsg).cmsg_level = libc::SOL_SOCKET;
			(*cmsg).cmsg_type = libc::SCM_RIGHTS;
			(*cmsg).cmsg_len =
				libc::CMSG_LEN((host_fds.len() * mem::size_of::<RawFd>()) as u32) as _;
			core::ptr::copy_nonoverlapping(
				host_fds.as_ptr(),
				libc::CMSG_DATA(cmsg).cast::<RawFd>(),
				host_fds.len(),
			);
		}
	}

	let sent = cvt_ssize(unsafe { libc::sendmsg(sock_fd, &msg, SEND_FLAGS) })?;
	// `passed` kept every transmitted object alive until here.
	drop(passed);
	Ok(sent)
}

/// Receives data and guest descriptors from a stream socket.
///
/// Returns the byte count, the number of descriptor slots written and the
/// truncation flags. A received host descriptor that cannot be classified
/// is closed and its slot set to [`Fd::MAX`].
pub(crate) fn recv(
	table: &FdTable,
	sock: Fd,
	iovs: &mut [IoSliceMut<'_>],
	fds: &mut [Fd],
) -> Result<(usize, usize, RoFlags)> {
	let object = table.acquire(sock, Rights::FD_READ, Rights::empty())?;
	let sock_fd = object.require_host_fd()?;

	let mut msg: libc::msghdr = unsafe { mem::zeroed() };
	msg.msg_iov = iovs.as_mut_ptr() as *mut libc::iovec;
	msg.msg_iovlen = iovs.len() as _;

	let mut cmsg_buf;
	if !fds.is_empty() {
		cmsg_buf = CmsgBuffer::with_capacity_for_fds(fds.len());
		msg.msg_control = cmsg_buf.as_mut_ptr();
		msg.msg_controllen = cmsg_buf.len as _;
	}

	let received = cvt_ssize(unsafe { libc::recvmsg(sock_fd, &mut msg, 0) })?;

	let mut flags = RoFlags::empty();
	if msg.msg_flags & libc::MSG_CTRUNC != 0 {
		flags |= RoFlags::FDS_TRUNCATED;
	}
	if msg.msg_flags & libc::MSG_TRUNC != 0 {
		flags |= RoFlags::DATA_TRUNCATED;
	}

	let mut nfds = 0usize;
	unsafe {
		let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
		while !cmsg.is_null() {
			if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
				let payload = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
				let count = payload / mem::size_of::<RawFd>();
				let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
				for i in 0..count {
					let host_fd = data.add(i).read_unaligned();
					if nfds >= fds.len() {
						// More descriptors than the caller made room for.
						libc::close(host_fd);
						flags |= RoFlags::FDS_TRUNCATED;
						continue;
					}
					fds[nfds] = match crate::fd::import(table, host_fd) {
						Ok(guest_fd) => guest_fd,
						Err(err) => {
							debug!("sock_recv: dropping unclassifiable descriptor: {err}");
							Fd::MAX
						}
					};
					nfds += 1;
				}
			}
			cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
		}
	}

	Ok((received, nfds, flags))
}
