//! End-to-end scenarios exercising the emulator the way a launcher-seeded
//! guest would.

use std::ffi::CString;
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::IntoRawFd;
use std::sync::Arc;

use assert_matches::assert_matches;
use capemu::abi::{
	Event, EventType, Fd, FdFlags, Fdstat, FdstatPut, FileType, Rights, SubClockFlags,
	Subscription, SubscriptionKind,
};
use capemu::fd::{import, FdObject, FdTable};
use capemu::syscalls;
use capemu::thread::install;
use capemu::Errno;

/// Opens a host directory and seeds it into the table at `fd` with the
/// maximum rights of its type.
fn seed_directory(table: &FdTable, fd: Fd, path: &std::path::Path) {
	let c = CString::new(path.as_os_str().as_encoded_bytes()).unwrap();
	let host_fd = unsafe { libc::open(c.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
	assert!(host_fd >= 0);
	let (file_type, base, inheriting) = FdObject::probe(host_fd).unwrap();
	table.insert_at(fd, Arc::new(FdObject::new(file_type, host_fd)), base, inheriting);
}

fn fresh_process() -> Arc<FdTable> {
	let table = Arc::new(FdTable::new());
	install(Arc::clone(&table), 1);
	table
}

fn fdstat_with(rights: Rights) -> Fdstat {
	Fdstat {
		fs_filetype: FileType::Unknown,
		fs_flags: FdFlags::empty(),
		fs_rights_base: rights,
		fs_rights_inheriting: Rights::empty(),
	}
}

#[test]
fn capability_escape_is_blocked() {
	let table = fresh_process();
	let sandbox = tempfile::tempdir().unwrap();
	seed_directory(&table, 3, sandbox.path());

	assert_eq!(
		syscalls::file_open(3, 0, b"../etc/passwd", 0, &fdstat_with(Rights::FD_READ)).err(),
		Some(Errno::Notcapable)
	);
	// The sandbox is still pristine: nothing inside it was created either.
	assert_eq!(std::fs::read_dir(sandbox.path()).unwrap().count(), 0);
}

#[test]
fn rights_shrink_but_never_grow() {
	let table = fresh_process();
	let file = tempfile::tempfile().unwrap();
	let host_fd = file.into_raw_fd();
	let object = Arc::new(FdObject::new(FileType::RegularFile, host_fd));
	table.insert_at(4, object, Rights::FD_READ | Rights::FD_WRITE, Rights::empty());

	let mut stat = fdstat_with(Rights::FD_READ);
	assert_matches!(
		syscalls::fd_stat_put(4, &stat, FdstatPut::RIGHTS.bits()),
		Ok(())
	);
	stat.fs_rights_base = Rights::FD_READ | Rights::FD_WRITE;
	assert_eq!(
		syscalls::fd_stat_put(4, &stat, FdstatPut::RIGHTS.bits()).err(),
		Some(Errno::Notcapable)
	);
}

#[test]
fn descriptor_passing_roundtrip() {
	let table = fresh_process();
	let (sender, receiver) = syscalls::fd_create2(FileType::SocketStream as u8).unwrap();

	let file = tempfile::tempfile().unwrap();
	let passed = import(&table, file.into_raw_fd()).unwrap();

	let sent = syscalls::sock_send(sender, &[IoSlice::new(b"x")], &[passed]).unwrap();
	assert_eq!(sent, 1);

	let mut buf = [0u8; 4];
	let mut slots = [0 as Fd; 1];
	let (received, nfds, flags) =
		syscalls::sock_recv(receiver, &mut [IoSliceMut::new(&mut buf)], &mut slots).unwrap();
	assert_eq!(received, 1);
	assert_eq!(&buf[..1], b"x");
	assert_eq!(nfds, 1);
	assert!(flags.is_empty());

	// The received descriptor is a fresh number referring to an object of
	// the same type.
	let imported = slots[0];
	assert_ne!(imported, passed);
	let stat = syscalls::fd_stat_get(imported).unwrap();
	assert_eq!(stat.fs_filetype, FileType::RegularFile);
	assert!(stat.fs_rights_base.contains(Rights::FD_READ));
}

#[test]
fn poll_reports_ready_data_before_the_clock() {
	let table = fresh_process();
	let mut pipe_fds = [0 as libc::c_int; 2];
	assert_eq!(unsafe { libc::pipe(pipe_fds.as_mut_ptr()) }, 0);
	let read_end = import(&table, pipe_fds[0]).unwrap();

	// Five bytes are in flight before the wait begins.
	assert_eq!(
		unsafe { libc::write(pipe_fds[1], b"hello".as_ptr().cast(), 5) },
		5
	);

	let subs = [
		Subscription {
			userdata: 11,
			kind: SubscriptionKind::FdRead { fd: read_end },
		},
		Subscription {
			userdata: 22,
			kind: SubscriptionKind::Clock {
				clock_id: capemu::abi::ClockId::Monotonic,
				timeout: 100_000_000,
				precision: 0,
				flags: SubClockFlags::empty(),
			},
		},
	];
	let mut events: Vec<Event> = Vec::new();
	let count = syscalls::poll(&subs, &mut events).unwrap();
	assert_eq!(count, 1);
	assert_eq!(events[0].userdata, 11);
	assert_eq!(events[0].r#type, EventType::FdRead);
	assert_eq!(events[0].error, None);
	assert_eq!(events[0].nbytes, 5);
	assert!(!events[0].hangup);

	unsafe {
		libc::close(pipe_fds[1]);
	}
}

#[test]
fn poll_reports_hangup_with_buffered_bytes() {
	let table = fresh_process();
	let mut pipe_fds = [0 as libc::c_int; 2];
	assert_eq!(unsafe { libc::pipe(pipe_fds.as_mut_ptr()) }, 0);
	let read_end = import(&table, pipe_fds[0]).unwrap();
	unsafe {
		assert_eq!(libc::write(pipe_fds[1], b"abc".as_ptr().cast(), 3), 3);
		libc::close(pipe_fds[1]);
	}

	let subs = [Subscription {
		userdata: 1,
		kind: SubscriptionKind::FdRead { fd: read_end },
	}];
	let mut events = Vec::new();
	assert_eq!(syscalls::poll(&subs, &mut events).unwrap(), 1);
	assert!(events[0].hangup);
	assert_eq!(events[0].nbytes, 3);
}

#[test]
fn closing_a_descriptor_races_cleanly_with_readers() {
	let table = fresh_process();
	let file = tempfile::tempfile().unwrap();
	let victim = import(&table, file.into_raw_fd()).unwrap();

	let reader_table = Arc::clone(&table);
	let reader = std::thread::spawn(move || {
		install(reader_table, 2);
		let mut saw_ok = 0u64;
		loop {
			let mut byte = [0u8; 1];
			match syscalls::fd_read(victim, &mut [IoSliceMut::new(&mut byte)]) {
				// End of the empty file; the descriptor is still live.
				Ok(_) => saw_ok += 1,
				Err(Errno::Badf) => break,
				Err(other) => panic!("unexpected error during close race: {other}"),
			}
		}
		// Once closed, the descriptor stays closed.
		assert_eq!(
			syscalls::fd_read(victim, &mut [IoSliceMut::new(&mut [0u8; 1])]).err(),
			Some(Errno::Badf)
		);
		saw_ok
	});

	std::thread::sleep(std::time::Duration::from_millis(20));
	syscalls::fd_close(victim).unwrap();
	let _reads_before_close = reader.join().unwrap();
}

#[test]
fn replace_installs_a_descriptor_at_an_unused_number() {
	let table = fresh_process();
	let file = tempfile::tempfile().unwrap();
	let from = import(&table, file.into_raw_fd()).unwrap();

	// The way a launcher pins a passed-in descriptor to a well-known slot:
	// the target number was never inserted.
	let to = from + 100;
	assert_eq!(table.stat(to).err(), Some(Errno::Badf));
	syscalls::fd_replace(from, to).unwrap();

	let stat = syscalls::fd_stat_get(to).unwrap();
	assert_eq!(stat.fs_filetype, FileType::RegularFile);
	// Both numbers alias one object; closing one leaves the other live.
	syscalls::fd_close(from).unwrap();
	assert!(syscalls::fd_stat_get(to).is_ok());
}

#[test]
fn seek_identity_and_tell_rights() {
	let table = fresh_process();
	let file = tempfile::tempfile().unwrap();
	let fd = import(&table, file.into_raw_fd()).unwrap();
	syscalls::fd_write(fd, &[IoSlice::new(b"0123456789")]).unwrap();

	let here = syscalls::fd_seek(fd, 0, capemu::abi::Whence::Current as u8).unwrap();
	assert_eq!(here, 10);
	// Asking again does not move the position.
	assert_eq!(
		syscalls::fd_seek(fd, 0, capemu::abi::Whence::Current as u8).unwrap(),
		10
	);
}

#[test]
fn fdstat_roundtrip_is_an_identity() {
	let table = fresh_process();
	let file = tempfile::tempfile().unwrap();
	let fd = import(&table, file.into_raw_fd()).unwrap();

	let stat = syscalls::fd_stat_get(fd).unwrap();
	syscalls::fd_stat_put(fd, &stat, FdstatPut::RIGHTS.bits()).unwrap();
	syscalls::fd_stat_put(fd, &stat, FdstatPut::FLAGS.bits()).unwrap();
	assert_eq!(syscalls::fd_stat_get(fd).unwrap(), stat);
}
