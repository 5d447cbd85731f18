//! The concurrent descriptor table.
//!
//! One table exists per guest process and is shared by all of its threads.
//! It is a dense array indexed by guest descriptor number, guarded by a
//! reader-writer lock: lookups take the shared side, every structural
//! mutation the exclusive side. Object references that may drop to zero are
//! always released after the lock is gone, because closing a host
//! descriptor can block.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::abi::{Fd, Rights};
use crate::entropy;
use crate::errno::{Errno, Result};
use crate::fd::object::FdObject;

/// A populated table slot: an object reference plus the rights pair under
/// which it may be used.
#[derive(Debug, Clone)]
pub struct FdEntry {
	pub object: Arc<FdObject>,
	pub base: Rights,
	pub inheriting: Rights,
}

#[derive(Default)]
struct TableState {
	entries: Vec<Option<FdEntry>>,
	used: usize,
}

impl TableState {
	fn lookup(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<&FdEntry> {
		let entry = self
			.entries
			.get(fd as usize)
			.and_then(Option::as_ref)
			.ok_or(Errno::Badf)?;
		if entry.base.contains(base) && entry.inheriting.contains(inheriting) {
			Ok(entry)
		} else {
			Err(Errno::Notcapable)
		}
	}

	/// Ensures `entries.len() > min` and that `incr` more descriptors fit
	/// while keeping at least half of the table empty.
	fn grow(&mut self, min: usize, incr: usize) {
		let mut size = self.entries.len().max(1);
		while size <= min || size < 2 * (self.used + incr) {
			size *= 2;
		}
		if size > self.entries.len() {
			self.entries.resize_with(size, || None);
		}
	}

	/// Picks an empty slot by rejection sampling.
	///
	/// Terminates quickly because at least half of the slots are empty
	/// after [`TableState::grow`].
	fn random_empty_slot(&self) -> usize {
		loop {
			let index = entropy::uniform(self.entries.len() as u32) as usize;
			if self.entries[index].is_none() {
				return index;
			}
		}
	}

	fn attach(&mut self, index: usize, entry: FdEntry) {
		debug_assert!(self.entries[index].is_none());
		self.entries[index] = Some(entry);
		self.used += 1;
	}

	fn detach(&mut self, fd: Fd) -> Option<FdEntry> {
		let entry = self.entries.get_mut(fd as usize)?.take();
		if entry.is_some() {
			self.used -= 1;
		}
		entry
	}
}

/// The sparse mapping from guest descriptor numbers to descriptor objects
/// and rights.
#[derive(Default)]
pub struct FdTable {
	state: RwLock<TableState>,
}

impl FdTable {
	/// Creates an empty table. The launcher seeds it with
	/// [`FdTable::insert_at`].
	pub fn new() -> Self {
		Self::default()
	}

	/// Resolves `fd`, requiring the given rights, and returns one
	/// additional reference to its object.
	///
	/// This is the normal path for I/O syscalls: the table lock is released
	/// before returning, and the held reference keeps the object alive
	/// across a concurrent `close`.
	pub fn acquire(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<Arc<FdObject>> {
		let state = self.state.read();
		Ok(Arc::clone(&state.lookup(fd, base, inheriting)?.object))
	}

	/// Returns the object plus the rights pair stored for `fd`, without
	/// requiring any rights.
	pub fn stat(&self, fd: Fd) -> Result<FdEntry> {
		let state = self.state.read();
		Ok(state.lookup(fd, Rights::empty(), Rights::empty())?.clone())
	}

	/// Places an object at a randomly chosen empty slot, consuming the
	/// caller's reference.
	pub fn insert(&self, object: Arc<FdObject>, base: Rights, inheriting: Rights) -> Fd {
		let mut state = self.state.write();
		state.grow(0, 1);
		let index = state.random_empty_slot();
		state.attach(
			index,
			FdEntry {
				object,
				base,
				inheriting,
			},
		);
		index as Fd
	}

	/// Places an object at a caller-chosen descriptor number, growing the
	/// table as needed.
	///
	/// Used to seed the initial table and to implement descriptor-number
	/// preserving imports. An object already present at `fd` is replaced;
	/// its reference is released after the table lock is dropped.
	pub fn insert_at(&self, fd: Fd, object: Arc<FdObject>, base: Rights, inheriting: Rights) {
		let mut state = self.state.write();
		state.grow(fd as usize, 1);
		let previous = state.detach(fd);
		state.attach(
			fd as usize,
			FdEntry {
				object,
				base,
				inheriting,
			},
		);
		drop(state);
		drop(previous);
	}

	/// Atomically inserts two objects at two randomly chosen slots.
	pub fn insert_pair(
		&self,
		first: Arc<FdObject>,
		second: Arc<FdObject>,
		base_first: Rights,
		base_second: Rights,
		inheriting: Rights,
	) -> (Fd, Fd) {
		let mut state = self.state.write();
		state.grow(0, 2);
		let index_first = state.random_empty_slot();
		state.attach(
			index_first,
			FdEntry {
				object: first,
				base: base_first,
				inheriting,
			},
		);
		let index_second = state.random_empty_slot();
		state.attach(
			index_second,
			FdEntry {
				object: second,
				base: base_second,
				inheriting,
			},
		);
		(index_first as Fd, index_second as Fd)
	}

	/// Detaches `fd` from the table.
	///
	/// The object reference is released outside the lock; if it was the
	/// last one, the host descriptor is closed there.
	pub fn close(&self, fd: Fd) -> Result<()> {
		let mut state = self.state.write();
		let entry = state.detach(fd).ok_or(Errno::Badf)?;
		drop(state);
		drop(entry);
		Ok(())
	}

	/// Makes `to` refer to `from`'s object with `from`'s rights.
	///
	/// `to` may name any descriptor number, populated or not: an entry
	/// previously there is detached under the lock and released after it,
	/// and the table grows when `to` lies beyond its current bounds.
	pub fn replace(&self, from: Fd, to: Fd) -> Result<()> {
		let mut state = self.state.write();
		let entry = state.lookup(from, Rights::empty(), Rights::empty())?.clone();
		state.grow(to as usize, 1);
		let previous = state.detach(to);
		state.attach(to as usize, entry);
		drop(state);
		drop(previous);
		Ok(())
	}

	/// Places a new reference to `from`'s object at a random empty slot.
	pub fn dup(&self, from: Fd) -> Result<Fd> {
		let mut state = self.state.write();
		let entry = state.lookup(from, Rights::empty(), Rights::empty())?.clone();
		state.grow(0, 1);
		let index = state.random_empty_slot();
		state.attach(index, entry);
		Ok(index as Fd)
	}

	/// Narrows the rights of `fd`.
	///
	/// Both new masks must be subsets of the current ones; widening fails
	/// with *not-capable*.
	pub fn restrict_rights(&self, fd: Fd, base: Rights, inheriting: Rights) -> Result<()> {
		let mut state = self.state.write();
		state.lookup(fd, base, inheriting)?;
		let entry = state.entries[fd as usize].as_mut().unwrap();
		entry.base = base;
		entry.inheriting = inheriting;
		Ok(())
	}

	#[cfg(test)]
	fn invariants(&self) -> (usize, usize) {
		let state = self.state.read();
		let populated = state.entries.iter().filter(|e| e.is_some()).count();
		assert_eq!(populated, state.used);
		assert!(state.entries.is_empty() || state.entries.len() >= 2 * state.used);
		(state.used, state.entries.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::abi::FileType;

	fn virtual_entry() -> Arc<FdObject> {
		Arc::new(FdObject::virtual_object(FileType::SharedMemory))
	}

	#[test]
	fn lookup_on_an_empty_table_is_badf() {
		let table = FdTable::new();
		assert_eq!(
			table.acquire(0, Rights::empty(), Rights::empty()).err(),
			Some(Errno::Badf)
		);
	}

	#[test]
	fn insert_keeps_half_of_the_table_empty() {
		let table = FdTable::new();
		for _ in 0..100 {
			table.insert(virtual_entry(), Rights::FD_READ, Rights::empty());
			table.invariants();
		}
		let (used, size) = table.invariants();
		assert_eq!(used, 100);
		assert!(size >= 200);
	}

	#[test]
	fn rights_checks_fail_closed() {
		let table = FdTable::new();
		let fd = table.insert(virtual_entry(), Rights::FD_READ, Rights::empty());
		assert!(table.acquire(fd, Rights::FD_READ, Rights::empty()).is_ok());
		assert_eq!(
			table.acquire(fd, Rights::FD_WRITE, Rights::empty()).err(),
			Some(Errno::Notcapable)
		);
		assert_eq!(
			table.acquire(fd, Rights::empty(), Rights::FD_READ).err(),
			Some(Errno::Notcapable)
		);
	}

	#[test]
	fn close_detaches_and_releases() {
		let table = FdTable::new();
		let object = virtual_entry();
		let fd = table.insert(Arc::clone(&object), Rights::empty(), Rights::empty());
		assert_eq!(Arc::strong_count(&object), 2);
		table.close(fd).unwrap();
		assert_eq!(Arc::strong_count(&object), 1);
		assert_eq!(table.close(fd).err(), Some(Errno::Badf));
		table.invariants();
	}

	#[test]
	fn replace_points_both_numbers_at_one_object() {
		let table = FdTable::new();
		let a = virtual_entry();
		let b = virtual_entry();
		let fd_a = table.insert(Arc::clone(&a), Rights::FD_READ, Rights::empty());
		let fd_b = table.insert(Arc::clone(&b), Rights::FD_WRITE, Rights::empty());
		table.replace(fd_a, fd_b).unwrap();
		assert_eq!(Arc::strong_count(&a), 3);
		assert_eq!(Arc::strong_count(&b), 1);
		// The replacement carries `from`'s rights.
		assert!(table.acquire(fd_b, Rights::FD_READ, Rights::empty()).is_ok());
		table.invariants();
	}

	#[test]
	fn replace_installs_at_an_empty_slot() {
		let table = FdTable::new();
		let object = virtual_entry();
		let from = table.insert(Arc::clone(&object), Rights::FD_READ, Rights::empty());
		// A launcher-chosen number that was never inserted, well past the
		// table's current bounds.
		let to = from + 1000;
		table.replace(from, to).unwrap();
		assert_eq!(Arc::strong_count(&object), 3);
		assert!(table.acquire(to, Rights::FD_READ, Rights::empty()).is_ok());
		// Both numbers stay live aliases of the same object.
		table.close(from).unwrap();
		assert!(table.acquire(to, Rights::FD_READ, Rights::empty()).is_ok());
		table.invariants();
	}

	#[test]
	fn dup_allocates_a_fresh_number() {
		let table = FdTable::new();
		let object = virtual_entry();
		let fd = table.insert(Arc::clone(&object), Rights::FD_READ, Rights::empty());
		let dup = table.dup(fd).unwrap();
		assert_ne!(fd, dup);
		assert_eq!(Arc::strong_count(&object), 3);
		assert!(table.acquire(dup, Rights::FD_READ, Rights::empty()).is_ok());
	}

	#[test]
	fn rights_only_ever_shrink() {
		let table = FdTable::new();
		let fd = table.insert(
			virtual_entry(),
			Rights::FD_READ | Rights::FD_WRITE,
			Rights::empty(),
		);
		table
			.restrict_rights(fd, Rights::FD_READ, Rights::empty())
			.unwrap();
		assert_eq!(
			table
				.restrict_rights(fd, Rights::FD_READ | Rights::FD_WRITE, Rights::empty())
				.err(),
			Some(Errno::Notcapable)
		);
	}

	#[test]
	fn insert_at_seeds_chosen_numbers() {
		let table = FdTable::new();
		table.insert_at(3, virtual_entry(), Rights::FD_READ, Rights::empty());
		assert!(table.acquire(3, Rights::FD_READ, Rights::empty()).is_ok());
		// Reseeding the same number replaces the entry.
		table.insert_at(3, virtual_entry(), Rights::FD_WRITE, Rights::empty());
		assert!(table.acquire(3, Rights::FD_WRITE, Rights::empty()).is_ok());
		table.invariants();
	}

	#[test]
	fn insert_pair_is_atomic_and_distinct() {
		let table = FdTable::new();
		let (a, b) = table.insert_pair(
			virtual_entry(),
			virtual_entry(),
			Rights::FD_READ,
			Rights::FD_WRITE,
			Rights::empty(),
		);
		assert_ne!(a, b);
		table.invariants();
	}
}
