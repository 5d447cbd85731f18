//! The descriptor layer: objects, the capability table and descriptor
//! passing.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::abi::Fd;
use crate::errno::Result;

mod object;
pub mod socket;
mod table;

pub(crate) use self::object::DirStream;
pub use self::object::FdObject;
pub use self::table::{FdEntry, FdTable};

/// Classifies an owned host descriptor and inserts it into the table with
/// the maximum rights its type permits.
///
/// On failure the descriptor is closed; on success close responsibility
/// has moved to the new table entry.
pub fn import(table: &FdTable, host_fd: RawFd) -> Result<Fd> {
	match FdObject::probe(host_fd) {
		Ok((file_type, base, inheriting)) => Ok(table.insert(
			Arc::new(FdObject::new(file_type, host_fd)),
			base,
			inheriting,
		)),
		Err(err) => {
			unsafe {
				libc::close(host_fd);
			}
			Err(err)
		}
	}
}
