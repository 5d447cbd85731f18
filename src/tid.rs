//! Guest thread-id pool.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::abi::Tid;

/// Tid 1 belongs to the initial thread installed by the launcher.
static NEXT_TID: AtomicU32 = AtomicU32::new(2);

/// Hands out a fresh guest thread identifier.
pub fn allocate() -> Tid {
	NEXT_TID.fetch_add(1, Ordering::Relaxed)
}
