//! Random data plumbing.
//!
//! Guest-visible random bytes come from the operating system's entropy
//! source. Descriptor-slot selection only needs uniformity, not secrecy,
//! and uses the thread-local generator.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Fills `buf` with cryptographically secure random data.
pub fn buf(buf: &mut [u8]) {
	OsRng.fill_bytes(buf);
}

/// Returns a uniformly distributed value in `[0, upper)`.
///
/// `upper` must be non-zero.
pub(crate) fn uniform(upper: u32) -> u32 {
	rand::thread_rng().gen_range(0..upper)
}
