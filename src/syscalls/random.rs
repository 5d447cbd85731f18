//! Random data for the guest.

use crate::entropy;
use crate::errno::Result;

/// Fills the guest buffer with cryptographically secure random data.
pub fn random_get(buf: &mut [u8]) -> Result<()> {
	entropy::buf(buf);
	Ok(())
}
