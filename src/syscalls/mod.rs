//! The guest syscall surface.
//!
//! One entry per guest syscall, grouped by subject area. Every entry
//! follows the same shape: translate enum-like arguments (unknown values
//! are *invalid-argument*), acquire the descriptor or path lease with the
//! exact rights the operation needs, perform the host call, translate the
//! result, release what was acquired.

pub use self::clock::*;
pub use self::descriptor::*;
pub use self::fs::*;
pub use self::mman::*;
pub use self::random::*;
pub use self::socket::*;
pub use self::sync::*;
pub use self::tasks::*;
pub use crate::poll::poll;

mod clock;
mod descriptor;
mod fs;
mod mman;
mod random;
mod socket;
mod sync;
mod tasks;
