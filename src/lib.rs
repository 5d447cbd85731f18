//! A user-space emulator for a capability-oriented POSIX-like syscall ABI.
//!
//! Guest programs compiled against the guest ABI cannot name resources by
//! global identity: there are no absolute paths, no process ids and no
//! ambient authority. Every operation is authorised by a guest-visible file
//! descriptor carrying an explicit rights bitmask. This crate translates
//! each guest syscall into host operations while preserving that capability
//! discipline.
//!
//! The interesting machinery lives in four places:
//!
//! - [`fd`]: the reference-counted descriptor table mapping guest
//!   descriptor numbers to host descriptors plus per-descriptor rights.
//! - [`path`]: a user-space emulation of an "openat confined to a
//!   directory" primitive, including symlink expansion with cycle
//!   detection and `..` containment.
//! - [`poll`]: the unified event-wait primitive multiplexing timed sleeps,
//!   futex waits and host-descriptor readiness.
//! - [`syscalls`]: one entry per guest syscall, tying argument translation,
//!   rights checks and error-code mapping together.
//!
//! The futex/condvar scheduler, the TLS bootstrap for new guest threads and
//! the host-side launcher are collaborators outside this crate; their
//! interfaces are the [`synch::Scheduler`] trait and the seeding operations
//! on [`fd::FdTable`].

#![warn(rust_2018_idioms)]

// EXTERNAL CRATES
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

#[macro_use]
mod macros;

pub mod abi;
mod entropy;
pub mod errno;
pub mod fd;
pub mod path;
pub mod poll;
pub mod synch;
pub mod syscalls;
pub mod thread;
mod tid;
pub mod time;

pub use crate::abi::{Fd, Tid};
pub use crate::errno::{Errno, Result};
