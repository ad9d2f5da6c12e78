//! Checked `malloc()`/`calloc()`/`realloc()`/`free()` for code that manages
//! memory by hand.
//!
//! Every allocation goes through a [`Tracker`], which
//!
//! - refuses to hand out `NULL`: allocation failure is an error (or, if you
//!   ask for it, an immediate `abort()`);
//! - counts allocations and releases, so that [`Tracker::leak_check()`] can
//!   tell whether they match up;
//! - optionally remembers up to `capacity` outstanding pointers, all of which
//!   can be released at once with [`Tracker::drain_all()`].
//!
//! [`externc`] exposes the same operations to C.

pub mod alloc;
pub mod config;
pub mod error;
pub mod externc;
pub mod logging;
pub mod util;

pub use alloc::{
    counters::Counters,
    registry::{Handle, Registry},
    tracker::Tracker,
};
pub use config::{FailurePolicy, TrackerConfig};
pub use error::{Error, Result};
