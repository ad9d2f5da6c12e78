//! Checked `malloc()`, `calloc()`, `realloc()` and `free()`, counted, and
//! (when the registry is enabled) tracked so that everything can be released
//! in one pass.
//!
//! A [`Tracker`] is plain single-threaded state: it holds raw pointers, so it
//! is neither `Send` nor `Sync`, and every operation takes `&mut self`.
//!
//! ```no_run
//! use safealloc::{Tracker, TrackerConfig};
//!
//! let mut tracker = Tracker::new(TrackerConfig::new().with_capacity(16));
//! let data = tracker.allocate(64).unwrap();
//! unsafe { tracker.release(data.as_ptr()) };
//! assert!(tracker.leak_check().is_ok());
//! ```

use std::{process, ptr::NonNull};

use log::{error, info, warn};

use crate::{
    alloc::{
        counters::Counters,
        manual,
        registry::{Handle, Registry},
    },
    config::{FailurePolicy, TrackerConfig},
    error::{Error, Result},
    util::hint::cold,
};

#[derive(Debug)]
pub struct Tracker {
    counters: Counters,
    registry: Registry,
    on_failure: FailurePolicy,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            counters: Counters::new(),
            registry: Registry::new(config.capacity),
            on_failure: config.on_failure,
        }
    }

    /// Build a tracker from `SAFEALLOC_*` environment variables
    pub fn from_env() -> Result<Self> {
        TrackerConfig::from_env().map(Self::new)
    }

    pub const fn counters(&self) -> &Counters {
        &self.counters
    }

    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    pub const fn failure_policy(&self) -> FailurePolicy {
        self.on_failure
    }

    /// Common tail of `allocate()` and `allocate_zeroed()`
    fn checked(&mut self, data: Option<NonNull<u8>>, size: usize) -> Result<NonNull<u8>> {
        let Some(data) = data else {
            return cold(|| {
                error!("Memory allocation returned a null pointer, no space left!");
                match self.on_failure {
                    FailurePolicy::Abort => process::abort(),
                    FailurePolicy::Return => Err(Error::AllocationFailed { size }),
                }
            });
        };

        if self.registry.is_enabled() {
            // SAFETY: fresh C allocation, and we only ever release tracked
            // pointers through the registry. Overflow has been reported, and
            // the allocation is still good.
            let _ = unsafe { self.registry.register(data) };
        }
        self.counters.record_allocation();
        Ok(data)
    }

    /// `malloc(size)`. The memory is uninitialized.
    ///
    /// # Errors
    ///
    /// - [`Error::AllocationFailed`] if the C allocator returns `NULL` (under
    ///   [`FailurePolicy::Abort`] the process is aborted instead)
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let data = manual::malloc(size);
        self.checked(data, size)
    }

    /// `calloc(count, size_each)`. An overflowing `count * size_each` is an
    /// allocation failure.
    pub fn allocate_zeroed(&mut self, count: usize, size_each: usize) -> Result<NonNull<u8>> {
        let data = manual::calloc(count, size_each);
        self.checked(data, count.saturating_mul(size_each))
    }

    /// `free(data)`. Releasing `NULL` does nothing and is not counted.
    ///
    /// # Safety
    ///
    /// - `data` must be `NULL` or a live block from this tracker
    /// - `data` is dangling after this call
    pub unsafe fn release(&mut self, data: *mut u8) {
        let Some(data) = NonNull::new(data) else {
            return;
        };
        self.registry.untrack(data);
        // SAFETY: requirement passed to caller
        unsafe { manual::free(data) };
        self.counters.record_release();
    }

    /// `realloc(data, new_size)`, with the C edge cases spelled out:
    ///
    /// - `new_size == 0` releases `data` and returns `Ok(None)`
    /// - `data == NULL` is an ordinary [`Tracker::allocate()`]
    ///
    /// Neither counter moves for an actual resize.
    ///
    /// # Errors
    ///
    /// - [`Error::ResizeFailed`] if the block cannot be resized. `data` is
    ///   still live, still counted and still yours to release.
    /// - Whatever [`Tracker::allocate()`] returns, for `data == NULL`
    ///
    /// # Safety
    ///
    /// - `data` must be `NULL` or a live block from this tracker
    /// - on `Ok(_)`, `data` is dangling (unless it was `NULL`)
    pub unsafe fn resize(&mut self, data: *mut u8, new_size: usize) -> Result<Option<NonNull<u8>>> {
        if new_size == 0 {
            warn!("Careful! Using realloc as free. Null pointer returned.");
            // SAFETY: requirement passed to caller
            unsafe { self.release(data) };
            return Ok(None);
        }

        let Some(old) = NonNull::new(data) else {
            warn!("Careful! Using realloc as malloc.");
            return self.allocate(new_size).map(Some);
        };

        // SAFETY: requirement passed to caller
        let Some(new) = (unsafe { manual::realloc(old, new_size) }) else {
            return cold(|| {
                error!("Could not reallocate the array, old contents returned.");
                Err(Error::ResizeFailed { size: new_size })
            });
        };

        if new != old {
            // SAFETY: `new` replaces `old`, which was a tracked (or
            // untracked) live block
            unsafe { self.registry.substitute(new, old) };
        }
        Ok(Some(new))
    }

    /// Track an allocation that did not come through this tracker.
    ///
    /// # Safety
    ///
    /// - Same contract as [`Registry::register()`]
    pub unsafe fn register(&mut self, data: NonNull<u8>) -> Result<Handle> {
        // SAFETY: requirement passed to caller
        unsafe { self.registry.register(data) }
    }

    /// # Safety
    ///
    /// - Same contract as [`Registry::substitute()`]
    pub unsafe fn substitute(&mut self, new: NonNull<u8>, old: NonNull<u8>) -> usize {
        // SAFETY: requirement passed to caller
        unsafe { self.registry.substitute(new, old) }
    }

    /// Forget `data` without releasing it. Returns whether it was tracked.
    pub fn untrack(&mut self, data: NonNull<u8>) -> bool {
        self.registry.untrack(data)
    }

    /// Release everything the registry holds. Releases made this way are not
    /// counted, since the caller never released those pointers.
    pub fn drain_all(&mut self) -> usize {
        self.registry.drain_all()
    }

    /// Compare allocations with releases. A mismatch is reported and, with
    /// tracking enabled, every tracked pointer is released as a last resort.
    ///
    /// # Errors
    ///
    /// - [`Error::LeakMismatch`] with the exact counts, whether or not the
    ///   drain released anything
    pub fn leak_check(&mut self) -> Result<()> {
        if self.counters.is_balanced() {
            info!("Allocations match releases.");
            return Ok(());
        }

        let mismatch = |drained| Error::LeakMismatch {
            allocations: self.counters.allocations(),
            releases: self.counters.releases(),
            drained,
        };
        warn!("{}", mismatch(0));
        let drained = self.registry.drain_all();
        Err(mismatch(drained))
    }
}
