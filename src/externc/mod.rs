//! The C interface: `safe_malloc()` and friends, backed by one [`Tracker`]
//! per thread.
//!
//! The thread's tracker is configured from `SAFEALLOC_*` environment variables
//! on first use, except that allocation failure aborts unless
//! `SAFEALLOC_ON_FAILURE=return` says otherwise. Use [`install()`] to swap in
//! a differently configured tracker.
//!
//! First use also installs `env_logger` (see [`crate::logging::init()`]), so
//! reports reach stderr without the C side doing anything. `RUST_LOG`
//! controls how much is printed.

use std::{cell::RefCell, ptr::NonNull};

use libc::{c_int, c_void, size_t};
use log::warn;

use crate::{
    alloc::tracker::Tracker,
    config::{FailurePolicy, TrackerConfig},
    logging,
};

thread_local! {
    static TRACKER: RefCell<Tracker> = RefCell::new(default_tracker());
}

fn default_tracker() -> Tracker {
    logging::init();
    let base = TrackerConfig::new().with_failure_policy(FailurePolicy::Abort);
    let config = base.with_env_overrides().unwrap_or_else(|e| {
        warn!("{e}, using defaults");
        base
    });
    Tracker::new(config)
}

fn with_tracker<R>(f: impl FnOnce(&mut Tracker) -> R) -> R {
    TRACKER.with(|tracker| f(&mut *tracker.borrow_mut()))
}

/// Replace this thread's tracker, returning the old one. Whatever the old
/// tracker was tracking stays allocated.
pub fn install(tracker: Tracker) -> Tracker {
    TRACKER.with(|current| current.replace(tracker))
}

fn to_c(data: Option<NonNull<u8>>) -> *mut c_void {
    data.map_or(std::ptr::null_mut(), |data| data.as_ptr() as *mut c_void)
}

#[no_mangle]
pub extern "C" fn safe_malloc(bytes: size_t) -> *mut c_void {
    to_c(with_tracker(|tracker| tracker.allocate(bytes)).ok())
}

#[no_mangle]
pub extern "C" fn safe_calloc(n: size_t, bytes: size_t) -> *mut c_void {
    to_c(with_tracker(|tracker| tracker.allocate_zeroed(n, bytes)).ok())
}

/// # Safety
///
/// - `ptr` must be `NULL` or a live block from this thread's `safe_*()`
///   functions
#[no_mangle]
pub unsafe extern "C" fn safe_free(ptr: *mut c_void) {
    with_tracker(|tracker| unsafe { tracker.release(ptr as *mut u8) })
}

/// `NULL` when used as `free()` or when the block cannot be resized (in which
/// case `old` is still live).
///
/// # Safety
///
/// - Same as [`safe_free()`]
#[no_mangle]
pub unsafe extern "C" fn safe_realloc(old: *mut c_void, bytes: size_t) -> *mut c_void {
    let resized = with_tracker(|tracker| unsafe { tracker.resize(old as *mut u8, bytes) });
    to_c(resized.ok().flatten())
}

/// Install the stderr logger. Only needed to see output before the first
/// `safe_*()` call; calling it again does nothing.
#[no_mangle]
pub extern "C" fn safealloc_init_logging() {
    logging::init();
}

/// 0 if allocations match releases, 1 otherwise
#[no_mangle]
pub extern "C" fn leakcheck() -> c_int {
    match with_tracker(Tracker::leak_check) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// `NULL` releases everything tracked and returns 0. Anything else is
/// tracked: 0 if there was room, 1 if not (or tracking is off).
///
/// # Safety
///
/// - A non-`NULL` `check` must be a live block from the C allocator that is
///   only released through this thread's `safe_*()` functions
#[no_mangle]
pub unsafe extern "C" fn cleanup(check: *mut c_void) -> c_int {
    match NonNull::new(check as *mut u8) {
        None => {
            with_tracker(Tracker::drain_all);
            0
        }
        Some(check) => match with_tracker(|tracker| unsafe { tracker.register(check) }) {
            Ok(_) => 0,
            Err(_) => 1,
        },
    }
}

/// Track `newptr` wherever `oldptr` was tracked. A `NULL` `newptr` just
/// stops tracking `oldptr` (without releasing it).
///
/// # Safety
///
/// - A non-`NULL` `newptr` must satisfy the same contract as in [`cleanup()`]
#[no_mangle]
pub unsafe extern "C" fn replace(newptr: *mut c_void, oldptr: *mut c_void) {
    let Some(old) = NonNull::new(oldptr as *mut u8) else {
        return;
    };
    match NonNull::new(newptr as *mut u8) {
        Some(new) => {
            with_tracker(|tracker| unsafe { tracker.substitute(new, old) });
        }
        None => {
            with_tracker(|tracker| tracker.untrack(old));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use super::*;

    // `install` gives each test a fresh tracker, whichever thread it runs on.
    fn tracked(capacity: usize) {
        install(Tracker::new(TrackerConfig::new().with_capacity(capacity)));
    }

    #[test]
    fn malloc_free_balance() {
        tracked(0);
        let data = safe_malloc(16);
        assert!(!data.is_null());
        unsafe { safe_free(data) };
        unsafe { safe_free(ptr::null_mut()) };
        assert_eq!(leakcheck(), 0);
    }

    #[test]
    fn leakcheck_drains_tracked_pointers() {
        tracked(4);
        let a = safe_calloc(2, 8);
        let _b = safe_malloc(8);
        unsafe { safe_free(a) };
        assert_eq!(leakcheck(), 1);
        with_tracker(|tracker| assert!(tracker.registry().is_empty()));
    }

    #[test]
    fn realloc_edge_cases() {
        tracked(2);
        let data = unsafe { safe_realloc(ptr::null_mut(), 8) };
        assert!(!data.is_null());
        assert!(unsafe { safe_realloc(data, usize::MAX) }.is_null());
        let data = unsafe { safe_realloc(data, 64) };
        assert!(!data.is_null());
        assert!(unsafe { safe_realloc(data, 0) }.is_null());
        assert_eq!(leakcheck(), 0);
    }

    #[test]
    fn cleanup_registers_and_drains() {
        tracked(1);
        let a = crate::alloc::manual::malloc(8).unwrap().as_ptr() as *mut c_void;
        let b = crate::alloc::manual::malloc(8).unwrap().as_ptr() as *mut c_void;
        let c = crate::alloc::manual::malloc(8).unwrap().as_ptr() as *mut c_void;
        assert_eq!(unsafe { cleanup(a) }, 0);
        assert_eq!(unsafe { cleanup(b) }, 1);
        unsafe { replace(c, a) };
        with_tracker(|tracker| {
            assert!(tracker.registry().contains(NonNull::new(c as *mut u8).unwrap()))
        });
        assert_eq!(unsafe { cleanup(ptr::null_mut()) }, 0);
        unsafe {
            libc::free(a);
            libc::free(b);
        }
    }

    #[test]
    fn first_call_installs_a_logger() {
        tracked(0);
        let data = safe_malloc(8);
        assert_ne!(log::max_level(), log::LevelFilter::Off);
        unsafe { safe_free(data) };
        assert_eq!(leakcheck(), 0);
    }

    #[test]
    fn replace_with_null_untracks() {
        tracked(2);
        let a = safe_malloc(8);
        unsafe { replace(ptr::null_mut(), a) };
        with_tracker(|tracker| assert!(tracker.registry().is_empty()));
        // Drain must leave `a` alone now
        assert_eq!(unsafe { cleanup(ptr::null_mut()) }, 0);
        unsafe {
            a.cast::<u8>().write_bytes(1, 8);
            safe_free(a);
        }
        assert_eq!(leakcheck(), 0);
    }

    #[test]
    fn cleanup_without_tracking_refuses_pointers() {
        tracked(0);
        let a = safe_malloc(8);
        assert_eq!(unsafe { cleanup(a) }, 1);
        unsafe { safe_free(a) };
        assert_eq!(leakcheck(), 0);
    }
}
