//! Unchecked delegation to the C allocator. Nothing here counts, tracks or
//! logs anything -- that is [`super::tracker::Tracker`]'s job. Every function
//! returns `None` where the C function would have returned `NULL`.

use std::ptr::NonNull;

use crate::util::hint::cold;

pub(crate) mod c {
    pub use libc::{c_void, calloc, free, malloc, realloc, size_t};
}

/// Zero-sized requests are bumped to a single byte, so that a successful
/// allocation is never `NULL` and always has a distinct address.
fn nonzero(size: usize) -> usize {
    size.max(1)
}

/// Plain `malloc()`. The returned memory is uninitialized.
pub fn malloc(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: `malloc()` can be called with any size
    let data = unsafe { c::malloc(nonzero(size) as c::size_t) };
    match NonNull::new(data as *mut u8) {
        Some(data) => Some(data),
        None => cold(|| None),
    }
}

/// Plain `calloc()`. An overflowing `count * size` is reported by the C
/// allocator as a failure, so it comes back as `None` as well.
pub fn calloc(count: usize, size: usize) -> Option<NonNull<u8>> {
    let (count, size) = if count == 0 || size == 0 {
        (1, 1)
    } else {
        (count, size)
    };
    // SAFETY: `calloc()` can be called with any count and size
    let data = unsafe { c::calloc(count as c::size_t, size as c::size_t) };
    match NonNull::new(data as *mut u8) {
        Some(data) => Some(data),
        None => cold(|| None),
    }
}

/// Plain `realloc()` of a live block. On `None`, `data` is untouched and still
/// owned by the caller.
///
/// # Safety
///
/// - `data` must have been returned by [`malloc`], [`calloc`] or [`realloc`]
///   and not yet been passed to [`free`] (or to a `realloc` that moved it).
pub unsafe fn realloc(data: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
    // SAFETY: requirement passed to caller
    let new_data = unsafe { c::realloc(data.as_ptr() as *mut c::c_void, nonzero(size)) };
    match NonNull::new(new_data as *mut u8) {
        Some(new_data) => Some(new_data),
        None => cold(|| None),
    }
}

/// # Safety
///
/// - `data` must be a live block from this module's allocation functions
/// - `data` is dangling after this call
pub unsafe fn free(data: NonNull<u8>) {
    unsafe { c::free(data.as_ptr() as *mut c::c_void) }
}
