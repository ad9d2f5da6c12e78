//! A bounded table of outstanding allocations that can be released in one go.
//!
//! The registry owns nothing until it is drained: every tracked pointer is
//! still a perfectly normal allocation that the caller may use and release.
//! [`Registry::drain_all()`] is the only place the registry frees memory.
//!
//! ```plaintext
//!          cursor ---------------+
//!                                v
//! +------+------+------+------+------+------+
//! | 0x10 | None | 0x30 | 0x40 |  ..  |  ..  |   capacity = 6
//! +------+------+------+------+------+------+
//!           ^
//!           +-- vacant: reused before the cursor moves again
//! ```
//!
//! Slots are indexed by address as well, so substituting a pointer after a
//! `realloc()` (or untracking one on release) does not scan the table.

use std::ptr::NonNull;

use hashbrown::HashMap;
use log::{debug, info, warn};

use crate::{
    alloc::manual,
    error::{Error, Result},
    util::hint::cold,
};

/// Names a slot in a [`Registry`]. A handle goes stale once its slot is
/// emptied (by untracking or draining), even if the slot is later reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    slot: usize,
    generation: u32,
}

impl Handle {
    pub const fn slot(&self) -> usize {
        self.slot
    }
}

#[derive(Debug)]
struct Slot {
    ptr: Option<NonNull<u8>>,
    /// Bumped every time the slot is emptied
    generation: u32,
}

#[derive(Debug)]
pub struct Registry {
    capacity: usize,
    slots: Vec<Slot>,
    /// Next slot that has not been written since the last drain
    cursor: usize,
    /// Emptied slots below `cursor`
    vacant: Vec<usize>,
    /// address -> slot
    index: HashMap<usize, usize>,
    /// Pointers refused since the current overflow began. Back to zero as
    /// soon as a pointer is tracked again.
    untracked: usize,
}

impl Registry {
    /// A registry holding at most `capacity` pointers at once. A capacity of
    /// zero disables tracking altogether.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            cursor: 0,
            vacant: Vec::new(),
            index: HashMap::new(),
            untracked: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub const fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    pub const fn untracked(&self) -> usize {
        self.untracked
    }

    /// Number of pointers currently tracked
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.vacant.is_empty() && self.cursor >= self.capacity
    }

    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.index.contains_key(&(ptr.as_ptr() as usize))
    }

    pub fn get(&self, handle: Handle) -> Option<NonNull<u8>> {
        let slot = self.slots.get(handle.slot)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.ptr
    }

    /// Tracked pointers, in slot order
    pub fn iter(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        self.slots[..self.cursor].iter().filter_map(|slot| slot.ptr)
    }

    fn handle(&self, slot: usize) -> Handle {
        Handle {
            slot,
            generation: self.slots[slot].generation,
        }
    }

    fn empty_slot(&mut self, slot: usize) {
        let slot = &mut self.slots[slot];
        slot.ptr = None;
        slot.generation = slot.generation.wrapping_add(1);
    }

    /// Track `ptr`. Once every slot is taken the pointer is refused: it is
    /// not stored and not released, and the overflow count goes up.
    ///
    /// # Safety
    ///
    /// - `ptr` must be a live block from the C allocator (see
    ///   [`manual`]), which from now on is only released through
    ///   [`Registry::untrack()`] + `free()`, or through
    ///   [`Registry::drain_all()`].
    pub unsafe fn register(&mut self, ptr: NonNull<u8>) -> Result<Handle> {
        if !self.is_enabled() {
            return Err(Error::TrackingDisabled);
        }

        let address = ptr.as_ptr() as usize;
        if let Some(stale) = self.index.remove(&address) {
            // The C allocator handed out an address we still hold, so that
            // block was freed behind our back.
            debug!("dropping stale registry entry for {:p}", ptr);
            self.empty_slot(stale);
            self.vacant.push(stale);
        }

        let slot = if let Some(slot) = self.vacant.pop() {
            slot
        } else if self.cursor < self.capacity {
            let slot = self.cursor;
            if slot == self.slots.len() {
                self.slots.push(Slot {
                    ptr: None,
                    generation: 0,
                });
            }
            self.cursor += 1;
            slot
        } else {
            return cold(|| {
                self.untracked += 1;
                warn!("{} pointers unable to track", self.untracked);
                Err(Error::RegistryOverflow {
                    untracked: self.untracked,
                })
            });
        };

        self.untracked = 0;
        self.slots[slot].ptr = Some(ptr);
        self.index.insert(address, slot);
        Ok(self.handle(slot))
    }

    /// Stop tracking `ptr` without releasing it. Returns whether it was
    /// tracked.
    pub fn untrack(&mut self, ptr: NonNull<u8>) -> bool {
        match self.index.remove(&(ptr.as_ptr() as usize)) {
            Some(slot) => {
                self.empty_slot(slot);
                self.vacant.push(slot);
                true
            }
            None => false,
        }
    }

    /// Every slot holding `old` holds `new` instead. Returns how many slots
    /// changed (at most one, since an address is only ever tracked once).
    ///
    /// # Safety
    ///
    /// - `new` must satisfy the contract of [`Registry::register()`]
    pub unsafe fn substitute(&mut self, new: NonNull<u8>, old: NonNull<u8>) -> usize {
        if new == old {
            return 0;
        }
        let Some(slot) = self.index.remove(&(old.as_ptr() as usize)) else {
            return 0;
        };
        if let Some(stale) = self.index.insert(new.as_ptr() as usize, slot) {
            debug!("dropping stale registry entry for {:p}", new);
            self.empty_slot(stale);
            self.vacant.push(stale);
        }
        self.slots[slot].ptr = Some(new);
        1
    }

    /// Point the slot behind `handle` at `new`. Returns `false` (and changes
    /// nothing) if the handle is stale.
    ///
    /// # Safety
    ///
    /// - `new` must satisfy the contract of [`Registry::register()`]
    pub unsafe fn update(&mut self, handle: Handle, new: NonNull<u8>) -> bool {
        let Some(old) = self.get(handle) else {
            return false;
        };
        // SAFETY: requirement passed to caller
        unsafe { self.substitute(new, old) };
        true
    }

    /// Release every tracked pointer, then start over with an empty registry:
    /// the cursor and the overflow count go back to zero, and all handles go
    /// stale. Returns how many pointers were released.
    pub fn drain_all(&mut self) -> usize {
        if !self.is_enabled() {
            return 0;
        }

        info!("Cleanup protocol. Releasing pointers...");
        let mut released = 0;
        for slot in 0..self.cursor {
            if let Some(ptr) = self.slots[slot].ptr {
                info!("Release {:p}", ptr);
                // SAFETY: `register()` requires tracked pointers to be live C
                // allocations that are only released through us
                unsafe { manual::free(ptr) };
                released += 1;
            }
            self.empty_slot(slot);
        }

        self.index.clear();
        self.vacant.clear();
        self.cursor = 0;
        self.untracked = 0;
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> NonNull<u8> {
        manual::malloc(8).expect("8 bytes should be available")
    }

    #[test]
    fn disabled_registry_refuses_everything() {
        let mut registry = Registry::disabled();
        let ptr = block();
        assert_eq!(
            unsafe { registry.register(ptr) },
            Err(Error::TrackingDisabled)
        );
        assert_eq!(registry.drain_all(), 0);
        assert_eq!(registry.untracked(), 0);
        unsafe { manual::free(ptr) };
    }

    #[test]
    fn overflow_is_counted_and_pointer_is_not_stored() {
        let mut registry = Registry::new(1);
        let (a, b, c) = (block(), block(), block());
        unsafe { registry.register(a) }.unwrap();
        assert!(registry.is_full());
        assert_eq!(
            unsafe { registry.register(b) },
            Err(Error::RegistryOverflow { untracked: 1 })
        );
        assert_eq!(
            unsafe { registry.register(c) },
            Err(Error::RegistryOverflow { untracked: 2 })
        );
        assert_eq!(registry.cursor(), 1);
        assert!(!registry.contains(b));

        assert_eq!(registry.drain_all(), 1);
        unsafe {
            manual::free(b);
            manual::free(c);
        }
    }

    #[test]
    fn overflow_count_restarts_once_there_is_room_again() {
        let mut registry = Registry::new(1);
        let (a, b, c, d) = (block(), block(), block(), block());
        unsafe { registry.register(a) }.unwrap();
        assert_eq!(
            unsafe { registry.register(b) },
            Err(Error::RegistryOverflow { untracked: 1 })
        );

        assert!(registry.untrack(a));
        unsafe { registry.register(c) }.unwrap();
        assert_eq!(registry.untracked(), 0);
        assert_eq!(
            unsafe { registry.register(d) },
            Err(Error::RegistryOverflow { untracked: 1 })
        );

        assert_eq!(registry.drain_all(), 1);
        unsafe {
            manual::free(a);
            manual::free(b);
            manual::free(d);
        }
    }

    #[test]
    fn untracked_slots_are_reused_before_the_cursor_moves() {
        let mut registry = Registry::new(2);
        let (a, b, c) = (block(), block(), block());
        let ha = unsafe { registry.register(a) }.unwrap();
        unsafe { registry.register(b) }.unwrap();
        assert!(registry.untrack(a));
        assert!(!registry.untrack(a));
        assert_eq!(registry.get(ha), None);

        let hc = unsafe { registry.register(c) }.unwrap();
        assert_eq!(hc.slot(), ha.slot());
        assert_ne!(hc, ha);
        assert_eq!(registry.cursor(), 2);

        assert_eq!(registry.drain_all(), 2);
        unsafe { manual::free(a) };
    }

    #[test]
    fn substitute_and_update_follow_moved_blocks() {
        let mut registry = Registry::new(4);
        let (a, b, c) = (block(), block(), block());
        let ha = unsafe { registry.register(a) }.unwrap();

        assert_eq!(unsafe { registry.substitute(b, a) }, 1);
        assert_eq!(registry.get(ha), Some(b));
        assert!(!registry.contains(a));
        assert_eq!(unsafe { registry.substitute(b, a) }, 0);

        assert!(unsafe { registry.update(ha, c) });
        assert_eq!(registry.iter().collect::<Vec<_>>(), vec![c]);

        assert_eq!(registry.drain_all(), 1);
        unsafe {
            manual::free(a);
            manual::free(b);
        }
    }

    #[test]
    fn drain_resets_capacity_and_is_idempotent() {
        let mut registry = Registry::new(2);
        let (a, b, c) = (block(), block(), block());
        let ha = unsafe { registry.register(a) }.unwrap();
        unsafe { registry.register(b) }.unwrap();
        assert!(unsafe { registry.register(c) }.is_err());

        assert_eq!(registry.drain_all(), 2);
        assert_eq!(registry.drain_all(), 0);
        assert!(registry.is_empty());
        assert_eq!(registry.cursor(), 0);
        assert_eq!(registry.untracked(), 0);
        assert_eq!(registry.get(ha), None);

        unsafe { registry.register(c) }.unwrap();
        assert_eq!(registry.drain_all(), 1);
    }
}
