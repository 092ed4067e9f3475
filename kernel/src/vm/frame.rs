//! Frame table and eviction engine.
//!
//! The table maps every frame currently lent to user pages back to its
//! occupant, and reclaims one with a clock (second-chance) sweep when the
//! pool runs dry. The `BTreeMap` keyed by physical base is the
//! authoritative store; `clock` is a derived circular visiting order with a
//! private cursor.

use crate::mem::FramePool;
use crate::paging::{AddressSpaceId, PageDirectory};
use crate::vm::page::{PageOrigin, PageRef};
use crate::vm::swap::SwapStore;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ptr::NonNull;
use marrowos_shared::mem::PAGE_FRAME_SIZE;

/// One physical frame currently allocated to user space.
pub struct FrameEntry {
    /// Back-reference to the descriptor resident here. `None` only while
    /// the frame is being filled or torn down.
    occupant: Option<PageRef>,
    /// Whose hardware table the occupant's mapping is installed in.
    owner: AddressSpaceId,
    /// A pinned frame is exempt from eviction; the fault path pins a frame
    /// for the duration of filling it.
    pinned: bool,
}

pub struct FrameTable {
    pool: FramePool,
    /// Authoritative store, keyed by physical base address.
    entries: BTreeMap<usize, FrameEntry>,
    /// Circular visiting order for the clock sweep.
    clock: Vec<usize>,
    cursor: usize,
}

impl FrameTable {
    pub fn new(pool: FramePool) -> Self {
        Self {
            pool,
            entries: BTreeMap::new(),
            clock: Vec::new(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Obtains a frame for `owner`, zeroed if requested. Falls back to
    /// eviction when the pool is exhausted; that is the normal reaction to
    /// memory pressure, not an error. The returned frame is pinned and has
    /// no occupant yet; the caller fills it, installs the mapping, records
    /// the occupant, and unpins.
    pub fn allocate(
        &mut self,
        pagedir: &dyn PageDirectory,
        swap: &SwapStore,
        owner: AddressSpaceId,
        zero: bool,
    ) -> usize {
        let base = match self.pool.try_get(zero) {
            Some(frame) => frame.as_ptr() as usize,
            None => {
                let base = self.evict(pagedir, swap);
                if zero {
                    // SAFETY: the reclaimed frame belongs to the pool and is
                    // unmapped and unreferenced since eviction.
                    unsafe { (base as *mut u8).write_bytes(0, PAGE_FRAME_SIZE) };
                }
                base
            }
        };

        self.entries.insert(
            base,
            FrameEntry {
                occupant: None,
                owner,
                pinned: true,
            },
        );
        self.clock.push(base);
        base
    }

    /// Returns an unoccupied frame to the pool immediately, without
    /// eviction. Used when installing the mapping fails.
    pub fn free(&mut self, base: usize) {
        let entry = self.entries.remove(&base).expect("freeing an unknown frame");
        debug_assert!(entry.occupant.is_none(), "freeing an occupied frame");
        self.remove_from_clock(base);
        self.pool
            .release(NonNull::new(base as *mut u8).expect("frame base is null"));
    }

    /// Temporarily exempts a frame from eviction (or re-admits it).
    pub fn set_pinned(&mut self, base: usize, pinned: bool) {
        let entry = self
            .entries
            .get_mut(&base)
            .expect("pinning an unknown frame");
        entry.pinned = pinned;
    }

    /// Records the descriptor now resident in `base`. The descriptor's own
    /// `frame` field must already point back at `base`.
    pub fn set_occupant(&mut self, base: usize, page: PageRef) {
        let entry = self
            .entries
            .get_mut(&base)
            .expect("no frame entry at this base");
        debug_assert!(entry.occupant.is_none(), "frame already has an occupant");
        debug_assert!(page.lock().frame() == Some(base));
        entry.occupant = Some(page);
    }

    /// Clock sweep. Advances the cursor over the visiting order, giving a
    /// second chance to any frame whose accessed bit is set (clearing it),
    /// skipping pinned frames, and evicting the first frame found unset.
    /// Anonymous victims (and dirty file-backed ones) are written to swap;
    /// clean file-backed victims are discarded, their contents re-derivable
    /// from the file. Panics after two full passes without a victim: the
    /// kernel has no memory strategy left.
    fn evict(&mut self, pagedir: &dyn PageDirectory, swap: &SwapStore) -> usize {
        assert!(!self.clock.is_empty(), "eviction with no allocated frames");

        let limit = 2 * self.clock.len();
        for _ in 0..limit {
            let base = self.clock[self.cursor];
            self.cursor = (self.cursor + 1) % self.clock.len();

            let entry = self.entries.get(&base).expect("clock order out of sync");
            if entry.pinned {
                continue;
            }
            let Some(page) = entry.occupant.clone() else {
                // Mid-setup or mid-teardown; not a candidate.
                continue;
            };
            let owner = entry.owner;

            let mut desc = page.lock();
            let vaddr = desc.vaddr();

            if pagedir.is_accessed(owner, vaddr) {
                // Second chance: referenced since we last looked.
                pagedir.clear_accessed(owner, vaddr);
                continue;
            }

            // Victim found. Decide where its contents go before the mapping
            // (and with it the dirty bit) disappears.
            let write_back = match desc.origin() {
                PageOrigin::FileBacked { .. } => pagedir.is_dirty(owner, vaddr),
                _ => true,
            };
            if write_back {
                // SAFETY: base is a pool frame; its occupant is about to be
                // unmapped and no other path touches it under the frame lock.
                let contents =
                    unsafe { core::slice::from_raw_parts(base as *const u8, PAGE_FRAME_SIZE) };
                let slot = swap.write_out(contents);
                desc.set_origin(PageOrigin::SwappedOut { slot });
                log::debug!(
                    "vm: evicting {vaddr:#x} (space {owner}) from frame {base:#x} to swap slot {slot}"
                );
            } else {
                log::debug!(
                    "vm: discarding clean file-backed {vaddr:#x} (space {owner}) from frame {base:#x}"
                );
            }

            pagedir.clear_mapping(owner, vaddr);
            desc.set_frame(None);
            drop(desc);

            self.entries.remove(&base);
            self.remove_from_clock(base);
            return base;
        }

        panic!("no evictable frame after sweeping the table twice");
    }

    /// Detaches and releases a frame whose occupant is being destroyed.
    /// The caller holds the descriptor lock and has already cleared its
    /// `frame` field.
    pub(crate) fn release_on_teardown(
        &mut self,
        base: usize,
        vaddr: usize,
        owner: AddressSpaceId,
        pagedir: &dyn PageDirectory,
    ) {
        let entry = self
            .entries
            .remove(&base)
            .expect("tearing down an unknown frame");
        debug_assert!(entry.owner == owner);
        pagedir.clear_mapping(owner, vaddr);
        self.remove_from_clock(base);
        self.pool
            .release(NonNull::new(base as *mut u8).expect("frame base is null"));
    }

    fn remove_from_clock(&mut self, base: usize) {
        let at = self
            .clock
            .iter()
            .position(|&b| b == base)
            .expect("frame missing from clock order");
        self.clock.remove(at);
        if at < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.clock.len() {
            self.cursor = 0;
        }
    }

    /// Checks the mutual frame/descriptor back-references.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        assert_eq!(self.clock.len(), self.entries.len());
        for (base, entry) in &self.entries {
            assert!(self.clock.contains(base));
            if let Some(page) = &entry.occupant {
                assert_eq!(page.lock().frame(), Some(*base));
            }
        }
    }
}
