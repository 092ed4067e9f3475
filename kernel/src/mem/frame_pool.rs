//! The bounded pool of physical frames available to user pages.
//!
//! One `CoreMapEntry` per frame tracks whether it is handed out. Allocation
//! is single-frame, next-fit: the scan resumes where the previous one left
//! off so freshly-freed low frames don't get hammered.

use alloc::boxed::Box;
use alloc::vec;
use bitbybit::bitfield;
use core::ptr::NonNull;
use marrowos_shared::mem::PAGE_FRAME_SIZE;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
}

pub struct FramePool {
    start: NonNull<u8>,
    core_map: Box<[CoreMapEntry]>,
    frames_allocated: usize,
    position: usize,
}

// SAFETY: the pool exclusively owns its physical region; every access to
// that region goes through pointers the pool handed out.
unsafe impl Send for FramePool {}

impl FramePool {
    /// Creates a pool over `frame_count` page frames starting at `start`.
    ///
    /// # Safety
    ///
    /// `start..start + frame_count * PAGE_FRAME_SIZE` must be a valid,
    /// page-aligned memory region owned exclusively by the pool for its
    /// entire lifetime.
    pub unsafe fn new(start: NonNull<u8>, frame_count: usize) -> Self {
        Self {
            start,
            core_map: vec![CoreMapEntry::DEFAULT; frame_count].into_boxed_slice(),
            frames_allocated: 0,
            position: 0,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.core_map.len()
    }

    pub fn frames_allocated(&self) -> usize {
        self.frames_allocated
    }

    /// Hands out a free frame, zeroed if requested, or `None` when the pool
    /// is exhausted. Exhaustion is not an error here; the frame table
    /// responds to it by evicting.
    pub fn try_get(&mut self, zero: bool) -> Option<NonNull<u8>> {
        let total = self.core_map.len();
        if self.frames_allocated == total {
            return None;
        }

        let mut idx = self.position;
        for _ in 0..total {
            if !self.core_map[idx].allocated() {
                self.core_map[idx] = self.core_map[idx].with_allocated(true);
                self.frames_allocated += 1;
                self.position = (idx + 1) % total;

                // SAFETY: idx is in bounds, so the offset stays inside the
                // region the pool owns.
                let frame = unsafe {
                    NonNull::new_unchecked(self.start.as_ptr().add(idx * PAGE_FRAME_SIZE))
                };
                if zero {
                    // SAFETY: the frame is unowned until we return it.
                    unsafe { frame.as_ptr().write_bytes(0, PAGE_FRAME_SIZE) };
                }
                return Some(frame);
            }
            idx = (idx + 1) % total;
        }
        None
    }

    /// Returns a previously-handed-out frame to the pool.
    pub fn release(&mut self, frame: NonNull<u8>) {
        let idx = self.index_of(frame);
        assert!(
            self.core_map[idx].allocated(),
            "releasing frame {idx} which was never allocated"
        );
        self.core_map[idx] = self.core_map[idx].with_allocated(false);
        self.frames_allocated -= 1;
    }

    fn index_of(&self, frame: NonNull<u8>) -> usize {
        let offset = frame.as_ptr() as usize - self.start.as_ptr() as usize;
        assert!(
            offset % PAGE_FRAME_SIZE == 0,
            "frame pointer {:#x} is not page-aligned",
            frame.as_ptr() as usize
        );
        let idx = offset / PAGE_FRAME_SIZE;
        assert!(idx < self.core_map.len(), "frame pointer past end of pool");
        idx
    }
}
