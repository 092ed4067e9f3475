//! Demand-paged virtual memory.
//!
//! Three structures cooperate here. The supplemental page table
//! ([`page::SupplementalPageTable`], one per address space) records how to
//! materialize each virtual page that is not resident. The frame table
//! ([`frame::FrameTable`], process-wide) owns the physical frame pool and
//! reclaims resident pages with a clock sweep when it runs dry. The swap
//! store ([`swap::SwapStore`], process-wide) persists evicted anonymous
//! pages in page-sized slots of the swap block device.
//!
//! The fault path ties them together: look the page up, obtain a frame
//! (possibly evicting someone else's), fill it from its origin, install the
//! hardware mapping, mark the page resident. See [`Vm::resolve_fault`].

pub mod fault;
pub mod frame;
pub mod page;
pub mod swap;
#[cfg(test)]
pub(crate) mod testing;

use crate::block::block_core::Block;
use crate::fs::FileSource;
use crate::mem::FramePool;
use crate::paging::PageDirectory;
use crate::sync::mutex::{Mutex, MutexGuard};
use alloc::boxed::Box;
use alloc::sync::Arc;
use frame::FrameTable;
use once_cell::race::OnceBox;
use swap::SwapStore;

pub use fault::FaultOutcome;
pub use page::{AlreadyMapped, PageOrigin, SupplementalPageTable};
pub use swap::SwapSlot;

/// The process-wide virtual-memory state: frame table, swap store, and the
/// collaborators the core calls out to.
pub struct Vm {
    frames: Mutex<FrameTable>,
    swap: SwapStore,
    pagedir: Arc<dyn PageDirectory>,
    files: Arc<dyn FileSource>,
}

impl Vm {
    pub fn new(
        pool: FramePool,
        swap_device: Block,
        pagedir: Arc<dyn PageDirectory>,
        files: Arc<dyn FileSource>,
    ) -> Self {
        log::info!(
            "vm: {} user frames, swap on \"{}\"",
            pool.frame_count(),
            swap_device.get_name()
        );
        Self {
            frames: Mutex::new(FrameTable::new(pool)),
            swap: SwapStore::new(swap_device),
            pagedir,
            files,
        }
    }

    pub(crate) fn frames(&self) -> MutexGuard<FrameTable> {
        self.frames.lock()
    }

    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    pub(crate) fn pagedir(&self) -> &dyn PageDirectory {
        &*self.pagedir
    }

    pub(crate) fn files(&self) -> &dyn FileSource {
        &*self.files
    }
}

static SYSTEM: OnceBox<Vm> = OnceBox::new();

/// Initializes the virtual-memory subsystem exactly once.
///
/// Panics if called twice, or if no swap device was configured: there is no
/// degraded mode without one.
pub fn init(
    pool: FramePool,
    swap_device: Option<Block>,
    pagedir: Arc<dyn PageDirectory>,
    files: Arc<dyn FileSource>,
) -> &'static Vm {
    let Some(device) = swap_device else {
        panic!("vm: no swap device present");
    };
    let vm = Box::new(Vm::new(pool, device, pagedir, files));
    assert!(SYSTEM.set(vm).is_ok(), "vm: already initialized");
    system()
}

/// The initialized subsystem. Panics before [`init`].
pub fn system() -> &'static Vm {
    SYSTEM.get().expect("vm: not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block_core::test::ram_block;
    use crate::block::block_core::{BlockSector, BlockType};
    use crate::vm::swap::SECTORS_PER_PAGE;
    use crate::vm::testing::{MemFiles, SoftPageDir};
    use core::ptr::NonNull;
    use marrowos_shared::mem::PAGE_FRAME_SIZE;

    fn pool_of(frame_count: usize) -> FramePool {
        let region: &'static mut [u8] = alloc::vec![0u8; frame_count * PAGE_FRAME_SIZE].leak();
        let start = NonNull::new(region.as_mut_ptr()).expect("leaked region is null");
        // SAFETY: the region is leaked and used only through the pool.
        unsafe { FramePool::new(start, frame_count) }
    }

    #[test]
    #[should_panic(expected = "no swap device")]
    fn init_without_swap_device_is_fatal() {
        init(
            pool_of(1),
            None,
            Arc::new(SoftPageDir::new()),
            Arc::new(MemFiles::new()),
        );
    }

    // The one test allowed to set the process-wide singleton; the test
    // above panics before reaching it.
    #[test]
    fn init_publishes_the_system_handle() {
        let sectors = (4 * SECTORS_PER_PAGE) as BlockSector;
        let device = ram_block(BlockType::Swap, "swap0", sectors);
        let vm = init(
            pool_of(2),
            Some(device),
            Arc::new(SoftPageDir::new()),
            Arc::new(MemFiles::new()),
        );
        assert!(core::ptr::eq(vm, system()));

        // The published handle is usable end to end.
        let mut spt = SupplementalPageTable::new(1);
        spt.register(PAGE_FRAME_SIZE, PageOrigin::Zero, true)
            .unwrap();
        assert_eq!(
            system().resolve_fault(&spt, PAGE_FRAME_SIZE, false),
            FaultOutcome::Resolved
        );
    }
}
