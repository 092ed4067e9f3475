//! Supplemental page table: per-address-space bookkeeping for pages the
//! hardware table doesn't (or doesn't yet) know about.

use crate::fs::FileDescriptor;
use crate::paging::AddressSpaceId;
use crate::sync::mutex::Mutex;
use crate::vm::swap::SwapSlot;
use crate::vm::Vm;
use alloc::collections::btree_map::{BTreeMap, Entry};
use alloc::sync::Arc;
use marrowos_shared::mem::{is_page_aligned, page_round_down, PAGE_FRAME_SIZE};

/// Where a page's contents come from when it is faulted in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageOrigin {
    /// Anonymous memory: zero-filled on first touch. Stack and heap pages
    /// start out this way, and swapped-in pages return to it.
    Zero,
    /// A lazily-loaded slice of an executable file: `read_len` bytes at
    /// `offset`, followed by `zero_len` bytes of zeros.
    FileBacked {
        fd: FileDescriptor,
        offset: u64,
        read_len: usize,
        zero_len: usize,
    },
    /// Evicted contents living in a swap slot.
    SwappedOut { slot: SwapSlot },
}

/// One virtual page known to an address space, resident or not.
pub struct PageDescriptor {
    vaddr: usize,
    origin: PageOrigin,
    writable: bool,
    /// Physical base of the frame holding this page while resident.
    frame: Option<usize>,
}

impl PageDescriptor {
    pub fn vaddr(&self) -> usize {
        self.vaddr
    }

    pub fn origin(&self) -> &PageOrigin {
        &self.origin
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn frame(&self) -> Option<usize> {
        self.frame
    }

    pub(crate) fn set_origin(&mut self, origin: PageOrigin) {
        self.origin = origin;
    }

    pub(crate) fn set_frame(&mut self, frame: Option<usize>) {
        self.frame = frame;
    }
}

/// Shared handle to a descriptor. The frame table holds one of these for
/// each occupied frame so the eviction sweep can reach the victim's
/// bookkeeping; the per-descriptor lock is what makes that mutation from
/// another thread sound.
pub type PageRef = Arc<Mutex<PageDescriptor>>;

/// Registering a virtual address twice in the same address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlreadyMapped(pub usize);

pub struct SupplementalPageTable {
    owner: AddressSpaceId,
    pages: BTreeMap<usize, PageRef>,
}

impl SupplementalPageTable {
    pub fn new(owner: AddressSpaceId) -> Self {
        Self {
            owner,
            pages: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> AddressSpaceId {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Records a new page and how to materialize it. `vaddr` must be
    /// page-aligned; a file-backed origin must cover exactly one page.
    pub fn register(
        &mut self,
        vaddr: usize,
        origin: PageOrigin,
        writable: bool,
    ) -> Result<(), AlreadyMapped> {
        assert!(is_page_aligned(vaddr), "registering unaligned page {vaddr:#x}");
        if let PageOrigin::FileBacked {
            read_len, zero_len, ..
        } = &origin
        {
            assert!(
                read_len + zero_len == PAGE_FRAME_SIZE,
                "file-backed page must cover exactly one page"
            );
        }

        match self.pages.entry(vaddr) {
            Entry::Occupied(_) => Err(AlreadyMapped(vaddr)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(PageDescriptor {
                    vaddr,
                    origin,
                    writable,
                    frame: None,
                })));
                Ok(())
            }
        }
    }

    /// The descriptor whose page contains `addr`, if this address space
    /// manages it. `None` means the access is illegal.
    pub fn lookup(&self, addr: usize) -> Option<PageRef> {
        self.pages.get(&page_round_down(addr)).cloned()
    }

    /// Releases every resource this address space holds: resident frames go
    /// back to the pool (their hardware mappings cleared), swap slots are
    /// freed, and all descriptors are dropped. Called exactly once, at
    /// address-space teardown, after the owning thread has stopped running.
    pub fn destroy_all(&mut self, vm: &Vm) {
        // Taking the frame lock for the whole walk keeps the eviction sweep
        // from racing us over this space's resident frames. Lock order
        // (frame table, then descriptor) matches eviction.
        let mut frames = vm.frames();
        for (vaddr, page) in core::mem::take(&mut self.pages) {
            let mut desc = page.lock();
            if let Some(base) = desc.frame.take() {
                frames.release_on_teardown(base, vaddr, self.owner, vm.pagedir());
            } else if let PageOrigin::SwappedOut { slot } = desc.origin {
                vm.swap().free(slot);
            }
        }
        log::debug!("vm: address space {} torn down", self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_rounds_down() {
        let mut spt = SupplementalPageTable::new(1);
        spt.register(PAGE_FRAME_SIZE, PageOrigin::Zero, true).unwrap();

        let page = spt.lookup(PAGE_FRAME_SIZE + 123).unwrap();
        assert_eq!(page.lock().vaddr(), PAGE_FRAME_SIZE);
        assert!(page.lock().frame().is_none());

        assert!(spt.lookup(2 * PAGE_FRAME_SIZE).is_none());
        assert!(spt.lookup(0).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut spt = SupplementalPageTable::new(1);
        spt.register(0, PageOrigin::Zero, true).unwrap();
        assert_eq!(
            spt.register(0, PageOrigin::Zero, false),
            Err(AlreadyMapped(0))
        );
        assert_eq!(spt.len(), 1);
    }

    #[test]
    #[should_panic(expected = "unaligned")]
    fn unaligned_registration_is_a_bug() {
        let mut spt = SupplementalPageTable::new(1);
        let _ = spt.register(12, PageOrigin::Zero, true);
    }

    #[test]
    #[should_panic(expected = "exactly one page")]
    fn short_file_origin_is_a_bug() {
        let mut spt = SupplementalPageTable::new(1);
        let _ = spt.register(
            0,
            PageOrigin::FileBacked {
                fd: 3,
                offset: 0,
                read_len: 100,
                zero_len: 0,
            },
            false,
        );
    }
}
