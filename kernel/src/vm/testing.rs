//! Software stand-ins for the hardware and filesystem collaborators, plus a
//! fixture that wires up a whole `Vm` over a leaked RAM region.

use crate::block::block_core::test::ram_block;
use crate::block::block_core::{BlockSector, BlockType};
use crate::fs::{FileDescriptor, FileSource};
use crate::mem::FramePool;
use crate::paging::{AddressSpaceId, PageDirectory};
use crate::sync::mutex::Mutex;
use crate::vm::swap::SECTORS_PER_PAGE;
use crate::vm::Vm;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use marrowos_shared::mem::PAGE_FRAME_SIZE;

#[derive(Clone, Copy)]
struct SoftMapping {
    paddr: usize,
    #[allow(dead_code)]
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// A page "directory" kept in a plain map, with hand-cranked accessed and
/// dirty bits.
pub(crate) struct SoftPageDir {
    maps: Mutex<BTreeMap<(AddressSpaceId, usize), SoftMapping>>,
}

impl SoftPageDir {
    pub(crate) fn new() -> Self {
        Self {
            maps: Mutex::new(BTreeMap::new()),
        }
    }

    /// Simulates the hardware reference to a mapped page: sets the accessed
    /// bit, and the dirty bit too for a write.
    pub(crate) fn touch(&self, owner: AddressSpaceId, vaddr: usize, write: bool) {
        let mut maps = self.maps.lock();
        let mapping = maps
            .get_mut(&(owner, vaddr))
            .expect("touching an unmapped page");
        mapping.accessed = true;
        mapping.dirty |= write;
    }

    pub(crate) fn mapping_count(&self) -> usize {
        self.maps.lock().len()
    }
}

impl PageDirectory for SoftPageDir {
    fn install_mapping(
        &self,
        owner: AddressSpaceId,
        vaddr: usize,
        paddr: usize,
        writable: bool,
    ) -> bool {
        let mut maps = self.maps.lock();
        if maps.contains_key(&(owner, vaddr)) {
            return false;
        }
        maps.insert(
            (owner, vaddr),
            SoftMapping {
                paddr,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        true
    }

    fn clear_mapping(&self, owner: AddressSpaceId, vaddr: usize) {
        self.maps.lock().remove(&(owner, vaddr));
    }

    fn is_accessed(&self, owner: AddressSpaceId, vaddr: usize) -> bool {
        self.maps
            .lock()
            .get(&(owner, vaddr))
            .is_some_and(|m| m.accessed)
    }

    fn clear_accessed(&self, owner: AddressSpaceId, vaddr: usize) {
        if let Some(mapping) = self.maps.lock().get_mut(&(owner, vaddr)) {
            mapping.accessed = false;
        }
    }

    fn is_dirty(&self, owner: AddressSpaceId, vaddr: usize) -> bool {
        self.maps
            .lock()
            .get(&(owner, vaddr))
            .is_some_and(|m| m.dirty)
    }

    fn translate(&self, owner: AddressSpaceId, vaddr: usize) -> Option<usize> {
        self.maps.lock().get(&(owner, vaddr)).map(|m| m.paddr)
    }
}

/// In-memory files keyed by descriptor.
#[derive(Default)]
pub(crate) struct MemFiles {
    files: BTreeMap<FileDescriptor, Vec<u8>>,
}

impl MemFiles {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, fd: FileDescriptor, contents: Vec<u8>) -> Self {
        self.files.insert(fd, contents);
        self
    }
}

impl FileSource for MemFiles {
    fn read_at(&self, fd: FileDescriptor, offset: u64, buf: &mut [u8]) -> usize {
        let Some(contents) = self.files.get(&fd) else {
            return 0;
        };
        let offset = offset as usize;
        if offset >= contents.len() {
            return 0;
        }
        let n = buf.len().min(contents.len() - offset);
        buf[..n].copy_from_slice(&contents[offset..offset + n]);
        n
    }
}

pub(crate) struct TestVm {
    pub(crate) vm: Vm,
    pub(crate) pagedir: Arc<SoftPageDir>,
}

/// A `Vm` over a leaked region of `frame_count` frames, a RAM swap device
/// of `slot_count` slots, and the given in-memory files.
pub(crate) fn test_vm(frame_count: usize, slot_count: usize, files: MemFiles) -> TestVm {
    let region: &'static mut [u8] = alloc::vec![0u8; frame_count * PAGE_FRAME_SIZE].leak();
    let start = NonNull::new(region.as_mut_ptr()).expect("leaked region is null");
    // SAFETY: the region is leaked and used only through the pool.
    let pool = unsafe { FramePool::new(start, frame_count) };

    let sectors = (slot_count * SECTORS_PER_PAGE) as BlockSector;
    let device = ram_block(BlockType::Swap, "swap0", sectors);

    let pagedir = Arc::new(SoftPageDir::new());
    let vm = Vm::new(pool, device, pagedir.clone(), Arc::new(files));
    TestVm { vm, pagedir }
}

/// The current contents of the frame at `paddr`.
pub(crate) fn frame_contents(paddr: usize) -> &'static [u8] {
    // SAFETY: test frames live in leaked regions and are never unmapped.
    unsafe { core::slice::from_raw_parts(paddr as *const u8, PAGE_FRAME_SIZE) }
}

/// Writes `byte` across the frame at `paddr`.
pub(crate) fn fill_frame(paddr: usize, byte: u8) {
    // SAFETY: as above; tests only write frames they have faulted in.
    unsafe { (paddr as *mut u8).write_bytes(byte, PAGE_FRAME_SIZE) };
}
