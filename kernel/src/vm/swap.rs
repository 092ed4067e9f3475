//! Swap store: a block device sliced into page-sized slots, allocated
//! first-fit out of a bitmap.
//!
//! One lock serializes the bitmap and the device I/O, so a page's worth of
//! sectors is always written or read as a unit; two pages' sector transfers
//! never interleave on the device.

use crate::block::block_core::{Block, BlockSector, BLOCK_SECTOR_SIZE};
use crate::sync::mutex::Mutex;
use marrowos_shared::bitmap::Bitmap;
use marrowos_shared::mem::PAGE_FRAME_SIZE;

pub type SwapSlot = usize;

pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

pub struct SwapStore {
    inner: Mutex<SwapInner>,
}

struct SwapInner {
    device: Block,
    slots: Bitmap,
}

impl SwapStore {
    pub fn new(device: Block) -> Self {
        let slot_count = device.get_size() as usize / SECTORS_PER_PAGE;
        log::info!(
            "swap: {} slots ({} sectors) on \"{}\"",
            slot_count,
            device.get_size(),
            device.get_name()
        );
        Self {
            inner: Mutex::new(SwapInner {
                device,
                slots: Bitmap::new(slot_count),
            }),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn used_slots(&self) -> usize {
        self.inner.lock().slots.count_set()
    }

    /// Writes one page of contents to a fresh slot and returns its id.
    /// Panics when the device is full; swap exhaustion is unrecoverable.
    pub fn write_out(&self, page: &[u8]) -> SwapSlot {
        assert_eq!(page.len(), PAGE_FRAME_SIZE);

        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.scan_and_flip() else {
            panic!("swap: device full");
        };
        for i in 0..SECTORS_PER_PAGE {
            let sector = (slot * SECTORS_PER_PAGE + i) as BlockSector;
            inner
                .device
                .write(sector, &page[i * BLOCK_SECTOR_SIZE..(i + 1) * BLOCK_SECTOR_SIZE]);
        }
        slot
    }

    /// Reads a slot's contents into `page`. The slot stays allocated; the
    /// caller frees it once the page is resident again.
    pub fn read_in(&self, slot: SwapSlot, page: &mut [u8]) {
        assert_eq!(page.len(), PAGE_FRAME_SIZE);

        let mut inner = self.inner.lock();
        assert!(inner.slots.get(slot), "reading a free swap slot {slot}");
        for i in 0..SECTORS_PER_PAGE {
            let sector = (slot * SECTORS_PER_PAGE + i) as BlockSector;
            inner
                .device
                .read(sector, &mut page[i * BLOCK_SECTOR_SIZE..(i + 1) * BLOCK_SECTOR_SIZE]);
        }
    }

    /// Makes a slot available for reuse. Freeing a free slot is a caller
    /// bug.
    pub fn free(&self, slot: SwapSlot) {
        let mut inner = self.inner.lock();
        assert!(inner.slots.get(slot), "double free of swap slot {slot}");
        inner.slots.set(slot, false);
    }
}
