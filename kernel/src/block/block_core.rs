use alloc::{boxed::Box, string::String, vec::Vec};
use core::fmt;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Roles a block device can serve.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum BlockType {
    /// File system
    FileSystem,
    /// Swap
    Swap,
    /// Scratch
    Scratch,
    /// "Raw" device with unidentified contents
    Raw,
    /// Owned by a foreign operating system
    Foreign,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockType::FileSystem => write!(f, "File System"),
            BlockType::Swap => write!(f, "Swap"),
            BlockType::Scratch => write!(f, "Scratch"),
            BlockType::Raw => write!(f, "Raw"),
            BlockType::Foreign => write!(f, "Foreign"),
        }
    }
}

/// Lower-level interface to block device drivers.
pub trait BlockOp: Send {
    /// Read a block sector into `buf`.
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]);
    /// Write `buf` to a block sector.
    fn write(&mut self, sector: BlockSector, buf: &[u8]);
}

/// A block device: a fixed-size array of sectors behind a driver.
pub struct Block {
    block_name: String,
    block_type: BlockType,
    driver: Box<dyn BlockOp>,
    /// The size of the device in sectors.
    block_size: BlockSector,

    read_count: u32,
    write_count: u32,
}

impl Block {
    pub fn new(
        block_type: BlockType,
        block_name: &str,
        block_size: BlockSector,
        driver: Box<dyn BlockOp>,
    ) -> Self {
        Self {
            block_name: String::from(block_name),
            block_type,
            driver,
            block_size,
            read_count: 0,
            write_count: 0,
        }
    }

    /// Panics if `buf` cannot hold exactly one sector.
    fn verify_buffer(buf: &[u8]) {
        if buf.len() != BLOCK_SECTOR_SIZE {
            panic!("Invalid buffer size {}", buf.len());
        }
    }

    /// Panics if `sector` is past the end of the device.
    fn check_sector(&self, sector: BlockSector) {
        if sector >= self.block_size {
            panic!(
                "{}: Invalid sector {} (block size: {})",
                self.block_name, sector, self.block_size
            );
        }
    }

    /// Reads sector `sector` into `buf`, which must have room for
    /// `BLOCK_SECTOR_SIZE` bytes.
    pub fn read(&mut self, sector: BlockSector, buf: &mut [u8]) {
        self.check_sector(sector);
        Self::verify_buffer(buf);

        self.driver.read(sector, buf);
        self.read_count += 1;
    }

    /// Writes `buf`, which must contain `BLOCK_SECTOR_SIZE` bytes, to sector
    /// `sector`. Returns after the device has acknowledged the data.
    pub fn write(&mut self, sector: BlockSector, buf: &[u8]) {
        self.check_sector(sector);
        Self::verify_buffer(buf);

        assert!(
            self.block_type != BlockType::Foreign,
            "Cannot write to foreign block"
        );

        self.driver.write(sector, buf);
        self.write_count += 1;
    }

    pub fn get_type(&self) -> BlockType {
        self.block_type
    }
    pub fn get_size(&self) -> BlockSector {
        self.block_size
    }
    pub fn get_name(&self) -> &str {
        &self.block_name
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\" ({}): {:04} sectors, {:04} read, {:04} write",
            self.block_name, self.block_type, self.block_size, self.read_count, self.write_count
        )
    }
}

/// Maintain a list of blocks
#[derive(Default)]
pub struct BlockManager {
    all_blocks: Vec<Block>,
}

impl BlockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block device. Returns the index of the device.
    pub fn register_block(&mut self, block: Block) -> usize {
        log::info!(
            "Registered block device \"{}\" ({} type) with {} sectors",
            block.get_name(),
            block.get_type(),
            block.get_size(),
        );

        self.all_blocks.push(block);
        self.all_blocks.len() - 1
    }

    /// Detach and return the first device serving `block_type`, if any.
    pub fn take_by_type(&mut self, block_type: BlockType) -> Option<Block> {
        let at = self
            .all_blocks
            .iter()
            .position(|b| b.get_type() == block_type)?;
        Some(self.all_blocks.remove(at))
    }
}

impl fmt::Display for BlockManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Block Devices:")?;
        for block in self.all_blocks.iter() {
            writeln!(f, "    {block}")?;
        }
        Ok(())
    }
}
