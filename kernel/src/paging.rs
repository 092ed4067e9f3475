//! Interface to the per-address-space hardware page tables.
//!
//! The virtual-memory core never walks page tables itself; it installs and
//! clears translations, and samples the hardware-maintained accessed and
//! dirty bits, through this trait. The concrete implementation lives with
//! the architecture code that owns CR3 and friends.

/// Identifies the address space whose hardware table a mapping lives in.
pub type AddressSpaceId = u16;

pub trait PageDirectory: Send + Sync {
    /// Installs a virtual-to-physical translation for `owner`.
    ///
    /// Returns false if a mapping is already present at `vaddr`, in which
    /// case the table is left unchanged.
    fn install_mapping(
        &self,
        owner: AddressSpaceId,
        vaddr: usize,
        paddr: usize,
        writable: bool,
    ) -> bool;

    /// Removes the translation at `vaddr`, if any. Later accesses fault.
    fn clear_mapping(&self, owner: AddressSpaceId, vaddr: usize);

    /// Whether the page at `vaddr` has been referenced since the bit was
    /// last cleared.
    fn is_accessed(&self, owner: AddressSpaceId, vaddr: usize) -> bool;

    fn clear_accessed(&self, owner: AddressSpaceId, vaddr: usize);

    /// Whether the page at `vaddr` has been written since the mapping was
    /// installed.
    fn is_dirty(&self, owner: AddressSpaceId, vaddr: usize) -> bool;

    /// The physical address `vaddr` currently translates to, if mapped.
    fn translate(&self, owner: AddressSpaceId, vaddr: usize) -> Option<usize>;
}
