//! Page-fault resolution: the single translator between memory-management
//! outcomes and process-visible effects.

use crate::vm::page::{PageOrigin, SupplementalPageTable};
use crate::vm::Vm;
use marrowos_shared::mem::{page_round_down, PAGE_FRAME_SIZE};

/// What the trap handler should do about a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The page is resident; retry the access.
    Resolved,
    /// Illegal access; terminate the offending process.
    Violation,
}

/// Keeps a frame exempt from eviction while its contents are in flux, and
/// re-admits it on every exit path.
struct PinGuard<'a> {
    vm: &'a Vm,
    base: usize,
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.vm.frames().set_pinned(self.base, false);
    }
}

impl Vm {
    /// Resolves a fault at `addr` in the address space described by `spt`.
    ///
    /// An address the space never registered, or a write to a page
    /// registered read-only, is a [`FaultOutcome::Violation`]; everything
    /// else ends with the page resident and mapped.
    pub fn resolve_fault(
        &self,
        spt: &SupplementalPageTable,
        addr: usize,
        is_write: bool,
    ) -> FaultOutcome {
        let vaddr = page_round_down(addr);
        let Some(page) = spt.lookup(addr) else {
            log::debug!("vm: fault at {addr:#x}: unmanaged address");
            return FaultOutcome::Violation;
        };

        let origin = {
            let desc = page.lock();
            if is_write && !desc.writable() {
                log::debug!("vm: write fault at {addr:#x} on read-only page");
                return FaultOutcome::Violation;
            }
            if desc.frame().is_some() {
                // Already resident; nothing to do.
                return FaultOutcome::Resolved;
            }
            desc.origin().clone()
        };
        let owner = spt.owner();

        // The descriptor lock is released before the frame lock is taken;
        // eviction acquires them in the other nesting and cannot pick this
        // page anyway (it is not resident).
        let zero = origin == PageOrigin::Zero;
        let base = self
            .frames()
            .allocate(self.pagedir(), self.swap(), owner, zero);
        let pin = PinGuard { vm: self, base };

        // SAFETY: the frame was just allocated pinned with no occupant; this
        // is the only reference to its contents.
        let contents = unsafe { core::slice::from_raw_parts_mut(base as *mut u8, PAGE_FRAME_SIZE) };
        match origin {
            PageOrigin::Zero => {}
            PageOrigin::FileBacked {
                fd,
                offset,
                read_len,
                zero_len,
            } => {
                debug_assert!(read_len + zero_len == PAGE_FRAME_SIZE);
                let read = self.files().read_at(fd, offset, &mut contents[..read_len]);
                // Zero the declared tail, and anything a short read left.
                contents[read..].fill(0);
            }
            PageOrigin::SwappedOut { slot } => {
                self.swap().read_in(slot, contents);
                self.swap().free(slot);
                // The slot is gone; the descriptor must stop referencing it
                // now, even if the install below fails and the page never
                // becomes resident. It is anonymous again either way.
                page.lock().set_origin(PageOrigin::Zero);
            }
        }

        if !self
            .pagedir()
            .install_mapping(owner, vaddr, base, page.lock().writable())
        {
            // A mapping already present here is a logic error; give the
            // frame back and let the process die.
            log::warn!("vm: mapping already installed at {vaddr:#x} (space {owner})");
            drop(pin);
            self.frames().free(base);
            return FaultOutcome::Violation;
        }

        page.lock().set_frame(Some(base));
        self.frames().set_occupant(base, page);
        drop(pin);

        FaultOutcome::Resolved
    }
}
