//! Interface to the filesystem, as far as the virtual-memory core needs it.

pub type FileDescriptor = i16;

/// Positioned reads from open files backing lazily-loaded segments.
///
/// File descriptors handed to the VM core outlive the page descriptors that
/// reference them; process teardown closes them, not this crate.
pub trait FileSource: Send + Sync {
    /// Reads up to `buf.len()` bytes from `fd` starting at byte `offset`.
    /// Returns the number of bytes read, which is short at end of file.
    fn read_at(&self, fd: FileDescriptor, offset: u64, buf: &mut [u8]) -> usize;
}
