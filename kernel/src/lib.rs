#![cfg_attr(not(test), no_std)]

pub mod block;
pub mod fs;
pub mod mem;
pub mod paging;
pub mod sync;
pub mod vm;

extern crate alloc;
