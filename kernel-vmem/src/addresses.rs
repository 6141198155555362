//! Physical/virtual address and page-size newtypes.
//!
//! Re-exports the shared [`kernel_memory_addresses`] types so the paging code
//! in this crate can't accidentally mix virtual and physical addresses, or
//! addresses belonging to different page sizes, without introducing a second,
//! crate-local copy of the same newtypes `kernel-pmm` already depends on.

pub use kernel_memory_addresses::{
    MemoryAddressOffset, PageSize, PhysicalAddress, PhysicalPage, Size1G, Size2M, Size4K,
    VirtualAddress, VirtualPage,
};
