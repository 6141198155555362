//! # Physical Frame Allocator (Buddy System)
//!
//! Owns every physical page of RAM the bootloader reports usable and serves
//! allocation/free requests for naturally-aligned power-of-two blocks of 4 KiB
//! pages, coalescing buddies back together as they're freed.
//!
//! ## Algorithm
//!
//! A free-area table indexed by order `0..PMM_MAX_ORDER` holds one intrusive,
//! PFN-indexed free list per block size. Freeing a block walks upward,
//! merging with its buddy (found via `pfn ^ (1 << order)`) for as long as the
//! buddy is itself free and of the same order. Allocating a block of order
//! `k` pops the smallest available free list at order `>= k` and splits it
//! down, pushing each freed-off half onto its own order's list.
//!
//! ## Page descriptors
//! One [`descriptor::PageDescriptor`] exists per 4 KiB physical page up to
//! [`Pmm::highest_addr`]. The array itself lives in the first `USABLE` region
//! of RAM large enough to hold it, accessed through the bootloader's HHDM.
//!
//! ## Concurrency
//! `Pmm` has no internal locking — a single global instance belongs behind
//! one `kernel_sync::SpinLock<Pmm>` (or per-NUMA-node instance, were this
//! kernel SMP-aware; it isn't, per the Non-goals).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod descriptor;
pub mod error;
mod pmm;

pub use descriptor::{PageDescriptor, PageFlags};
pub use error::PmmError;
pub use pmm::Pmm;

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::{MemoryMap, MemoryMapEntry, MemoryMapEntryKind};
    use kernel_memory_addresses::PhysicalAddress;

    /// Backing store for a fake "physical memory" region, leaked so the PMM
    /// can treat it as if it lived at HHDM offset `0` for the whole test.
    fn fake_ram(bytes: usize) -> u64 {
        let boxed = vec![0u8; bytes].into_boxed_slice();
        Box::leak(boxed).as_ptr() as u64
    }

    fn init_test_pmm(ram_bytes: u64) -> Pmm {
        let base = fake_ram(ram_bytes as usize);
        let mut map = MemoryMap::empty();
        map.push(MemoryMapEntry {
            base,
            length: ram_bytes,
            kind: MemoryMapEntryKind::Usable,
        });
        unsafe { Pmm::init(0, &map).expect("pmm init") }
    }

    #[test]
    fn init_reserves_descriptor_array_and_frees_the_rest() {
        let pmm = init_test_pmm(16 * 1024 * 1024);
        assert!(pmm.total_pages() > 0);
        assert!(pmm.used_pages() < pmm.total_pages());
    }

    #[test]
    fn alloc_then_free_restores_used_count() {
        let mut pmm = init_test_pmm(16 * 1024 * 1024);
        let before = pmm.used_pages();
        let pa = pmm.alloc(4096).expect("alloc one page");
        assert!(pmm.used_pages() > before);
        pmm.free(pa, 4096);
        assert_eq!(pmm.used_pages(), before);
    }

    #[test]
    fn buddies_coalesce_back_into_a_larger_block() {
        let mut pmm = init_test_pmm(16 * 1024 * 1024);
        let before = pmm.used_pages();

        // Allocate two adjacent single pages by forcing a split: grab an
        // order-1 block's worth and give both halves back individually.
        let a = pmm.alloc(4096).unwrap();
        let b = pmm.alloc(4096).unwrap();
        pmm.free(a, 4096);
        pmm.free(b, 4096);

        assert_eq!(pmm.used_pages(), before);
    }

    #[test]
    fn ref_counting_defers_free_until_zero() {
        let mut pmm = init_test_pmm(16 * 1024 * 1024);
        let pa = pmm.alloc(4096).expect("alloc one page");
        pmm.page_inc_ref(pa);

        // One dec_ref should not free it yet (ref_count went 2 -> 1).
        pmm.page_dec_ref(pa);
        let used_before_final_dec = pmm.used_pages();

        pmm.page_dec_ref(pa);
        assert!(pmm.used_pages() < used_before_final_dec);
    }

    #[test]
    fn exhausting_memory_returns_none() {
        let mut pmm = init_test_pmm(64 * 1024);
        let mut allocations = 0;
        while pmm.alloc(4096).is_some() {
            allocations += 1;
            if allocations > 1_000_000 {
                panic!("allocator never ran out of memory");
            }
        }
    }
}
