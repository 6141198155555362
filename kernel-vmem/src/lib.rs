//! # Virtual Memory Support
//!
//! Strongly-typed x86-64 4-level paging for a higher-half kernel.
//!
//! ## What you get
//! - An [`address space`](address_space) describing a `PML4` root page table,
//!   with demand-paging-friendly `map_one`/`map_region`/`unmap_one`/`query`.
//! - [`addresses`] re-exports the shared [`PhysicalAddress`]/[`VirtualAddress`]/
//!   [`PhysicalPage`]/[`PageSize`] newtypes so virtual and physical addresses, and
//!   addresses of different page sizes, can't be mixed up at the call site.
//! - [`bits::VirtualMemoryPageBits`], an ergonomic unified view over the flag
//!   bits of every paging-entry kind.
//! - The typed [`page_table`] layers (PML4/PDPT/PD/PT).
//! - A tiny allocator/mapper interface ([`PhysFrameAlloc`], [`PhysMapper`]).
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! Each 48-bit virtual address is divided into five fields:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! The CPU uses these fields as **indices** into four levels of page tables,
//! each level containing 512 (2⁹) entries of 8 bytes (64 bits) each.
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │        │
//!   │        │        │        └───► PTE   (Page Table Entry)  → maps 4 KiB page
//!   │        │        └────────────► PDE   (Page Directory Entry) → PS=1 → 2 MiB page
//!   │        └─────────────────────► PDPTE (Page Directory Pointer Table Entry) → PS=1 → 1 GiB page
//!   └──────────────────────────────► PML4E (Page Map Level 4 Entry)
//! ```
//!
//! ### Levels and their roles
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:------------|:-----------|:-------------|
//! | 1 | **PML4** (Page Map Level 4) | **PML4E** | Top-level table; each entry points to a PDPT. One PML4 table per address space, referenced by Control Register 3 ([`CR3`](https://wiki.osdev.org/CPU_Registers_x86#CR3)). |
//! | 2 | **PDPT** (Page Directory Pointer Table) | **PDPTE** | Each entry points to a PD. If `PS=1`, it directly maps a 1 GiB page (leaf). |
//! | 3 | **PD** (Page Directory) | **PDE** | Each entry points to a PT. If `PS=1`, it directly maps a 2 MiB page (leaf). |
//! | 4 | **PT** (Page Table) | **PTE** | Each entry maps a 4 KiB physical page (always a leaf). |
//!
//! ### Leaf vs. non-leaf entries
//!
//! - A **leaf entry** directly maps physical memory — it contains the physical base address
//!   and the permission bits (present, writable, user, global, NX, etc.).
//!   - A **PTE** is always a leaf (maps 4 KiB).
//!   - A **PDE** with `PS=1` is a leaf (maps 2 MiB).
//!   - A **PDPTE** with `PS=1` is a leaf (maps 1 GiB).
//!
//! - A **non-leaf entry** points to the next lower table level and continues the walk.
//!   For example, a PML4E points to a PDPT, and a PDE with `PS=0` points to a PT.
//!
//! ### Offset
//!
//! - The final **Offset** field (bits 11–0) selects the byte inside the 4 KiB (or larger) page.
//!
//! ### Summary
//!
//! A canonical 48-bit virtual address is effectively:
//!
//! ```text
//! VA = [PML4:9] [PDPT:9] [PD:9] [PT:9] [Offset:12]
//! ```
//!
//! This creates a four-level translation tree that can map up to **256 TiB** of
//! virtual address space, using leaf pages of 1 GiB, 2 MiB, or 4 KiB depending
//! on which level the translation stops.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod addresses;
pub mod bits;
pub mod page_table;

extern crate alloc;

pub use crate::address_space::{AddressSpace, AddressSpaceError, RootPage};
pub use crate::addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size1G, Size2M, Size4K, VirtualAddress, VirtualPage,
};
pub use crate::bits::VirtualMemoryPageBits;

use kernel_registers::LoadRegisterUnsafe;
use kernel_registers::cr3::Cr3;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

bitflags::bitflags! {
    /// Ergonomic, caller-facing page permission flags.
    ///
    /// [`VirtualMemoryPageBits`] models the full per-level field set; `Flags`
    /// is the small, common subset callers usually reach for. Convert with
    /// `.into()`.
    #[derive(Copy, Clone)]
    pub struct Flags: u64 {
        /// Page is present in physical memory.
        ///
        /// Must be set for valid mappings; cleared indicates a page fault
        /// on access (used for demand paging).
        const PRESENT  = 1 << 0;

        /// Page is writable.
        ///
        /// If cleared, the page is read-only; writes trigger a fault
        /// unless running in ring 0 with write protection disabled (CR0.WP = 0).
        const WRITABLE = 1 << 1;

        /// Page is accessible from user mode (CPL=3).
        ///
        /// If cleared, only supervisor mode (CPL ≤ 2) can access the page.
        const USER     = 1 << 2;

        /// Write-through caching enabled.
        ///
        /// Writes are immediately propagated to main memory; typically used
        /// for memory-mapped I/O regions.
        const WT       = 1 << 3;

        /// Caching disabled for this page.
        ///
        /// When set, the CPU bypasses its caches; used for MMIO or strongly
        /// ordered regions.
        const CD       = 1 << 4;

        /// Global page.
        ///
        /// Prevents the TLB entry from being flushed on CR3 reload,
        /// if CR4.PGE is enabled. Typically used for kernel-space mappings.
        const GLOBAL   = 1 << 8;

        /// No-execute (NX) flag.
        ///
        /// Marks the page as non-executable when EFER.NXE is set.
        /// Execution from such a page triggers a page fault.
        const NX       = 1 << 63;
    }
}

impl From<Flags> for VirtualMemoryPageBits {
    fn from(f: Flags) -> Self {
        Self {
            present: f.contains(Flags::PRESENT),
            writable: f.contains(Flags::WRITABLE),
            user: f.contains(Flags::USER),
            write_through: f.contains(Flags::WT),
            cache_disable: f.contains(Flags::CD),
            accessed: false,
            dirty: false,
            global: f.contains(Flags::GLOBAL),
            no_execute: f.contains(Flags::NX),
            protection_key: 0,
            os_available_low: 0,
            os_available_high: 0,
            pat_bit2: false,
        }
    }
}

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables and leaf mappings.
///
/// The implementation decides where frames come from (buddy allocator,
/// bootstrap bump allocator, etc). Returned frames **must** be 4 KiB aligned.
pub trait PhysFrameAlloc {
    /// Allocate one 4 KiB *physical* frame. Returns `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a 4 KiB *physical* frame to the allocator.
    fn free_4k(&mut self, page: PhysicalPage<Size4K>);
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space (e.g., via a higher-half direct map, HHDM).
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable pointer in the current address space.
    ///
    /// # Safety
    /// Needs evaluation
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Typed convenience accessors built on top of [`PhysMapper::phys_to_mut`].
///
/// Blanket-implemented for every [`PhysMapper`]; callers rarely need to import
/// this trait explicitly beyond bringing its methods into scope.
pub trait PhysMapperExt: PhysMapper {
    /// Borrow the PML4 table backing `page`.
    #[inline]
    fn pml4_mut(&self, page: PhysicalPage<Size4K>) -> &mut page_table::pml4::PageMapLevel4 {
        unsafe { self.phys_to_mut(page.base()) }
    }

    /// Borrow the PDPT table backing `page`.
    #[inline]
    fn pdpt_mut(
        &self,
        page: PhysicalPage<Size4K>,
    ) -> &mut page_table::pdpt::PageDirectoryPointerTable {
        unsafe { self.phys_to_mut(page.base()) }
    }

    /// Borrow the PD table backing `page`.
    #[inline]
    fn pd_mut(&self, page: PhysicalPage<Size4K>) -> &mut page_table::pd::PageDirectory {
        unsafe { self.phys_to_mut(page.base()) }
    }

    /// Borrow the PT table backing `page`.
    #[inline]
    fn pt_mut(&self, page: PhysicalPage<Size4K>) -> &mut page_table::pt::PageTable {
        unsafe { self.phys_to_mut(page.base()) }
    }

    /// Zero the PDPT table backing `page`.
    #[inline]
    fn zero_pdpt(&self, page: PhysicalPage<Size4K>) {
        *self.pdpt_mut(page) = page_table::pdpt::PageDirectoryPointerTable::zeroed();
    }

    /// Zero the PD table backing `page`.
    #[inline]
    fn zero_pd(&self, page: PhysicalPage<Size4K>) {
        *self.pd_mut(page) = page_table::pd::PageDirectory::zeroed();
    }

    /// Zero the PT table backing `page`.
    #[inline]
    fn zero_pt(&self, page: PhysicalPage<Size4K>) {
        *self.pt_mut(page) = page_table::pt::PageTable::zeroed();
    }
}

impl<M: PhysMapper> PhysMapperExt for M {}

/// Read CR3 and return the physical base address of the active PML4.
///
/// # Safety
/// Must run at CPL0 with paging enabled.
#[inline]
pub unsafe fn read_cr3_phys() -> PhysicalAddress {
    let cr3 = unsafe { Cr3::load_unsafe() };
    cr3.pml4_phys()
}

/// Invalidate the TLB entry for the given virtual page on **this** CPU.
///
/// Only meaningful after modifying the **currently active** page tables (the
/// CR3 loaded on this CPU); invalidating a VA under a different address
/// space's tables has no effect on them.
///
/// # Safety
/// Must run at CPL0. Only invalidates the local CPU's TLB; SMP shootdown is
/// out of scope (non-goal).
#[inline]
pub unsafe fn invalidate_tlb_page(page: VirtualPage<Size4K>) {
    let va = page.base().as_u64();
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
    }
}

/// Align `x` down to the nearest multiple of `a`.
///
/// This returns the greatest value `y <= x` such that `y % a == 0`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two** (e.g., 1, 2, 4, 8, …).
///   These bit-trick formulas rely on that property.
/// - No additional constraints on `x`.
///
/// ### Notes
/// - If `x` is already aligned to `a`, it is returned unchanged.
/// - For non power-of-two `a`, the result is meaningless.
/// - This function does not perform runtime checks for performance reasons.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(1,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(4096,   4096), 4096);
/// assert_eq!(align_down(8191,   4096), 4096);
/// assert_eq!(align_down(0x12345,   16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// This returns the smallest value `y >= x` such that `y % a == 0`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must **not overflow** `u64`.
///   In debug builds, overflow panics; in release, it wraps (yielding a wrong result).
///   If you need saturating behavior, handle that before calling.
///
/// ### Notes
/// - If `x` is already aligned to `a`, it is returned unchanged.
/// - This function does not perform runtime checks for performance reasons.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(0,       4096), 0);
/// assert_eq!(align_up(1,       4096), 4096);
/// assert_eq!(align_up(4095,    4096), 4096);
/// assert_eq!(align_up(4096,    4096), 4096);
/// assert_eq!(align_up(4097,    4096), 8192);
/// assert_eq!(align_up(0x12345,   16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::{PhysicalPage, Size4K};
    use alloc::vec::Vec;

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    ///
    /// No free list, no reuse, no fragmentation handling — fine for tests.
    struct BumpAlloc {
        next: u64,
        end: u64,
    }

    impl BumpAlloc {
        fn new(start: u64, end: u64) -> Self {
            Self { next: start, end }
        }
    }

    impl PhysFrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            if self.next + 4096 > self.end {
                return None;
            }
            let p = self.next;
            self.next += 4096;
            Some(PhysicalPage::from_addr(PhysicalAddress::new(p)))
        }

        fn free_4k(&mut self, _page: PhysicalPage<Size4K>) {
            // bump allocator never reclaims
        }
    }

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(align(4096))]
    struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

    impl Aligned4K {
        fn new_zeroed() -> Self {
            Self([0u8; 4096])
        }
    }

    /// A tiny in-memory "RAM" plus an HHDM (higher-half direct map) style mapper.
    ///
    /// We simulate physical memory as a vector of 4 KiB-aligned frames. Physical addresses are
    /// simple byte offsets from 0.
    struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        fn with_frames(n: usize) -> Self {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Aligned4K::new_zeroed());
            }
            Self { frames: v }
        }

        fn frame_mut_ptr(&self, idx: usize) -> *mut u8 {
            // SAFETY: frames are 4 KiB aligned; we return a pointer into the owned buffer.
            &self.frames[idx] as *const Aligned4K as *mut u8
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            let idx = (pa.as_u64() >> 12) as usize;
            let off = (pa.as_u64() & 0xfff) as usize;
            // For page tables we expect offset==0; assert to catch misuse in the test.
            debug_assert_eq!(off, 0);

            // SAFETY: The caller promises `T` matches the bytes in the frame.
            unsafe { &mut *(self.frame_mut_ptr(idx) as *mut T) }
        }
    }

    fn new_space(phys: &TestPhys, alloc: &mut BumpAlloc) -> AddressSpace<'_, TestPhys> {
        let root_pa = alloc.alloc_4k().unwrap();
        unsafe {
            *phys.pml4_mut(root_pa) = page_table::pml4::PageMapLevel4::zeroed();
        }
        AddressSpace::from_root(phys, root_pa)
    }

    #[test]
    fn map_one_4k_creates_tables_and_leaf() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64u64 << 12);
        let aspace = new_space(&phys, &mut alloc);

        let va = VirtualAddress::new(0xffff_8000_0000_0000);
        let pa = PhysicalAddress::new(0x0000_0000_0030_0000);

        let nonleaf: VirtualMemoryPageBits = (Flags::PRESENT | Flags::WRITABLE).into();
        let leaf: VirtualMemoryPageBits = (Flags::WRITABLE | Flags::GLOBAL | Flags::NX).into();

        aspace
            .map_one::<_, Size4K>(&mut alloc, va, pa, nonleaf, leaf)
            .expect("map_one");

        let resolved = aspace.query(va).expect("mapped");
        assert_eq!(resolved.as_u64(), pa.as_u64());
    }

    #[test]
    fn map_one_2m_sets_ps_bit() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64u64 << 12);
        let aspace = new_space(&phys, &mut alloc);

        let va = VirtualAddress::new(0xffff_8000_2000_0000);
        let pa = PhysicalAddress::new(0x0000_0000_0400_0000);

        let nonleaf: VirtualMemoryPageBits = Flags::PRESENT.into();
        let leaf: VirtualMemoryPageBits = Flags::WRITABLE.into();

        aspace
            .map_one::<_, Size2M>(&mut alloc, va, pa, nonleaf, leaf)
            .expect("map_one");

        let resolved = aspace.query(va).expect("mapped");
        assert_eq!(resolved.as_u64(), pa.as_u64());
    }

    #[test]
    fn map_one_1g_sets_ps_bit() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64u64 << 12);
        let aspace = new_space(&phys, &mut alloc);

        let va = VirtualAddress::new(0x0000_4000_0000_0000);
        let pa = PhysicalAddress::new(0x0000_0000_4000_0000);

        let nonleaf: VirtualMemoryPageBits = Flags::PRESENT.into();
        let leaf: VirtualMemoryPageBits = Flags::WRITABLE.into();

        aspace
            .map_one::<_, Size1G>(&mut alloc, va, pa, nonleaf, leaf)
            .expect("map_one");

        let resolved = aspace.query(va).expect("mapped");
        assert_eq!(resolved.as_u64(), pa.as_u64());
    }

    #[test]
    fn unmap_one_clears_4k_leaf() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64u64 << 12);
        let aspace = new_space(&phys, &mut alloc);

        let va = VirtualAddress::new(0xffff_8000_0000_1000);
        let pa = PhysicalAddress::new(0x0000_0000_0031_0000);
        let nonleaf: VirtualMemoryPageBits = Flags::PRESENT.into();
        let leaf: VirtualMemoryPageBits = Flags::WRITABLE.into();

        aspace
            .map_one::<_, Size4K>(&mut alloc, va, pa, nonleaf, leaf)
            .expect("map_one");
        assert!(aspace.query(va).is_some());

        aspace.unmap_one(va).expect("unmap_one");
        assert!(aspace.query(va).is_none());
    }
}
