//! Early paging bring-up (§4.3's `paging_init`).
//!
//! Limine hands off with its own PML4 already active, mapping the kernel
//! image and an HHDM covering usable memory. This module builds a second,
//! kernel-owned PML4 from scratch — mapping the kernel image segment by
//! segment via the linker-provided symbols, plus the HHDM as 2 MiB pages —
//! and switches CR3 to it, so every later mapping decision is made by this
//! kernel's own VMM rather than whatever Limine happened to set up.

use kernel_alloc::phys_mapper::HhdmPhysMapper;
use kernel_alloc::pmm_adapter::PmmFrameAlloc;
use kernel_pmm::Pmm;
use kernel_registers::cr4::Cr4;
use kernel_registers::msr::ia32_pat::Ia32Pat;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_vmem::address_space::{AddressSpace, RootPage};
use kernel_vmem::addresses::{PageSize, PhysicalAddress, Size2M, VirtualAddress};
use kernel_vmem::page_table::pml4::PageMapLevel4;
use kernel_vmem::{Flags, PhysFrameAlloc, PhysMapper, VirtualMemoryPageBits};

unsafe extern "C" {
    static _KERNEL_START: u8;
    static _LIMINE_REQUESTS_START: u8;
    static _LIMINE_REQUESTS_END: u8;
    static _TEXT_START: u8;
    static _TEXT_END: u8;
    static _RODATA_START: u8;
    static _RODATA_END: u8;
    static _DATA_START: u8;
    static _DATA_END: u8;
}

/// Build the kernel's own PML4, map the kernel image and the HHDM into it,
/// and switch CR3 to it.
///
/// Returns the new PML4's frame, so the caller can record it as the kernel
/// address space's root for later VMM use.
///
/// # Safety
/// Must be called exactly once, in early boot, after [`Pmm::init`] and before
/// any other code assumes a particular set of kernel mappings. `exec_phys_base`
/// must be the `ExecutableAddressRequest` response's physical base; `hhdm_offset`
/// must be the bootloader's reported HHDM offset.
pub unsafe fn paging_init(
    mapper: &HhdmPhysMapper,
    pmm: &mut Pmm,
    exec_phys_base: u64,
    hhdm_offset: u64,
) -> RootPage {
    // Step 1: canonical PAT layout so (PWT, PCD) alone can select WB/WC/UC.
    unsafe {
        Ia32Pat::kernel_default().store_unsafe();
    }

    let highest = pmm.highest_addr().as_u64().next_multiple_of(Size2M::SIZE);

    // Step 2: fresh, zeroed PML4.
    let mut alloc = PmmFrameAlloc::new(pmm);
    let pml4 = alloc.alloc_4k().expect("allocate kernel PML4");
    unsafe {
        let table = mapper.phys_to_mut::<PageMapLevel4>(pml4.base());
        *table = PageMapLevel4::zeroed();
    }
    let aspace = AddressSpace::from_root(mapper, pml4);

    let nonleaf: VirtualMemoryPageBits = (Flags::PRESENT | Flags::WRITABLE).into();
    let kernel_start = addr_of(&raw const _KERNEL_START);

    // Step 3: map each kernel image segment at its linker-provided bounds.
    map_segment(
        &aspace,
        &mut alloc,
        addr_of(&raw const _LIMINE_REQUESTS_START),
        addr_of(&raw const _LIMINE_REQUESTS_END),
        kernel_start,
        exec_phys_base,
        nonleaf,
        Flags::PRESENT | Flags::WRITABLE | Flags::NX | Flags::GLOBAL,
    );
    map_segment(
        &aspace,
        &mut alloc,
        addr_of(&raw const _TEXT_START),
        addr_of(&raw const _TEXT_END),
        kernel_start,
        exec_phys_base,
        nonleaf,
        Flags::PRESENT | Flags::GLOBAL,
    );
    map_segment(
        &aspace,
        &mut alloc,
        addr_of(&raw const _RODATA_START),
        addr_of(&raw const _RODATA_END),
        kernel_start,
        exec_phys_base,
        nonleaf,
        Flags::PRESENT | Flags::NX | Flags::GLOBAL,
    );
    map_segment(
        &aspace,
        &mut alloc,
        addr_of(&raw const _DATA_START),
        addr_of(&raw const _DATA_END),
        kernel_start,
        exec_phys_base,
        nonleaf,
        Flags::PRESENT | Flags::WRITABLE | Flags::NX | Flags::GLOBAL,
    );

    // Step 4: HHDM over all of physical memory, as 2 MiB pages.
    let hhdm_leaf: VirtualMemoryPageBits = (Flags::PRESENT | Flags::WRITABLE | Flags::GLOBAL).into();
    let mut off = 0u64;
    while off < highest {
        let va = VirtualAddress::new(hhdm_offset + off);
        let pa = PhysicalAddress::new(off);
        aspace
            .map_one::<_, Size2M>(&mut alloc, va, pa, nonleaf, hhdm_leaf)
            .expect("map HHDM");
        off += Size2M::SIZE;
    }

    // Step 5: CR4.PGE.
    unsafe {
        let cr4 = Cr4::load_unsafe();
        if !cr4.pge() {
            cr4.with_pge(true).store_unsafe();
        }
    }

    // Step 6: switch CR3.
    unsafe {
        aspace.activate();
    }

    pml4
}

/// Map `[seg_start, seg_end)` of the kernel image to
/// `exec_phys_base + (seg_start - kernel_start)`.
#[allow(clippy::too_many_arguments)]
fn map_segment(
    aspace: &AddressSpace<'_, HhdmPhysMapper>,
    alloc: &mut PmmFrameAlloc<'_>,
    seg_start: u64,
    seg_end: u64,
    kernel_start: u64,
    exec_phys_base: u64,
    nonleaf: VirtualMemoryPageBits,
    leaf: VirtualMemoryPageBits,
) {
    if seg_end <= seg_start {
        return;
    }
    let phys_base = exec_phys_base + (seg_start - kernel_start);
    aspace
        .map_region(
            alloc,
            VirtualAddress::new(seg_start),
            PhysicalAddress::new(phys_base),
            seg_end - seg_start,
            nonleaf,
            leaf,
        )
        .expect("map kernel segment");
}

#[inline]
fn addr_of(p: *const u8) -> u64 {
    p as u64
}
