//! Per-address-space VM-area list, placement, and the page-fault demand-paging
//! algorithm.
//!
//! [`VmAreaList`] is a fixed-capacity, address-ordered list of areas (no heap
//! allocation, matching [`frame_alloc`](crate::frame_alloc)'s no-heap style —
//! the heap itself is built on top of one, so the area list can't depend on
//! it). MMIO areas are mapped eagerly; regular areas are inserted and left
//! unmapped, to be filled in page-by-page by [`VmAreaList::handle_fault`] on
//! first touch.
//!
//! The list does not own a [`Vmm`]: every method that needs to touch page
//! tables takes one by `&mut` for the duration of the call, the same way
//! `kernel::alloc::with_kernel_vmm` constructs a `Vmm` fresh from a stored
//! mapper and allocator rather than keeping one alive across calls. This
//! keeps `VmAreaList` itself free of the lifetime parameters a stored `Vmm`
//! would drag in, so it can sit behind a plain `'static` lock.

use kernel_vmem::addresses::{PageSize, PhysicalAddress, Size4K, VirtualAddress, VirtualPage};
use kernel_vmem::{Flags, PhysFrameAlloc, PhysMapper, VirtualMemoryPageBits};

use crate::vmm::{Vmm, VmmError};

/// Maximum number of concurrently live areas per address space.
///
/// Chosen generously for a single-core, non-swapping kernel; raise if a
/// workload legitimately needs more distinct mappings than this.
pub const MAX_AREAS: usize = 256;

bitflags::bitflags! {
    /// Area-level permission/cache-hint flags, translated to hardware page
    /// bits by [`VmAreaFlags::to_x86`] (`generic_to_x86`).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct VmAreaFlags: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
        const USER  = 1 << 3;
        /// Write-combining cache hint (maps to PWT).
        const WC    = 1 << 4;
        /// Uncacheable (maps to PCD); typical for MMIO.
        const UC    = 1 << 5;
    }
}

impl VmAreaFlags {
    /// READ is implicit once PRESENT is set; WRITE maps to RW; missing EXEC
    /// sets NX; USER sets US, otherwise GLOBAL; WC/UC set PWT/PCD.
    #[must_use]
    pub fn to_x86(self) -> Flags {
        let mut f = Flags::PRESENT;
        if self.contains(Self::WRITE) {
            f |= Flags::WRITABLE;
        }
        if !self.contains(Self::EXEC) {
            f |= Flags::NX;
        }
        if self.contains(Self::USER) {
            f |= Flags::USER;
        } else {
            f |= Flags::GLOBAL;
        }
        if self.contains(Self::WC) {
            f |= Flags::WT;
        }
        if self.contains(Self::UC) {
            f |= Flags::CD;
        }
        f
    }

    #[must_use]
    pub fn to_bits(self) -> VirtualMemoryPageBits {
        self.to_x86().into()
    }
}

/// A single virtual-memory area: `[base, base + len)`.
///
/// `phys_base.is_some()` marks an MMIO area (mapped eagerly at insertion
/// time); `None` marks a demand-paged area (mapped lazily by the page-fault
/// handler).
#[derive(Copy, Clone, Debug)]
pub struct VmArea {
    pub base: VirtualAddress,
    pub len: u64,
    pub flags: VmAreaFlags,
    pub phys_base: Option<PhysicalAddress>,
}

impl VmArea {
    const EMPTY: Self = Self {
        base: VirtualAddress::new(0),
        len: 0,
        flags: VmAreaFlags::empty(),
        phys_base: None,
    };

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u64() + self.len
    }

    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        let a = va.as_u64();
        a >= self.base.as_u64() && a < self.end()
    }
}

/// Outcome of [`VmAreaList::handle_fault`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// A fresh frame was mapped; the faulting instruction should be retried.
    Recovered,
    Fatal(FaultReason),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultReason {
    /// No area covers the faulting address.
    Unmapped,
    /// Write to a read-only area.
    WriteProtected,
    /// Instruction fetch from a non-executable area.
    ExecNx,
    /// Access disallowed for some other reason (e.g. supervisor-only area touched from user mode).
    Protection,
    /// No physical frame available to satisfy demand paging.
    OutOfMemory,
    /// `map_one` itself failed after a frame was already allocated.
    MapFailed,
}

/// The minimal page-fault error bits the demand-paging algorithm needs,
/// decoupled from any specific interrupt-frame representation so this crate
/// doesn't need to depend on the `kernel` binary's ISR bitfield type.
#[derive(Copy, Clone, Debug)]
pub struct PageFaultCode {
    pub present: bool,
    pub write: bool,
    pub user: bool,
    pub instruction_fetch: bool,
}

/// An address space's VM-area list. See the module docs for why this does
/// not itself hold a [`Vmm`].
pub struct VmAreaList {
    areas: [VmArea; MAX_AREAS],
    count: usize,
    half_start: u64,
    half_end: u64,
}

impl VmAreaList {
    /// Build an empty list managing the half `[half_start, half_end)`.
    #[must_use]
    pub const fn new(half_start: u64, half_end: u64) -> Self {
        Self {
            areas: [VmArea::EMPTY; MAX_AREAS],
            count: 0,
            half_start,
            half_end,
        }
    }

    #[must_use]
    pub fn areas(&self) -> &[VmArea] {
        &self.areas[..self.count]
    }

    /// Find the hole just before position `insert_at` that is large enough
    /// for `size`, starting the scan at `half_start` (`vmm_alloc`'s placement
    /// algorithm).
    fn find_slot(&self, size: u64) -> Option<(usize, u64)> {
        let mut cursor = self.half_start;
        for (i, a) in self.areas().iter().enumerate() {
            if a.base.as_u64() >= cursor && a.base.as_u64() - cursor >= size {
                return Some((i, cursor));
            }
            cursor = cursor.max(a.end());
        }
        if self.half_end.checked_sub(cursor)? >= size {
            Some((self.count, cursor))
        } else {
            None
        }
    }

    fn insert_at(&mut self, idx: usize, area: VmArea) {
        let mut j = self.count;
        while j > idx {
            self.areas[j] = self.areas[j - 1];
            j -= 1;
        }
        self.areas[idx] = area;
        self.count += 1;
    }

    fn remove_at(&mut self, idx: usize) -> VmArea {
        let area = self.areas[idx];
        for j in idx..self.count - 1 {
            self.areas[j] = self.areas[j + 1];
        }
        self.count -= 1;
        area
    }

    /// `vmm_alloc`: reserve `size` bytes (rounded up to 4 KiB) somewhere in
    /// this half. When `phys_base` is `Some`, the region is mapped
    /// immediately through `vmm` (MMIO fast path); otherwise it is left for
    /// demand paging.
    ///
    /// # Errors
    /// Returns `Err` if the area list is full, no hole is large enough, or
    /// (for MMIO) the eager mapping itself fails.
    pub fn alloc<M: PhysMapper, A: PhysFrameAlloc>(
        &mut self,
        vmm: &mut Vmm<'_, M, A>,
        size: u64,
        flags: VmAreaFlags,
        phys_base: Option<PhysicalAddress>,
    ) -> Result<VirtualAddress, VmmError> {
        let size = kernel_vmem::align_up(size.max(1), Size4K::SIZE);
        if self.count >= MAX_AREAS {
            return Err(VmmError::OutOfMemory);
        }
        let (idx, base) = self.find_slot(size).ok_or(VmmError::OutOfMemory)?;
        let area = VmArea {
            base: VirtualAddress::new(base),
            len: size,
            flags,
            phys_base,
        };

        if let Some(pa) = phys_base {
            let bits = flags.to_bits();
            vmm.map_region(area.base, pa, size, bits, bits)?;
        }

        self.insert_at(idx, area);
        Ok(area.base)
    }

    /// `vmm_free`: unmap (through `vmm`) and drop the area starting at `base`.
    ///
    /// No-op if no area starts exactly at `base` (matches the source's
    /// behaviour of only accepting the base address returned by `alloc`).
    pub fn free<M: PhysMapper, A: PhysFrameAlloc>(
        &mut self,
        vmm: &mut Vmm<'_, M, A>,
        base: VirtualAddress,
    ) {
        let Some(idx) = self
            .areas()
            .iter()
            .position(|a| a.base.as_u64() == base.as_u64())
        else {
            return;
        };
        let area = self.remove_at(idx);
        vmm.unmap_region(area.base, area.len);
    }

    #[must_use]
    pub fn find_area(&self, va: VirtualAddress) -> Option<&VmArea> {
        self.areas().iter().find(|a| a.contains(va))
    }

    /// Handle a `#PF` against this area list: classify the fault and, for a
    /// legitimate demand-paging fault, map in a fresh zeroed frame through
    /// `vmm`/`mapper` and return [`FaultOutcome::Recovered`] so the caller
    /// can `iretq` back into the faulting instruction.
    pub fn handle_fault<M: PhysMapper, A: PhysFrameAlloc>(
        &mut self,
        vmm: &mut Vmm<'_, M, A>,
        mapper: &M,
        cr2: VirtualAddress,
        code: PageFaultCode,
    ) -> FaultOutcome {
        let Some(area) = self.find_area(cr2).copied() else {
            return FaultOutcome::Fatal(FaultReason::Unmapped);
        };

        if code.present {
            if code.write && !area.flags.contains(VmAreaFlags::WRITE) {
                return FaultOutcome::Fatal(FaultReason::WriteProtected);
            }
            if code.instruction_fetch && !area.flags.contains(VmAreaFlags::EXEC) {
                return FaultOutcome::Fatal(FaultReason::ExecNx);
            }
            if code.user && !area.flags.contains(VmAreaFlags::USER) {
                return FaultOutcome::Fatal(FaultReason::Protection);
            }
            return FaultOutcome::Fatal(FaultReason::Protection);
        }

        let Some(frame) = vmm.alloc_frame() else {
            return FaultOutcome::Fatal(FaultReason::OutOfMemory);
        };

        // Zero through HHDM: demand-paged frames must never leak another
        // address space's prior contents.
        unsafe {
            let bytes: &mut [u8; 4096] = mapper.phys_to_mut(frame.base());
            bytes.fill(0);
        }

        let page = VirtualPage::<Size4K>::containing_address(cr2);
        let bits = area.flags.to_bits();
        if vmm
            .map_one::<Size4K>(page.base(), frame.base(), bits, bits)
            .is_err()
        {
            return FaultOutcome::Fatal(FaultReason::MapFailed);
        }
        vmm.invlpg(page);
        FaultOutcome::Recovered
    }
}
