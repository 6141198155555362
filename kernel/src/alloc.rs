//! # Kernel Memory Management
//!
//! This module provides the core memory management infrastructure for the kernel,
//! including physical frame allocation, virtual memory management, and page table
//! manipulation. It serves as the central interface between the kernel and the
//! underlying memory management subsystems.
//!
//! ## Architecture
//!
//! The memory management system is built on three key components:
//!
//! * **Physical Frame Allocator**: [`kernel_pmm::Pmm`], the buddy allocator, seeded
//!   from the bootloader's memory map and wrapped as a [`PhysFrameAlloc`] by
//!   [`kernel_alloc::pmm_adapter::PmmFrameAlloc`]
//! * **Physical Mapper**: [`HhdmPhysMapper`] provides Higher Half Direct Mapping (HHDM)
//!   for efficient access to physical memory from kernel virtual addresses
//! * **Virtual Memory Manager**: [`Vmm`] handles page table manipulation, mapping/unmapping
//!   operations, and address space management
//!
//! ## Key Types
//!
//! * [`KernelVmm`] - Type alias for the kernel's Virtual Memory Manager, built fresh
//!   per call from the HHDM mapper and a locked [`Pmm`]
//! * [`KernelVm`] - Container holding the mapper and the `Pmm` behind a spinlock
//! * [`FlushTlb`] - Policy enum controlling when TLB flushes occur during operations
//!
//! ## Initialization
//!
//! [`init_kernel_vmm`] is called once in early boot, after [`Pmm::init`](kernel_pmm::Pmm::init)
//! has consumed the bootloader's memory map, and installs the mapper + `Pmm` pair
//! behind a process-wide [`SyncOnceCell`].
//!
//! ## Usage Patterns
//!
//! The module provides two primary access patterns:
//!
//! * [`with_kernel_vmm`] - Execute operations with automatic VMM lifecycle management
//! * [`try_with_kernel_vmm`] - Execute fallible operations with configurable TLB flushing
//!
//! ## Safety
//!
//! This module contains extensive unsafe code for:
//! - Direct physical memory access via HHDM
//! - Page table manipulation and TLB management
//! - Raw pointer operations for memory mapping
//!
//! All unsafe operations are carefully isolated behind safe abstractions and
//! documented for their safety requirements.
//!
//! ## Debugging
//!
//! The [`debug`] submodule provides utilities for inspecting page table state,
//! walking virtual address translations, and debugging memory management issues.

pub mod debug;

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_alloc::heap::KernelHeap;
use kernel_alloc::phys_mapper::HhdmPhysMapper;
use kernel_alloc::pmm_adapter::PmmFrameAlloc;
use kernel_alloc::vm_area::{FaultOutcome, FaultReason, PageFaultCode, VmAreaList};
use kernel_alloc::vmm::Vmm;
use kernel_info::memory::{KERNEL_SPACE_END, KERNEL_SPACE_START};
use kernel_pmm::Pmm;
use kernel_sync::{RawSpin, SpinMutex, SyncOnceCell};
use kernel_vmem::address_space::{AddressSpace, AddressSpaceError, RootPage};
use kernel_vmem::addresses::VirtualAddress;
use kernel_vmem::{Flags, PhysFrameAlloc, VirtualMemoryPageBits};

pub type KernelVmm<'call> = Vmm<'call, HhdmPhysMapper, PmmFrameAlloc<'call>>;

pub struct KernelVm {
    pub mapper: HhdmPhysMapper,
    pub pmm: SpinMutex<Pmm>,
    /// PML4 frame built by `paging::paging_init`, shared as the upper half
    /// of every address space `new_address_space` creates.
    pub kernel_root: RootPage,
}

static KVM: SyncOnceCell<KernelVm> = SyncOnceCell::new();

/// The kernel half's own demand-paged areas (heap growth, kernel stacks, MMIO).
/// Separate from any user address space, which this kernel never creates.
static KERNEL_AREAS: SpinMutex<VmAreaList> = SpinMutex::from_raw(
    RawSpin::new(),
    VmAreaList::new(KERNEL_SPACE_START, KERNEL_SPACE_END),
);

/// Call once in very early boot, after `paging::paging_init` has run.
pub fn init_kernel_vmm(mapper: HhdmPhysMapper, pmm: Pmm, kernel_root: RootPage) {
    let _ = KVM.get_or_init(|| KernelVm {
        mapper,
        pmm: SpinMutex::new(pmm),
        kernel_root,
    });
}

/// The kernel's own address space: the PML4 `paging::paging_init` built and
/// switched CR3 to. Its upper half is shared by every address space
/// [`new_address_space`] creates.
#[must_use]
pub fn get_kernel_vas() -> AddressSpace<'static, HhdmPhysMapper> {
    let kvm = KVM.get().expect("Kernel VM not initialized");
    AddressSpace::from_root(&kvm.mapper, kvm.kernel_root)
}

/// Allocate a fresh address space: a zeroed lower half, upper half shared
/// with the kernel VAS by value-copying its PML4 entries.
///
/// # Errors
/// Out of memory allocating the PML4 frame.
pub fn new_address_space() -> Result<AddressSpace<'static, HhdmPhysMapper>, AddressSpaceError> {
    let kvm = KVM.get().expect("Kernel VM not initialized");
    let mut pmm = kvm.pmm.lock();
    let mut alloc = PmmFrameAlloc::new(&mut pmm);
    AddressSpace::new(&kvm.mapper, &mut alloc)
}

/// Release an address space's PML4 frame. The kernel VAS is immortal;
/// destroying it is a no-op.
///
/// Per-space VM-area teardown (`vmm_free` on every area) doesn't apply here:
/// this kernel never creates user VM-area lists, only the shared kernel one.
pub fn destroy_address_space(space: AddressSpace<'static, HhdmPhysMapper>) {
    let kvm = KVM.get().expect("Kernel VM not initialized");
    if space.root_page().base() == kvm.kernel_root.base() {
        return;
    }
    let mut pmm = kvm.pmm.lock();
    let mut alloc = PmmFrameAlloc::new(&mut pmm);
    alloc.free_4k(space.root_page());
}

/// Make `space` the active address space by loading CR3 with its root.
///
/// # Safety
/// Same requirements as [`AddressSpace::activate`]: the CPU paging state and
/// code/data mappings must already be consistent with `space`.
pub unsafe fn switch_address_space(space: &AddressSpace<'_, HhdmPhysMapper>) {
    unsafe {
        space.activate();
    }
}

/// Access the kernel half's VM-area list alongside a freshly built `Vmm`.
#[inline]
pub fn with_kernel_areas<R>(f: impl FnOnce(&mut VmAreaList, &mut KernelVmm) -> R) -> R {
    let kvm = KVM.get().expect("Kernel VM not initialized");
    let mut pmm = kvm.pmm.lock();
    let mut alloc = PmmFrameAlloc::new(&mut pmm);
    let mut vmm = unsafe { Vmm::from_current(&kvm.mapper, &mut alloc) };
    let mut areas = KERNEL_AREAS.lock();
    f(&mut areas, &mut vmm)
}

/// Handle a `#PF`: dispatch to the kernel VAS's area list if `cr2` lies in
/// the kernel half, otherwise to the current task's (there is none — this
/// kernel never creates a user address space, so any fault below the kernel
/// half is necessarily an unmapped access).
///
/// Called from the page-fault ISR; recovers a legitimate first-touch demand-paging
/// fault by mapping a fresh zeroed frame, or reports the fault as fatal.
pub fn handle_kernel_page_fault(cr2: VirtualAddress, code: PageFaultCode) -> FaultOutcome {
    if cr2.as_u64() < KERNEL_SPACE_START {
        return FaultOutcome::Fatal(FaultReason::Unmapped);
    }

    let kvm = KVM.get().expect("Kernel VM not initialized");
    let mut pmm = kvm.pmm.lock();
    let mut alloc = PmmFrameAlloc::new(&mut pmm);
    let mut vmm = unsafe { Vmm::from_current(&kvm.mapper, &mut alloc) };
    let mut areas = KERNEL_AREAS.lock();
    areas.handle_fault(&mut vmm, &kvm.mapper, cr2, code)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[allow(dead_code)]
pub enum FlushTlb {
    Never,
    OnSuccess,
    Always,
}

#[inline]
pub fn with_kernel_vmm(f: impl FnOnce(&mut KernelVmm)) {
    let kvm = KVM.get().expect("Kernel VM not initialized");
    let mut pmm = kvm.pmm.lock();
    let mut alloc = PmmFrameAlloc::new(&mut pmm);

    // Safety: CR3 points to a valid PML4; mapper is valid for kernel lifetime.
    let mut vmm = unsafe { Vmm::from_current(&kvm.mapper, &mut alloc) };
    f(&mut vmm);
}

#[inline]
pub fn try_with_kernel_vmm<R, E>(
    flush: FlushTlb,
    f: impl FnOnce(&mut KernelVmm) -> Result<R, E>,
) -> Result<R, E> {
    let kvm = KVM.get().expect("Kernel VM not initialized");
    let mut pmm = kvm.pmm.lock();
    let mut alloc = PmmFrameAlloc::new(&mut pmm);

    // Safety: CR3 points to a valid PML4; mapper is valid for kernel lifetime.
    let mut vmm = unsafe { Vmm::from_current(&kvm.mapper, &mut alloc) };
    match f(&mut vmm) {
        Ok(r) => {
            if matches!(flush, FlushTlb::Always | FlushTlb::OnSuccess) {
                unsafe {
                    vmm.local_tlb_flush_all();
                }
            }
            Ok(r)
        }
        Err(e) => {
            if matches!(flush, FlushTlb::Always) {
                unsafe {
                    vmm.local_tlb_flush_all();
                }
            }
            Err(e)
        }
    }
}

/// Next unused virtual address in the heap's backing region. Only ever moves
/// forward; the heap never shrinks.
static HEAP_NEXT_VA: AtomicU64 = AtomicU64::new(0);

/// The kernel's global heap arena, grown on demand through [`grow_heap`].
pub static HEAP: KernelHeap = KernelHeap::new();

/// Eagerly map and hand `initial_len` bytes starting at `start` to [`HEAP`].
///
/// Unlike the demand-paged areas in [`KERNEL_AREAS`], the heap's backing pages
/// are mapped up front: `FreeListAllocator::init` writes a node header into
/// the region the moment it runs, so the first page can't be left for a
/// page-fault to fill in later.
///
/// # Safety
/// `start` must not overlap any other mapped kernel region; this is the
/// first and only caller that may claim it.
pub unsafe fn init_heap_region(start: VirtualAddress, initial_len: u64) {
    HEAP_NEXT_VA.store(start.as_u64(), Ordering::Relaxed);
    let (va, len) = grow_heap(initial_len).expect("map initial kernel heap region");
    unsafe {
        HEAP.init(va as usize, len as usize);
    }
}

/// [`kernel_alloc::heap::GrowHook`] wired up via `set_grow_hook` in early
/// boot: maps `additional` freshly allocated, zeroed 4K frames right after
/// the heap's current end and returns `(start_va, len)`.
pub fn grow_heap(additional: u64) -> Option<(u64, u64)> {
    let start = HEAP_NEXT_VA.fetch_add(additional, Ordering::Relaxed);
    let va = VirtualAddress::new(start);
    let nonleaf: VirtualMemoryPageBits = (Flags::PRESENT | Flags::WRITABLE).into();
    let leaf: VirtualMemoryPageBits = (Flags::PRESENT | Flags::WRITABLE | Flags::NX).into();

    let result = try_with_kernel_vmm(FlushTlb::OnSuccess, |vmm| {
        vmm.map_anon_4k_pages(va, 0, additional, nonleaf, leaf)
    });

    match result {
        Ok(()) => Some((start, additional)),
        Err(_) => {
            HEAP_NEXT_VA.fetch_sub(additional, Ordering::Relaxed);
            None
        }
    }
}

/// Thin [`GlobalAlloc`] wrapper over [`HEAP`], installed as `#[global_allocator]`.
struct KernelGlobalAlloc;

#[global_allocator]
static GLOBAL_ALLOCATOR: KernelGlobalAlloc = KernelGlobalAlloc;

unsafe impl GlobalAlloc for KernelGlobalAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        HEAP.kmalloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe {
            HEAP.kfree(ptr, layout.size());
        }
    }
}
