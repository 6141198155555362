//! # Kernel Entry Point
//!
//! Booted by a Limine-protocol-compatible bootloader: Limine scans this
//! binary for the static `Request`s below, fills in their responses, and
//! jumps to [`_start`] with paging, long mode, and a valid stack already
//! set up. There is no boot-info pointer argument — [`read_boot_info`]
//! reassembles a [`kernel_info::boot::BootInfo`] from the responses.

#![no_std]
#![no_main]
#![allow(unsafe_code)]

mod alloc;
mod framebuffer;
mod gdt;
mod idt;
mod interrupts;
mod paging;
mod tracing;
mod tss;

use core::hint::spin_loop;
use limine::BaseRevision;
use limine::memory_map::EntryType;
use limine::request::{
    ExecutableAddressRequest, FramebufferRequest, HhdmRequest, MemoryMapRequest, RsdpRequest,
};
use log::LevelFilter;

use kernel_alloc::phys_mapper::{HhdmPhysMapper, set_hhdm_offset};
use kernel_info::boot::{
    BootInfo, BootPixelFormat, BootPixelMasks, FramebufferInfo, MemoryMap, MemoryMapEntry,
    MemoryMapEntryKind,
};
use kernel_info::memory::{
    KERNEL_SPACE_START, KERNEL_STACK_SIZE, KHEAP_START_OFFSET, KHEAP_STARTING_SIZE,
};
use kernel_pmm::Pmm;
use kernel_qemu::logger::QemuLogger;
use kernel_qemu::qemu_trace;
use kernel_vmem::addresses::VirtualAddress;

use crate::framebuffer::fill_solid;
use crate::interrupts::{Idt, Ist, PageFaultInterrupt, page_fault_handler};

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    #[cfg(feature = "qemu")]
    qemu_trace!("panic\n");
    loop {
        spin_loop();
    }
}

#[used]
#[unsafe(link_section = ".limine_requests")]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static RSDP_REQUEST: RsdpRequest = RsdpRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static KERNEL_ADDRESS_REQUEST: ExecutableAddressRequest = ExecutableAddressRequest::new();

/// 16-byte aligned stack storage, sized like any other kernel stack
/// ([`KERNEL_STACK_SIZE`]).
#[repr(align(16))]
struct Aligned<const N: usize>([u8; N]);

/// Ring-0 stack referenced by the TSS's `rsp0` (consulted on a CPL change;
/// this kernel never drops below CPL0, so it's really only for TSS hygiene).
#[unsafe(link_section = ".bss.boot")]
static mut KERNEL_STACK: Aligned<KERNEL_STACK_SIZE> = Aligned([0; KERNEL_STACK_SIZE]);

/// IST1 stack, bound to the page-fault gate so a fault can be handled even if
/// the current kernel stack is exhausted.
#[unsafe(link_section = ".bss.boot")]
static mut IST1_STACK: Aligned<KERNEL_STACK_SIZE> = Aligned([0; KERNEL_STACK_SIZE]);

/// Entry point Limine jumps to. No calling-convention quirks to work around
/// here (unlike a UEFI loader's `win64` handoff): Limine calls with the
/// platform's native `extern "C"` and hands us its own valid stack.
#[unsafe(no_mangle)]
extern "C" fn _start() -> ! {
    assert!(
        BASE_REVISION.is_supported(),
        "unsupported Limine base revision"
    );
    kernel_main()
}

fn kernel_main() -> ! {
    let _ = QemuLogger::new(LevelFilter::Trace).init();

    #[cfg(feature = "qemu")]
    qemu_trace!("Kernel reporting to QEMU!\n");

    let boot_info = read_boot_info();

    #[cfg(feature = "qemu")]
    tracing::trace_boot_info(&boot_info);

    set_hhdm_offset(boot_info.hhdm_offset);

    // Safety: called exactly once, before any other PMM/VMM use.
    let mut pmm = unsafe { Pmm::init(boot_info.hhdm_offset, &boot_info.memory_map) }
        .expect("physical memory manager init");

    // Safety: called exactly once, before any mapping decision trusts a
    // particular set of kernel page tables.
    let kernel_root = unsafe {
        paging::paging_init(
            &HhdmPhysMapper,
            &mut pmm,
            boot_info.kernel_phys_base,
            boot_info.hhdm_offset,
        )
    };

    alloc::init_kernel_vmm(HhdmPhysMapper, pmm, kernel_root);

    let heap_start = VirtualAddress::new(KERNEL_SPACE_START + KHEAP_START_OFFSET);
    // Safety: this is the only claimant of the heap's VA range, called once.
    unsafe {
        alloc::init_heap_region(heap_start, KHEAP_STARTING_SIZE);
    }

    // Safety: `KERNEL_STACK`/`IST1_STACK` are only referenced here, before any
    // interrupt can fire.
    let kernel_stack_top = unsafe { stack_top(&raw const KERNEL_STACK) };
    let ist1_top = unsafe { stack_top(&raw const IST1_STACK) };
    gdt::init_gdt_and_tss(kernel_stack_top, ist1_top);

    let mut idt = Idt::new();
    idt.init_page_fault_gate_ist(page_fault_handler, Ist::Ist1);
    // Safety: `idt` is moved into static storage and loaded exactly once here.
    unsafe {
        idt::init_idt_once(idt);
    }

    unsafe {
        core::arch::asm!("sti", options(nostack, preserves_flags));
    }

    let fb = boot_info
        .fb
        .as_ref()
        .map(|fb| mapped_framebuffer(fb, boot_info.hhdm_offset));

    #[cfg(feature = "qemu")]
    qemu_trace!("Entering kernel main loop...\n");

    loop {
        if let Some(fb) = &fb {
            unsafe { fill_solid(fb, 0x20, 0x60, 0xc0) };
        }
        spin_loop();
    }
}

/// Top-of-stack address for a downward-growing x86-64 stack, 16-byte aligned.
fn stack_top<const N: usize>(stack: *const Aligned<N>) -> VirtualAddress {
    VirtualAddress::new((stack as u64 + N as u64) & !0xf)
}

/// Limine maps the framebuffer's physical memory into the HHDM like any
/// other reported region; rewrite the physical pointer Limine gave us into
/// its HHDM virtual address before handing it to [`fill_solid`].
fn mapped_framebuffer(fb: &FramebufferInfo, hhdm_offset: u64) -> FramebufferInfo {
    let mut fb = fb.clone();
    fb.framebuffer_ptr += hhdm_offset;
    fb
}

/// Reassemble [`BootInfo`] from the responses Limine filled into the static
/// requests above. Only valid to call after Limine has handed us control.
fn read_boot_info() -> BootInfo {
    let hhdm_offset = HHDM_REQUEST
        .get_response()
        .expect("Limine HHDM response not available")
        .offset();

    let mut memory_map = MemoryMap::empty();
    let entries = MEMORY_MAP_REQUEST
        .get_response()
        .expect("Limine memory map response not available")
        .entries();
    for entry in entries {
        memory_map.push(MemoryMapEntry {
            base: entry.base,
            length: entry.length,
            kind: memory_map_entry_kind(entry.entry_type),
        });
    }

    let (kernel_phys_base, kernel_virt_base) = KERNEL_ADDRESS_REQUEST
        .get_response()
        .map(|r| (r.physical_base(), r.virtual_base()))
        .unwrap_or((0, 0));

    let rsdp_addr = RSDP_REQUEST.get_response().map(|r| r.address() as u64);

    let fb = FRAMEBUFFER_REQUEST.get_response().and_then(|r| {
        r.framebuffers().next().map(|fb| {
            let bpp = fb.bpp();
            FramebufferInfo {
                framebuffer_ptr: fb.addr() as u64,
                framebuffer_size: fb.pitch() * fb.height(),
                framebuffer_width: fb.width(),
                framebuffer_height: fb.height(),
                framebuffer_stride: fb.pitch() / u64::from(bpp / 8).max(1),
                framebuffer_format: if bpp == 32 {
                    BootPixelFormat::Bgr
                } else {
                    BootPixelFormat::Bitmask
                },
                framebuffer_masks: BootPixelMasks {
                    red_mask: 0,
                    green_mask: 0,
                    blue_mask: 0,
                    alpha_mask: 0,
                },
            }
        })
    });

    BootInfo {
        hhdm_offset,
        memory_map,
        kernel_phys_base,
        kernel_virt_base,
        rsdp_addr,
        fb,
    }
}

fn memory_map_entry_kind(entry_type: EntryType) -> MemoryMapEntryKind {
    if entry_type == EntryType::USABLE {
        MemoryMapEntryKind::Usable
    } else if entry_type == EntryType::BOOTLOADER_RECLAIMABLE {
        MemoryMapEntryKind::BootloaderReclaimable
    } else if entry_type == EntryType::ACPI_RECLAIMABLE {
        MemoryMapEntryKind::AcpiReclaimable
    } else if entry_type == EntryType::ACPI_NVS {
        MemoryMapEntryKind::AcpiNvs
    } else if entry_type == EntryType::BAD_MEMORY {
        MemoryMapEntryKind::BadMemory
    } else if entry_type == EntryType::EXECUTABLE_AND_MODULES {
        MemoryMapEntryKind::ExecutableAndModules
    } else if entry_type == EntryType::FRAMEBUFFER {
        MemoryMapEntryKind::Framebuffer
    } else {
        MemoryMapEntryKind::Reserved
    }
}
