//! # Memory Layout
//!
//! Compile-time virtual-address-space windows. The bootloader's HHDM offset
//! is a boot-time value (see [`crate::boot::BootInfo::hhdm_offset`]); the
//! windows below are the static split the VMM enforces once paging is live.

/// Last byte of the user-manageable half of the address space.
///
/// A [`crate::boot::BootInfo`]-independent constant: every non-kernel
/// address space's VM areas live below this address.
pub const USER_SPACE_END: u64 = 0x0000_7FFF_FFFF_FFFF;

/// First byte of the VMM-managed kernel half of the address space.
///
/// PML4 entries 256..511 (this address and above) are shared by reference
/// across every address space; see `AddressSpace::clone_upper_half_from`.
pub const KERNEL_SPACE_START: u64 = 0xFFFF_C000_0000_0000;

/// Last byte of the VMM-managed kernel half.
pub const KERNEL_SPACE_END: u64 = 0xFFFF_FFFF_7FFF_FFFF;

/// A simple Higher Half Direct Map (HHDM) base used before the bootloader's
/// actual offset (`BootInfo::hhdm_offset`) is read; kept as the fallback/test
/// default so unit tests don't need a live bootloader handoff.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA), matches the linker script.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the kernel's bytes are placed in *physical* memory (LMA) by Limine.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Keep a tiny identity map so the paging switch code remains executable
/// right after CR3 reload (and to let low pointers be passed around).
pub const IDENTITY_LOW_BYTES: u64 = 0x20_0000; // 2 MiB

/// How far past `_KERNEL_END` the heap's first block starts (see the kernel
/// heap's `§4.5` initialisation).
pub const KHEAP_START_OFFSET: u64 = 0x0010_0000; // 1 MiB

/// The kernel heap's initial size in bytes.
pub const KHEAP_STARTING_SIZE: u64 = 0x0010_0000; // 1 MiB

/// How much the kernel heap grows by per `kheap_extend` call.
pub const KHEAP_EXTENDING_AMOUNT: u64 = 0x0010_0000; // 1 MiB

/// Physical frame order cap for the buddy allocator: orders `0..MAX_ORDER`,
/// i.e. blocks up to `4096 * 2^(MAX_ORDER - 1)` bytes (4 MiB at 11).
pub const PMM_MAX_ORDER: usize = 11;

/// The size of the kernel stack in debug builds.
#[cfg(debug_assertions)]
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

/// The size of the kernel stack in release builds.
#[cfg(not(debug_assertions))]
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(KERNEL_SPACE_START > USER_SPACE_END);
    assert!(KERNEL_BASE > HHDM_BASE);
    assert!(KHEAP_STARTING_SIZE.is_multiple_of(4096));
    assert!(KHEAP_EXTENDING_AMOUNT.is_multiple_of(4096));
    assert!(PMM_MAX_ORDER > 0 && PMM_MAX_ORDER <= 32);
};
