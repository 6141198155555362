//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! This crate provides the core memory allocation infrastructure for the kernel,
//! implementing both physical frame allocation and virtual memory management
//! capabilities. It serves as the foundation for all memory operations in the
//! operating system, from initial bootstrap through runtime operation.
//!
//! ## Architecture Overview
//!
//! The memory management system is built in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Kernel Heap (heap)                     │
//! │    • kmalloc/kfree over a growable free list         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ grows by calling
//! ┌─────────────────▼───────────────────────────────────┐
//! │                Virtual Memory Manager (VMM)         │
//! │    • Page table manipulation                        │
//! │    • Virtual address space management               │
//! │    • User/kernel space separation                   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • Physical-to-virtual address translation        │
//! │    • HHDM (Higher Half Direct Mapping)              │
//! │    • Safe pointer conversion                        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • 4KiB page frame management                     │
//! │    • `kernel-pmm`'s buddy allocator, or a bitmap      │
//! │      fallback before it's online                    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Physical Frame Allocator ([`frame_alloc`])
//!
//! Manages the allocation and deallocation of 4KiB physical memory frames:
//! * **Bitmap Management**: Efficient tracking of free/used frames using bit arrays
//! * **No-Heap Design**: Self-contained implementation requiring no dynamic allocation
//! * **Fixed Region**: Manages a predefined region of physical memory (currently 512 MiB)
//! * **Early Boot Support**: Suitable for use before full memory management is available
//!
//! Key features:
//! - O(1) allocation when frames are available
//! - Simple bitmap-based tracking for reliability
//! - Configurable memory region boundaries
//! - Integration with kernel memory layout
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! Provides safe conversion between physical addresses and virtual pointers:
//! * **HHDM Support**: Higher Half Direct Mapping for efficient address translation
//! * **Safe Abstractions**: Type-safe pointer conversions with lifetime management
//! * **Page Table Access**: Enables manipulation of physical page table structures
//! * **Cross-Platform**: Abstracts physical memory access patterns
//!
//! Key capabilities:
//! - Physical address to virtual pointer conversion
//! - Support for different mapping strategies
//! - Safe dereferencing of physical memory
//! - Integration with page table manipulation
//!
//! ### Virtual Memory Manager ([`vmm`])
//!
//! Coordinates virtual address space management and page table operations:
//! * **Address Space Management**: Separate user and kernel virtual address spaces
//! * **Page Table Manipulation**: Creation, modification, and destruction of mappings
//! * **Memory Protection**: Configurable page permissions (read, write, execute, user)
//! * **Anonymous Mapping**: On-demand allocation of virtual memory regions
//! * **Region Management**: Bulk operations for mapping and unmapping areas
//!
//! Advanced features:
//! - Guard page support for stack overflow detection
//! - Bulk mapping operations for performance
//! - TLB management and invalidation
//! - User/kernel space isolation
//!
//! ### VM-Area List and Page-Fault Recovery ([`vm_area`])
//!
//! [`vm_area::VmAreaList`] is a fixed-capacity, address-ordered list of
//! [`vm_area::VmArea`]s. It does not own a [`vmm::Vmm`] — every call that
//! touches page tables takes one by `&mut`, built fresh from a stored mapper
//! and allocator, so the list itself stays free of lifetime parameters and
//! can sit behind a plain `'static` lock:
//! * **Placement**: first-fit ascending scan over the area list, same
//!   algorithm for both halves of the address space.
//! * **MMIO fast path**: areas with a physical base are mapped eagerly.
//! * **Demand paging**: regular areas are reserved but left unmapped;
//!   [`vm_area::VmAreaList::handle_fault`] classifies a `#PF` (unmapped vs.
//!   protection violation) and, for a legitimate first-touch fault, maps in
//!   a freshly zeroed frame and reports [`vm_area::FaultOutcome::Recovered`].
//!
//! ### Kernel Heap ([`heap`])
//!
//! `kmalloc`/`kfree` over a first-fit, coalescing free list ([`free_list`]):
//! * Starts at `kernel-info`'s `KHEAP_STARTING_SIZE`, already mapped by the caller.
//! * Grows by `KHEAP_EXTENDING_AMOUNT` through a [`heap::GrowHook`] wired up once
//!   via [`heap::set_grow_hook`] — kept as a plain `fn` pointer rather than a
//!   generic parameter, since the hook closes over the live kernel `AddressSpace`
//!   and frame allocator that only the `kernel` binary's init sequence owns.
//! * `kfree` reconstructs the block's header and coalesces with adjacent free
//!   neighbors, forward then backward.
//!
//! ## Memory Layout Integration
//!
//! The crate integrates with the kernel's memory layout defined in `kernel-info`:
//!
//! ```text
//! Virtual Address Space Layout:
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │        User Space               │
//!                       │  (Applications, libraries)      │
//! USER_SPACE_END        ├─────────────────────────────────┤
//!                       │        Guard Region             │
//! KERNEL_SPACE_START    ├─────────────────────────────────┤
//!                       │   VMM-managed kernel half       │
//!                       │  (HHDM, kernel image, heap)     │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Safety Model
//!
//! The memory management system employs multiple layers of safety:
//!
//! ### Type Safety
//! * **Address Types**: Distinct types for physical and virtual addresses
//! * **Page Alignment**: Compile-time guarantees for page-aligned operations
//! * **Lifetime Management**: Rust ownership prevents use-after-free errors
//!
//! ### Runtime Safety
//! * **Bounds Checking**: Validation of memory region boundaries
//! * **Permission Enforcement**: Hardware-backed memory protection
//! * **Guard Pages**: Overflow detection through unmapped regions
//! * **TLB Synchronization**: Proper cache invalidation on mapping changes
//!
//! ### Concurrency Safety
//! * **Atomic Operations**: Thread-safe allocation algorithms
//! * **Critical Sections**: Protection of shared data structures
//! * **Lock-Free Paths**: Performance optimization for common operations
//!
//! ## Usage Patterns
//!
//! ### Basic Physical Allocation
//! ```rust
//! use kernel_alloc::frame_alloc::BitmapFrameAlloc;
//! use kernel_vmem::PhysFrameAlloc;
//!
//! let mut allocator = BitmapFrameAlloc::new();
//! if let Some(frame) = allocator.alloc_4k() {
//!     // Use the physical frame
//!     allocator.free_4k(frame);
//! }
//! ```
//!
//! ### Virtual Memory Management
//! ```rust,no_run
//! use kernel_alloc::{phys_mapper::HhdmPhysMapper, vmm::Vmm};
//! use kernel_alloc::frame_alloc::BitmapFrameAlloc;
//!
//! let mapper = HhdmPhysMapper;
//! let mut allocator = BitmapFrameAlloc::new();
//! let mut vmm = unsafe { Vmm::from_current(&mapper, &mut allocator) };
//!
//! // Map virtual memory regions, manage page tables, etc.
//! ```
//!
//! ### Kernel Heap
//! ```rust
//! use kernel_alloc::heap::KernelHeap;
//!
//! static HEAP: KernelHeap = KernelHeap::new();
//!
//! # let mut backing = [0u8; 4096];
//! // SAFETY: `backing` is exclusively owned by this example.
//! unsafe { HEAP.init(backing.as_mut_ptr() as usize, backing.len()) };
//!
//! let ptr = HEAP.kmalloc(64);
//! assert!(!ptr.is_null());
//! unsafe { HEAP.kfree(ptr, 64) };
//! ```
//!
//! ## Performance Characteristics
//!
//! * **Physical Allocation**: O(n) worst case, O(1) typical case
//! * **Virtual Mapping**: O(1) for single pages, O(n) for regions
//! * **Address Translation**: O(1) with HHDM
//! * **Memory Overhead**: ~1 bit per 4KiB frame for allocation tracking
//!
//! ## Integration Points
//!
//! This crate integrates with several other kernel components:
//! * **kernel-vmem**: Core virtual memory abstractions and types
//! * **kernel-pmm**: Buddy physical frame allocator, adapted to `PhysFrameAlloc`
//!   via [`pmm_adapter::PmmFrameAlloc`]
//! * **kernel-info**: Memory layout constants and configuration
//! * **kernel-sync**: Synchronization primitives for thread safety
//!
//! The modular design enables testing, portability, and future enhancements
//! while maintaining clear separation of concerns between different memory
//! management responsibilities.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod free_list;
pub mod frame_alloc;
pub mod heap;
pub mod phys_mapper;
pub mod pmm_adapter;
pub mod vm_area;
pub mod vmm;
