//! # Kernel heap — growable free-list allocator
//!
//! `kmalloc`/`kfree` over a [`FreeListAllocator`](crate::free_list::FreeListAllocator)
//! arena that starts at [`kernel_info::memory::KHEAP_STARTING_SIZE`] bytes and
//! grows on demand by [`kernel_info::memory::KHEAP_EXTENDING_AMOUNT`] whenever
//! `kmalloc` can't find a fit.
//!
//! Growth itself (mapping fresh pages) is not this module's job: it requires
//! a live [`kernel_vmem::AddressSpace`] and frame allocator, both of which are
//! owned by whatever part of the kernel finished boot. Instead, `KernelHeap`
//! is grown through a [`GrowHook`] wired up once via [`set_grow_hook`] during
//! init, mirroring how the teacher's allocator takes its backing store as a
//! one-time init call rather than a generic parameter.

use crate::free_list::FreeListAllocator;
use kernel_info::memory::KHEAP_EXTENDING_AMOUNT;
use kernel_sync::{SpinLock, SyncOnceCell};
use log::{debug, warn};

/// Maps `additional` bytes of fresh, zeroed virtual memory immediately after
/// the heap's current end and returns `(start_va, len)` of the newly mapped
/// region, or `None` on OOM.
///
/// Set once via [`set_grow_hook`]; typically a small closure-turned-fn-pointer
/// in the `kernel` binary that locks the global PMM and kernel address space
/// and calls `Vmm::map_anon_4k_pages`.
pub type GrowHook = fn(additional: u64) -> Option<(u64, u64)>;

static GROW_HOOK: SyncOnceCell<GrowHook> = SyncOnceCell::new();

/// Wire up the heap's growth hook. Idempotent: only the first call takes
/// effect, matching [`kernel_sync::SyncOnceCell`]'s one-shot semantics.
pub fn set_grow_hook(hook: GrowHook) {
    GROW_HOOK.get_or_init(|| hook);
}

/// The kernel heap: a lock-protected free-list arena plus on-demand growth.
pub struct KernelHeap {
    alloc: SpinLock<FreeListAllocator>,
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelHeap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            alloc: SpinLock::new(FreeListAllocator::new()),
        }
    }

    /// Initialize the heap over `[start, start + len)`.
    ///
    /// # Safety
    /// `[start, start + len)` must already be mapped, writable, and exclusive
    /// to this heap (see §4.5's "heap initialises 1 MiB above the kernel end").
    pub unsafe fn init(&self, start: usize, len: usize) {
        self.alloc.with_lock(|a| {
            if !a.is_initialized() {
                unsafe {
                    a.init(start, len);
                }
            }
        });
    }

    /// Allocate `size` bytes (rounded up to 16), first-fit. Extends the heap
    /// by [`KHEAP_EXTENDING_AMOUNT`] and retries on exhaustion; returns null
    /// if extension itself fails (true OOM).
    #[must_use]
    pub fn kmalloc(&self, size: usize) -> *mut u8 {
        loop {
            let ptr = self.alloc.with_lock(|a| unsafe { a.find_region(size, 16) });
            if !ptr.is_null() {
                return ptr;
            }
            if !self.kheap_extend(KHEAP_EXTENDING_AMOUNT) {
                warn!("kmalloc: out of heap memory requesting {size} bytes");
                return core::ptr::null_mut();
            }
        }
    }

    /// Free a block previously returned by [`kmalloc`](Self::kmalloc).
    ///
    /// # Safety
    /// `ptr` must be a live allocation from this heap and `size` must match
    /// the size originally requested.
    pub unsafe fn kfree(&self, ptr: *mut u8, size: usize) {
        self.alloc
            .with_lock(|a| unsafe { a.deallocate(ptr, size, 16) });
    }

    /// Grow the heap by `amount` bytes via the wired-up [`GrowHook`].
    ///
    /// Returns `false` if no hook is wired up yet, or the hook reports OOM.
    fn kheap_extend(&self, amount: u64) -> bool {
        let Some(hook) = GROW_HOOK.get() else {
            warn!("kheap_extend: no growth hook registered, cannot extend heap");
            return false;
        };
        let Some((start, len)) = hook(amount) else {
            warn!("kheap_extend: out of physical memory extending heap by {amount} bytes");
            return false;
        };
        debug!("kheap_extend: heap grew by {len} bytes at {start:#x}");
        self.alloc
            .with_lock(|a| unsafe { a.grow(start as usize, len as usize) });
        true
    }

    /// Log every node's size/free state at `debug!` level.
    pub fn dump_nodes(&self) {
        self.alloc.with_lock(FreeListAllocator::dump_nodes);
    }
}
