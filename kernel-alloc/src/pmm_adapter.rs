//! # Buddy-allocator `PhysFrameAlloc` adapter
//!
//! `kernel-pmm::Pmm` predates `kernel-vmem`'s `PhysFrameAlloc` trait and
//! allocates/frees by `(PhysicalAddress, size)` pairs rather than typed 4 KiB
//! frames, so the two crates don't depend on each other directly. This
//! adapter is the seam: it borrows a `Pmm` and exposes it as a
//! `PhysFrameAlloc` for the paging code in `vmm`/`kernel-vmem` to call.

use kernel_pmm::Pmm;
use kernel_vmem::PhysFrameAlloc;
use kernel_vmem::addresses::{PhysicalPage, Size4K};

/// Borrows a [`Pmm`] and implements [`PhysFrameAlloc`] over it, one 4 KiB
/// frame at a time.
pub struct PmmFrameAlloc<'a>(pub &'a mut Pmm);

impl<'a> PmmFrameAlloc<'a> {
    #[must_use]
    pub fn new(pmm: &'a mut Pmm) -> Self {
        Self(pmm)
    }
}

impl PhysFrameAlloc for PmmFrameAlloc<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.0.alloc(4096).map(PhysicalPage::from_addr)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        self.0.page_dec_ref(page.base());
    }
}
