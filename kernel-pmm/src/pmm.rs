use crate::descriptor::{PageDescriptor, PageFlags};
use crate::error::PmmError;
use kernel_info::boot::{MemoryMap, MemoryMapEntry, MemoryMapEntryKind, MAX_MEMORY_MAP_ENTRIES};
use kernel_info::memory::PMM_MAX_ORDER;
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, warn};

const PAGE_SIZE: u64 = 4096;

struct FreeArea {
    head: Option<u32>,
    nr_free: usize,
}

impl FreeArea {
    const fn empty() -> Self {
        Self {
            head: None,
            nr_free: 0,
        }
    }
}

/// Buddy-system physical frame allocator.
///
/// Owns every physical page up to [`Pmm::highest_addr`]; see `kernel-pmm`'s
/// crate docs for the free/alloc algorithm. A future multi-core kernel wraps
/// this behind one `kernel_sync::SpinLock<Pmm>` — the type itself assumes a
/// single caller at a time, matching the source PMM's lack of internal locking.
pub struct Pmm {
    descriptors: &'static mut [PageDescriptor],
    free_areas: [FreeArea; PMM_MAX_ORDER],
    total_pages: usize,
    used_pages: usize,
    highest_addr: PhysicalAddress,
}

impl Pmm {
    /// Scans `memory_map`, places the page-descriptor array in the first
    /// `USABLE` region large enough to hold it (via its HHDM mapping), marks
    /// every page `RESERVED`, then walks each `USABLE` region releasing it
    /// into the buddy tree. See §4.2 steps 1–5.
    ///
    /// # Safety
    /// `hhdm_offset` must be the bootloader's real HHDM offset, and the
    /// entire physical range described by `memory_map` must already be
    /// mapped at `hhdm_offset + phys`.
    pub unsafe fn init(hhdm_offset: u64, memory_map: &MemoryMap) -> Result<Self, PmmError> {
        let mut regions = [MemoryMapEntry {
            base: 0,
            length: 0,
            kind: MemoryMapEntryKind::Reserved,
        }; MAX_MEMORY_MAP_ENTRIES];
        let region_count = memory_map.entries().len();
        regions[..region_count].copy_from_slice(memory_map.entries());

        let mut highest_addr = 0u64;
        for region in &regions[..region_count] {
            if region.kind.counts_toward_highest_addr() {
                highest_addr = highest_addr.max(region.end());
            }
        }

        let total_pages = usize::try_from(highest_addr.div_ceil(PAGE_SIZE)).unwrap_or(0);
        let desc_bytes = (total_pages * core::mem::size_of::<PageDescriptor>()) as u64;
        let desc_bytes_aligned = desc_bytes.div_ceil(PAGE_SIZE) * PAGE_SIZE;

        let desc_region = regions[..region_count]
            .iter_mut()
            .find(|r| r.kind == MemoryMapEntryKind::Usable && r.length >= desc_bytes_aligned)
            .ok_or(PmmError::NoRoomForDescriptors(desc_bytes_aligned))?;

        let desc_phys = desc_region.base;
        desc_region.base += desc_bytes_aligned;
        desc_region.length -= desc_bytes_aligned;

        // SAFETY: caller guarantees `hhdm_offset + desc_phys` is mapped and
        // large enough for `total_pages` descriptors; this is the only live
        // reference to that range.
        let descriptors: &'static mut [PageDescriptor] = unsafe {
            let ptr = (hhdm_offset + desc_phys) as *mut PageDescriptor;
            core::slice::from_raw_parts_mut(ptr, total_pages)
        };
        descriptors.fill(PageDescriptor::RESERVED_INIT);

        let free_areas = core::array::from_fn(|_| FreeArea::empty());
        let mut pmm = Self {
            descriptors,
            free_areas,
            total_pages,
            used_pages: total_pages,
            highest_addr: PhysicalAddress::new(highest_addr),
        };

        for region in &regions[..region_count] {
            if region.kind != MemoryMapEntryKind::Usable || region.length == 0 {
                continue;
            }
            let start = region.base.div_ceil(PAGE_SIZE) * PAGE_SIZE;
            let end = region.end() / PAGE_SIZE * PAGE_SIZE;
            pmm.release_region(start, end);
        }

        debug!(
            "pmm: {} pages total ({} MiB), highest_addr = {}",
            pmm.total_pages,
            (pmm.total_pages as u64 * PAGE_SIZE) / (1024 * 1024),
            pmm.highest_addr,
        );
        Ok(pmm)
    }

    /// The "largest-aligned-block" release walk of §4.2 step 5. Page 0 is
    /// never released, per policy.
    fn release_region(&mut self, mut current: u64, end: u64) {
        while current < end {
            if current == 0 {
                current += PAGE_SIZE;
                continue;
            }
            let mut order = PMM_MAX_ORDER - 1;
            loop {
                let block = PAGE_SIZE << order;
                if current.is_multiple_of(block) && current + block <= end {
                    break;
                }
                if order == 0 {
                    break;
                }
                order -= 1;
            }
            let block = PAGE_SIZE << order;
            self.free_pages(PhysicalAddress::new(current), order as u8);
            self.used_pages -= 1usize << order;
            current += block;
        }
    }

    /// Logs the raw usable regions from the boot memory map, before they are
    /// folded into the buddy tree. Corresponds to the source's
    /// `pmm_printUsableRegions`.
    pub fn dump_usable_regions(memory_map: &MemoryMap) {
        for region in memory_map.entries() {
            if region.kind == MemoryMapEntryKind::Usable {
                debug!(
                    "pmm: usable region [{:#x}, {:#x}) ({} KiB)",
                    region.base,
                    region.end(),
                    region.length / 1024
                );
            }
        }
    }

    /// Logs per-order free-block counts and total/used/free memory, in MiB.
    /// Corresponds to the source's `pmm_dump_state`.
    pub fn dump_state(&self) {
        debug!(
            "pmm: total = {} MiB, used = {} MiB, free = {} MiB",
            (self.total_pages as u64 * PAGE_SIZE) / (1024 * 1024),
            (self.used_pages as u64 * PAGE_SIZE) / (1024 * 1024),
            ((self.total_pages - self.used_pages) as u64 * PAGE_SIZE) / (1024 * 1024),
        );
        for (order, area) in self.free_areas.iter().enumerate() {
            if area.nr_free > 0 {
                debug!("pmm:   order {order:2}: {:5} free blocks", area.nr_free);
            }
        }
    }

    #[must_use]
    pub const fn highest_addr(&self) -> PhysicalAddress {
        self.highest_addr
    }

    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.total_pages
    }

    #[must_use]
    pub const fn used_pages(&self) -> usize {
        self.used_pages
    }

    /// Allocates the smallest naturally-aligned block covering `size` bytes.
    pub fn alloc(&mut self, size: u64) -> Option<PhysicalAddress> {
        let order = Self::order_for_size(size)?;
        let pa = self.alloc_pages(order)?;
        self.used_pages += 1usize << order;
        Some(pa)
    }

    /// Frees a block previously returned by [`Pmm::alloc`] with the same `length`.
    pub fn free(&mut self, phys: PhysicalAddress, length: u64) {
        let Some(order) = Self::order_for_size(length) else {
            warn!("pmm: free() with length {length} exceeds the largest buddy order, ignoring");
            return;
        };
        if phys.as_u64() % PAGE_SIZE != 0 {
            warn!("pmm: free() of unaligned address {phys}, ignoring");
            return;
        }
        self.used_pages = self.used_pages.saturating_sub(1usize << order);
        self.free_pages(phys, order);
    }

    /// Increments a page's reference count. Only meaningful for `USED` pages.
    pub fn page_inc_ref(&mut self, phys: PhysicalAddress) {
        let Some(pfn) = self.pfn_of(phys) else {
            return;
        };
        let descriptor = &mut self.descriptors[pfn as usize];
        if descriptor.flags.contains(PageFlags::USED) {
            descriptor.ref_count += 1;
        }
    }

    /// Decrements a page's reference count; frees it at its recorded order
    /// once the count reaches zero. Only meaningful for `USED` pages.
    pub fn page_dec_ref(&mut self, phys: PhysicalAddress) {
        let Some(pfn) = self.pfn_of(phys) else {
            return;
        };
        let descriptor = &mut self.descriptors[pfn as usize];
        if !descriptor.flags.contains(PageFlags::USED) || descriptor.ref_count == 0 {
            return;
        }
        descriptor.ref_count -= 1;
        if descriptor.ref_count == 0 {
            let order = descriptor.order;
            self.used_pages = self.used_pages.saturating_sub(1usize << order);
            self.free_pages(PhysicalAddress::new(u64::from(pfn) * PAGE_SIZE), order);
        }
    }

    fn pfn_of(&self, phys: PhysicalAddress) -> Option<u32> {
        let pfn = phys.as_u64() / PAGE_SIZE;
        let pfn = u32::try_from(pfn).ok()?;
        if (pfn as usize) < self.total_pages {
            Some(pfn)
        } else {
            None
        }
    }

    fn order_for_size(size: u64) -> Option<u8> {
        let pages = size.div_ceil(PAGE_SIZE).max(1);
        let order = (u64::BITS - (pages - 1).leading_zeros()) as u8;
        if (order as usize) < PMM_MAX_ORDER {
            Some(order)
        } else {
            None
        }
    }

    /// `pmm_alloc_pages`: scan orders `order..MAX_ORDER` for the first
    /// non-empty free list, pop its head, split it down to `order`.
    fn alloc_pages(&mut self, order: u8) -> Option<PhysicalAddress> {
        let mut k = order;
        while (k as usize) < PMM_MAX_ORDER && self.free_areas[k as usize].nr_free == 0 {
            k += 1;
        }
        if (k as usize) >= PMM_MAX_ORDER {
            return None;
        }

        let pfn = self.pop_front(k)?;
        let mut k = k;
        while k > order {
            k -= 1;
            let buddy_pfn = pfn ^ (1u32 << k);
            self.descriptors[buddy_pfn as usize] = PageDescriptor {
                flags: PageFlags::FREE,
                ref_count: 0,
                order: k,
                prev: None,
                next: None,
            };
            self.push_front(buddy_pfn, k);
        }

        let descriptor = &mut self.descriptors[pfn as usize];
        descriptor.flags = PageFlags::USED;
        descriptor.ref_count = 1;
        descriptor.order = order;
        Some(PhysicalAddress::new(u64::from(pfn) * PAGE_SIZE))
    }

    /// `pmm_free_pages`: coalesce with buddies while they're free and of the
    /// same order, then insert the (possibly merged) head at its final order.
    fn free_pages(&mut self, phys: PhysicalAddress, order: u8) {
        if phys.as_u64() % PAGE_SIZE != 0 {
            warn!("pmm: free_pages() of unaligned address {phys}, ignoring");
            return;
        }
        let Some(mut pfn) = self.pfn_of(phys) else {
            return;
        };
        let mut order = order;
        while (order as usize) < PMM_MAX_ORDER - 1 {
            let buddy_pfn = pfn ^ (1u32 << order);
            if (buddy_pfn as usize) >= self.total_pages {
                break;
            }
            let buddy = &self.descriptors[buddy_pfn as usize];
            if !buddy.flags.contains(PageFlags::FREE) || buddy.order != order {
                break;
            }
            self.remove(buddy_pfn, order);
            pfn = pfn.min(buddy_pfn);
            order += 1;
        }

        let descriptor = &mut self.descriptors[pfn as usize];
        descriptor.flags = PageFlags::FREE;
        descriptor.ref_count = 0;
        descriptor.order = order;
        self.push_front(pfn, order);
    }

    fn push_front(&mut self, pfn: u32, order: u8) {
        let old_head = self.free_areas[order as usize].head;
        self.descriptors[pfn as usize].next = old_head;
        self.descriptors[pfn as usize].prev = None;
        if let Some(head) = old_head {
            self.descriptors[head as usize].prev = Some(pfn);
        }
        self.free_areas[order as usize].head = Some(pfn);
        self.free_areas[order as usize].nr_free += 1;
    }

    fn pop_front(&mut self, order: u8) -> Option<u32> {
        let head = self.free_areas[order as usize].head?;
        self.remove(head, order);
        Some(head)
    }

    fn remove(&mut self, pfn: u32, order: u8) {
        let (prev, next) = {
            let d = &self.descriptors[pfn as usize];
            (d.prev, d.next)
        };
        match prev {
            Some(p) => self.descriptors[p as usize].next = next,
            None => self.free_areas[order as usize].head = next,
        }
        if let Some(n) = next {
            self.descriptors[n as usize].prev = prev;
        }
        self.descriptors[pfn as usize].prev = None;
        self.descriptors[pfn as usize].next = None;
        self.free_areas[order as usize].nr_free -= 1;
    }
}
