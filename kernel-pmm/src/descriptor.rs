use bitflags::bitflags;

bitflags! {
    /// A page frame's lifecycle state.
    ///
    /// Exactly one of these is set at a time (see [`crate::Pmm`]'s module docs
    /// for the invariant); this is a `bitflags` type rather than a plain enum
    /// because the frame descriptor is modelled as a bitset end to end.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// On a free-area list; `ref_count == 0`.
        const FREE = 0b001;
        /// Allocated, `ref_count >= 1`.
        const USED = 0b010;
        /// Permanently excluded from the buddy tree (descriptor array storage,
        /// or a memory-map region not typed `USABLE`). Never enters a free list.
        const RESERVED = 0b100;
    }
}

/// One descriptor per 4 KiB physical page, indexed by page-frame number (PFN).
///
/// `prev`/`next` form an index-based intrusive free list within
/// [`crate::Pmm::free_areas`] — PFNs rather than pointers, so the descriptor
/// array can be relocated (or, in tests, backed by a `Vec`) without pointer
/// fixups.
#[derive(Debug, Clone, Copy)]
pub struct PageDescriptor {
    pub flags: PageFlags,
    pub ref_count: u32,
    pub order: u8,
    pub prev: Option<u32>,
    pub next: Option<u32>,
}

impl PageDescriptor {
    pub const RESERVED_INIT: Self = Self {
        flags: PageFlags::RESERVED,
        ref_count: 1,
        order: 0,
        prev: None,
        next: None,
    };
}
