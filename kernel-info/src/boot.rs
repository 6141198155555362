//! # Kernel Boot Information
//!
//! The kernel is booted by a Limine-protocol-compatible bootloader, which
//! hands control over directly rather than passing a single boot-info
//! pointer: the kernel issues static `Request` structs (placed in a
//! `.requests` linker section) and the bootloader fills in matching
//! `Response` structs before jumping to the entry point. [`BootInfo`]
//! gathers the subset of those responses the memory-management core needs,
//! in one place, so the rest of the kernel doesn't each reach for the raw
//! Limine protocol types.

/// Kernel entry point signature.
///
/// # ABI
/// `sysv64` (Rust's `extern "C"` on this target) — the Limine protocol calls
/// the entry point with no arguments; `BootInfo` is instead read back out of
/// the static Limine response structs once called.
pub type KernelEntryFn = extern "C" fn() -> !;

/// The subset of the bootloader handoff the memory-management core consumes,
/// assembled from Limine response structs during early boot.
#[derive(Clone)]
pub struct BootInfo {
    /// Higher Half Direct Map offset: `phys_to_virt(p) = p + hhdm_offset`.
    pub hhdm_offset: u64,

    /// Physical memory map, sorted by base address, non-overlapping.
    pub memory_map: MemoryMap,

    /// Physical base address the kernel image was loaded at.
    pub kernel_phys_base: u64,

    /// Virtual base address the kernel image was linked at.
    pub kernel_virt_base: u64,

    /// RSDP (ACPI) physical address, or `None` if the bootloader didn't
    /// provide one. Only the pointer is kept; ACPI parsing is an external
    /// collaborator.
    pub rsdp_addr: Option<u64>,

    /// Framebuffer information, if the bootloader configured one.
    pub fb: Option<FramebufferInfo>,
}

/// A fixed-capacity view over the boot-time physical memory map.
///
/// Bootloader memory maps are bounded at boot time (Limine itself caps
/// entries well under this); a fixed array avoids needing a working
/// allocator before the PMM exists to provide one.
pub const MAX_MEMORY_MAP_ENTRIES: usize = 256;

#[derive(Clone)]
pub struct MemoryMap {
    entries: [MemoryMapEntry; MAX_MEMORY_MAP_ENTRIES],
    len: usize,
}

impl MemoryMap {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: [MemoryMapEntry {
                base: 0,
                length: 0,
                kind: MemoryMapEntryKind::Reserved,
            }; MAX_MEMORY_MAP_ENTRIES],
            len: 0,
        }
    }

    /// Appends an entry. Silently drops entries beyond [`MAX_MEMORY_MAP_ENTRIES`]
    /// (the bootloader would have to report an implausibly fragmented map).
    pub const fn push(&mut self, entry: MemoryMapEntry) {
        if self.len < MAX_MEMORY_MAP_ENTRIES {
            self.entries[self.len] = entry;
            self.len += 1;
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[MemoryMapEntry] {
        &self.entries[..self.len]
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::empty()
    }
}

/// One physical memory region as reported by the bootloader.
#[derive(Debug, Clone, Copy)]
pub struct MemoryMapEntry {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryMapEntryKind,
}

impl MemoryMapEntry {
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base + self.length
    }
}

/// Typed memory-region kinds, matching the Limine memmap protocol's
/// `EntryType` values the PMM cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMapEntryKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    BootloaderReclaimable,
    ExecutableAndModules,
    Framebuffer,
}

impl MemoryMapEntryKind {
    /// Whether [`crate::memory`]'s PMM init should fold this region's extent
    /// into `highest_addr`, per §4.2 step 1.
    #[must_use]
    pub const fn counts_toward_highest_addr(self) -> bool {
        matches!(
            self,
            Self::Usable
                | Self::BootloaderReclaimable
                | Self::ExecutableAndModules
                | Self::Framebuffer
                | Self::AcpiReclaimable
                | Self::AcpiNvs
        )
    }
}

/// Framebuffer information, independent of which bootloader protocol supplied it.
#[derive(Clone)]
pub struct FramebufferInfo {
    /// Linear framebuffer base address (physical). Valid to write once mapped.
    pub framebuffer_ptr: u64,
    /// Total framebuffer size in bytes.
    pub framebuffer_size: u64,
    /// Visible width in pixels.
    pub framebuffer_width: u64,
    /// Visible height in pixels.
    pub framebuffer_height: u64,
    /// Pixels per scanline (may exceed width due to padding).
    pub framebuffer_stride: u64,
    /// Pixel format tag.
    pub framebuffer_format: BootPixelFormat,
    /// Pixel bit masks (only meaningful when `framebuffer_format == Bitmask`).
    pub framebuffer_masks: BootPixelMasks,
}

/// Pixel format tag, independent of the bootloader protocol's own encoding.
#[repr(u32)]
#[derive(Copy, Clone)]
pub enum BootPixelFormat {
    /// 8:8:8 (or bitmask-equivalent), stored as R,G,B in low-to-high bytes.
    Rgb = 0,
    /// 8:8:8 (or bitmask-equivalent), stored as B,G,R in low-to-high bytes.
    Bgr = 1,
    /// Bitmask format — see [`BootPixelMasks`].
    Bitmask = 2,
    /// No linear framebuffer available.
    BltOnly = 3,
}

/// Bit masks for `BootPixelFormat::Bitmask`. Zero for `Rgb`/`Bgr`.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct BootPixelMasks {
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub alpha_mask: u32,
}
