use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// Memory type encodings used by the PAT entries and by the `PWT`/`PCD`/`PAT`
/// page-table bits that index into them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatType {
    Uncacheable = 0x00,
    WriteCombining = 0x01,
    WriteThrough = 0x04,
    WriteProtected = 0x05,
    WriteBack = 0x06,
    /// Strong uncacheable, cannot be overridden by an MTRR.
    UncacheableStrong = 0x07,
}

/// `IA32_PAT` — Page Attribute Table (MSR `0x277`).
///
/// Holds eight 3-bit memory-type entries (`PA0`..`PA7`), selected by the
/// `PAT`/`PCD`/`PWT` bits of a leaf page-table entry:
///
/// ```text
/// PAT:PCD:PWT -> entry
///  0 : 0 : 0  -> PA0
///  0 : 0 : 1  -> PA1
///  0 : 1 : 0  -> PA2
///  0 : 1 : 1  -> PA3
///  1 : 0 : 0  -> PA4
///  1 : 0 : 1  -> PA5
///  1 : 1 : 0  -> PA6
///  1 : 1 : 1  -> PA7
/// ```
#[bitfield(u64)]
pub struct Ia32Pat {
    #[bits(3)]
    pa0: u8,
    #[bits(5)]
    __reserved0: u8,
    #[bits(3)]
    pa1: u8,
    #[bits(5)]
    __reserved1: u8,
    #[bits(3)]
    pa2: u8,
    #[bits(5)]
    __reserved2: u8,
    #[bits(3)]
    pa3: u8,
    #[bits(5)]
    __reserved3: u8,
    #[bits(3)]
    pa4: u8,
    #[bits(5)]
    __reserved4: u8,
    #[bits(3)]
    pa5: u8,
    #[bits(5)]
    __reserved5: u8,
    #[bits(3)]
    pa6: u8,
    #[bits(5)]
    __reserved6: u8,
    #[bits(3)]
    pa7: u8,
    #[bits(5)]
    __reserved7: u8,
}

impl Ia32Pat {
    /// MSR index for `IA32_PAT`.
    pub const IA32_PAT: u32 = 0x277;

    /// The MSR.
    pub const MSR: Msr = Msr::new(Self::IA32_PAT);

    /// Builds the PAT layout this kernel relies on: entries `{WB, WC, UC, UC,
    /// WB, WC, UC, UC}`, leaving `PA0` at the reset-default `WB` so firmware
    /// mappings made before this MSR is written stay valid, and placing `WC`
    /// at `PA1` (`PWT=1`) so a 4K PTE can request write-combining by setting
    /// `PWT` alone, without touching `PAT`.
    #[must_use]
    pub fn kernel_default() -> Self {
        Self::new()
            .with_pa0(PatType::WriteBack as u8)
            .with_pa1(PatType::WriteCombining as u8)
            .with_pa2(PatType::Uncacheable as u8)
            .with_pa3(PatType::Uncacheable as u8)
            .with_pa4(PatType::WriteBack as u8)
            .with_pa5(PatType::WriteCombining as u8)
            .with_pa6(PatType::Uncacheable as u8)
            .with_pa7(PatType::Uncacheable as u8)
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Ia32Pat {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn load_unsafe() -> Self {
        let msr = unsafe { Self::MSR.load_raw() };
        Self::from_bits(msr)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Ia32Pat {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn store_unsafe(self) {
        unsafe { Self::MSR.store_raw(self.into_bits()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_default_matches_layout() {
        let pat = Ia32Pat::kernel_default();
        assert_eq!(pat.pa0(), PatType::WriteBack as u8);
        assert_eq!(pat.pa1(), PatType::WriteCombining as u8);
        assert_eq!(pat.pa2(), PatType::Uncacheable as u8);
        assert_eq!(pat.pa3(), PatType::Uncacheable as u8);
        assert_eq!(pat.pa4(), PatType::WriteBack as u8);
        assert_eq!(pat.pa5(), PatType::WriteCombining as u8);
        assert_eq!(pat.pa6(), PatType::Uncacheable as u8);
        assert_eq!(pat.pa7(), PatType::Uncacheable as u8);
    }
}
