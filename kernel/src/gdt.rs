//! # Global Descriptor Table (GDT) & Task State Segment (TSS) wiring for long mode
//!
//! In 64-bit mode ("long mode"), classic segmentation for code/data is largely
//! disabled, but **segment selectors still matter**:
//!
//! - They distinguish **code vs. data/stack** segments.
//! - They locate the **Task State Segment (TSS)** through a **16-byte system
//!   descriptor** in the GDT so the CPU can fetch `rsp0` (kernel stack pointer)
//!   and IST stacks on fault handling.
//!
//! This kernel never drops to Ring 3, so the GDT carries only the null
//! descriptor, one kernel code segment, one kernel data segment, and the TSS
//! descriptor — there are no user-mode descriptors and no per-CPU GDTs, since
//! it runs on a single bootstrap processor.
//!
//! ## GDT layout used here
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (64-bit, DPL=0; [`KERNEL_CS_SEL`])
//! 2     | 0x10     | Kernel data (DPL=0; [`KERNEL_DS_SEL`])
//! 3/4   | 0x18     | TSS (16-byte system descriptor; [`TSS_SYS_SEL`])
//!
//! This module builds the GDT, loads it with `lgdt`, refreshes the data
//! segments, and loads the Task Register (`ltr`) with the TSS selector.
//!
//! ## Preconditions
//! - Long mode and paging are enabled.
//! - Interrupts should be masked during the switch to avoid using half-set state.

pub mod descriptors;
pub mod selectors;
pub mod tss_desc;

use crate::gdt::descriptors::Desc64;
use crate::gdt::selectors::{CodeSel, DataSel, SegmentSelector, TssSel};
use crate::gdt::tss_desc::TssDesc64;
use crate::tss::{Tss64, init_tss};
use core::mem::size_of;
use kernel_memory_addresses::VirtualAddress;

#[allow(dead_code)]
pub struct Selectors {
    pub kernel_cs: SegmentSelector<CodeSel>,
    pub kernel_ds: SegmentSelector<DataSel>,
    pub tss: SegmentSelector<TssSel>,
}

impl Selectors {
    pub const fn new() -> Self {
        Self {
            kernel_cs: KERNEL_CS_SEL,
            kernel_ds: KERNEL_DS_SEL,
            tss: TSS_SYS_SEL,
        }
    }
}

impl Default for Selectors {
    fn default() -> Self {
        Self::new()
    }
}

// Well-known selectors matching the GDT layout in this module's doc.
//
// The `*_SEL` are typed wrappers; the `*_` constants are the encoded `u16`
// values (useful for inline asm or iret frames).
pub const KERNEL_CS_SEL: SegmentSelector<CodeSel> = SegmentSelector::<CodeSel>::new(1);
pub const KERNEL_DS_SEL: SegmentSelector<DataSel> = SegmentSelector::<DataSel>::new(2);
pub const TSS_SYS_SEL: SegmentSelector<TssSel> = SegmentSelector::<TssSel>::new(3);

// Encoded selector numbers as `u16` (what the CPU actually loads).
pub const KERNEL_CS: u16 = KERNEL_CS_SEL.encode(); // 0x08
pub const KERNEL_DS: u16 = KERNEL_DS_SEL.encode(); // 0x10
pub const TSS_SEL: u16 = TSS_SYS_SEL.encode(); // 0x18

// Compile-time sanity checks for selectors and descriptor sizes.
#[allow(clippy::items_after_statements)]
const _: () = {
    assert!(KERNEL_CS == 0x08);
    assert!(KERNEL_DS == 0x10);
    assert!(TSS_SEL == 0x18);

    // Encoding formula: (index << 3) | (TI=0) | RPL
    const fn enc(index: u16) -> u16 {
        index << 3
    }

    assert!(KERNEL_CS == enc(1));
    assert!(KERNEL_DS == enc(2));
    assert!(TSS_SEL == enc(3));

    // Typed selectors must produce the same raw values.
    assert!(KERNEL_CS == KERNEL_CS_SEL.encode());
    assert!(KERNEL_DS == KERNEL_DS_SEL.encode());
    assert!(TSS_SEL == TSS_SYS_SEL.encode());
};

/// Virtual address used in descriptor-table pointers (with paging on).
///
/// In long mode `lgdt` expects a **linear (virtual) address** when paging is enabled.
pub type LinearAddress = VirtualAddress;

/// Pointer format required by `lgdt`.
///
/// The CPU reads exactly `limit+1` bytes starting at `base` to load the GDT.
#[repr(C, packed)]
struct DescTablePtr {
    /// Size of the table **minus one** in bytes.
    limit: u16,
    /// Base **linear (virtual) address** of the table in memory.
    base: LinearAddress,
}

/// The complete GDT for the bootstrap CPU.
///
/// Layout matches the table described in this module-level doc. The TSS occupies
/// two consecutive entries (a 16-byte system descriptor).
#[repr(C, align(16))]
pub struct Gdt {
    /// Null descriptor (must be present at index 0).
    null: Desc64, // 0
    /// Kernel code segment (64-bit, DPL=0).
    kcode: Desc64, // 1
    /// Kernel data/stack segment (DPL=0).
    kdata: Desc64, // 2
    /// 64-bit Available TSS descriptor (low+high).
    tss: TssDesc64, // 3 & 4 (16-byte system descriptor)
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

impl Gdt {
    pub const fn new_with_tss(tss: TssDesc64) -> Self {
        Self {
            null: Desc64 { raw: 0 },
            kcode: Desc64::from_code_dpl(0), // kernel code: DPL=0
            kdata: Desc64::from_data_dpl(0), // kernel data: DPL=0
            tss,
        }
    }

    pub const fn new() -> Self {
        Self::new_with_tss(TssDesc64::new(VirtualAddress::zero(), 0))
    }
}

/// Bootstrap-CPU GDT and TSS storage.
///
/// This kernel is single-core: there is exactly one GDT and one TSS, held
/// here as a mutable static the way a per-CPU design would hold one instance
/// per core.
struct Bsp {
    tss: Tss64,
    gdt: Gdt,
}

impl Bsp {
    const fn new() -> Self {
        Self {
            tss: Tss64::new(),
            gdt: Gdt::new(),
        }
    }
}

static mut BSP: Bsp = Bsp::new();

/// Load a GDT with `lgdt`.
///
/// # Safety
/// - `gdt` must point to a valid, fully initialized table whose memory will
///   remain **mapped and readable** for the lifetime of the CPU.
/// - Callers must ensure no interrupts or faults observe a half-installed state.
#[inline]
#[allow(clippy::cast_possible_truncation)]
unsafe fn load_gdt(gdt: &Gdt) {
    let ptr = DescTablePtr {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: LinearAddress::from_ptr(&raw const *gdt),
    };

    unsafe {
        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &raw const ptr,
            options(readonly, nostack, preserves_flags)
        );
    }
}

/// Load the Task Register with a TSS selector.
///
/// The selector must refer to a **present 64-bit Available TSS** system descriptor
/// in the current GDT.
///
/// # Safety
/// - The GDT must be active and contain a valid TSS descriptor at `sel`.
/// - The TSS memory must remain **resident**; the CPU reads from it on traps and
///   privilege changes.
#[inline]
unsafe fn load_task_register(sel: SegmentSelector<TssSel>) {
    let sel = sel.encode();
    unsafe {
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) sel,
            options(nostack, preserves_flags)
        );
    }
}

/// Initialize and load **GDT + TSS** for the bootstrap CPU.
///
/// - Programs the TSS with `rsp0` (kernel entry stack) and `IST1`.
/// - Builds a GDT with the kernel code/data descriptors and a 64-bit TSS descriptor.
/// - Executes `lgdt`, refreshes data segments (DS/ES/SS), and executes `ltr`.
///
/// Call exactly once, during early boot.
///
/// ### Parameters
/// - `kernel_stack_top`: top of the Ring-0 stack.
/// - `ist1_top`: top of the IST1 stack, bound to the double-fault gate.
///
/// ### Safety / Ordering
/// - Run with interrupts disabled.
/// - Long mode + paging are already enabled.
#[allow(clippy::cast_possible_truncation, static_mut_refs)]
pub fn init_gdt_and_tss(kernel_stack_top: VirtualAddress, ist1_top: VirtualAddress) {
    unsafe {
        init_tss(&mut BSP.tss, kernel_stack_top, ist1_top);
        let tss_base = LinearAddress::from_ptr(&raw const BSP.tss);
        let tss_limit = (size_of::<Tss64>() - 1) as u32;

        // Build GDT with typed descriptors (no raw bit twiddling here).
        BSP.gdt = Gdt::new_with_tss(TssDesc64::new(tss_base, tss_limit));

        // Load the GDTR with the bootstrap GDT.
        load_gdt(&BSP.gdt);

        // Refresh data segments to kernel data.
        let kdata_sel = KERNEL_DS_SEL.encode();
        core::arch::asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov ss, {0:x}",
            in(reg) kdata_sel,
            options(nostack, preserves_flags)
        );

        // Far reload of CS. Use the retfq trick in long mode.
        let kcs: u16 = KERNEL_CS_SEL.encode();
        core::arch::asm!(
            // push target CS and RIP, then far return
            "push {cs}",
            "lea rax, [rip + 2f]",
            "push rax",
            "retfq",
            "2:",
            cs = in(reg) u64::from(kcs),
            out("rax") _,
            options(nostack)
        );

        // Load TR with the TSS selector.
        load_task_register(TSS_SYS_SEL);
    }
}
