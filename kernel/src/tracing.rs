//! # Kernel Tracing helpers

use kernel_info::boot::{BootInfo, BootPixelFormat};
use kernel_qemu::qemu_trace;

pub fn trace_boot_info(boot_info: &BootInfo) {
    qemu_trace!("Boot Info:\n");
    qemu_trace!("   HHDM offset = {:018x}", boot_info.hhdm_offset);
    qemu_trace!(
        ", kernel phys base = {:018x}",
        boot_info.kernel_phys_base
    );
    qemu_trace!(", kernel virt base = {:018x}", boot_info.kernel_virt_base);
    qemu_trace!("\n");

    qemu_trace!("   MMAP entries = {}", boot_info.memory_map.entries().len());
    match boot_info.rsdp_addr {
        Some(addr) => qemu_trace!(", rsdp addr = {:018x}", addr),
        None => qemu_trace!(", rsdp addr = none"),
    }
    qemu_trace!("\n");

    match &boot_info.fb {
        Some(fb) => {
            qemu_trace!("   FB ptr = {:018x}", fb.framebuffer_ptr);
            qemu_trace!(", FB size = {}", fb.framebuffer_size);
            qemu_trace!(", FB width = {}", fb.framebuffer_width);
            qemu_trace!(", FB height = {}", fb.framebuffer_height);
            qemu_trace!(", FB stride = {}", fb.framebuffer_stride);
            qemu_trace!(", FB format = ");
            match fb.framebuffer_format {
                BootPixelFormat::Rgb => qemu_trace!("RGB"),
                BootPixelFormat::Bgr => qemu_trace!("BGR"),
                BootPixelFormat::Bitmask => qemu_trace!("Bitmask"),
                BootPixelFormat::BltOnly => qemu_trace!("BltOnly"),
            }
            qemu_trace!("\n");
        }
        None => qemu_trace!("   no framebuffer reported\n"),
    }
}

pub fn log_ctrl_bits() {
    unsafe {
        let (mut cr4, mut efer): (u64, u64);
        core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nostack, preserves_flags));
        // read MSR EFER (0xC000_0080)
        let lo: u32;
        let hi: u32;
        core::arch::asm!("rdmsr", in("ecx") 0xC000_0080u32, out("eax") lo, out("edx") hi);
        efer = ((hi as u64) << 32) | (lo as u64);
        qemu_trace!(
            "CR4={:016x} (SMEP={} SMAP={}) EFER={:016x} (NXE={})\n",
            cr4,
            (cr4 >> 20) & 1,
            (cr4 >> 21) & 1,
            efer,
            (efer >> 11) & 1
        );
    }
}
