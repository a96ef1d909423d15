//! Multiboot info and kernel command-line parsing.
//!
//! Grounded on `original_source/sys/bootstrap/boot.c`'s `sys_boot`: the
//! fields it reads off the multiboot struct (`mods_count`, `mods_addr`,
//! `mmap_*`) and the `sys_init` essential-module gate are reproduced here
//! as `BootInfo`'s fields and `Flags`'s parsing of `--no-ioglue` /
//! `--heap-secure`. The raw multiboot struct itself is read with
//! `read_unaligned` the same way `ioglue::elf` reads ELF headers out of an
//! unaligned byte buffer, since the bootloader gives no alignment
//! guarantee.

use crate::heap::HeapFlags;

/// Multiboot1 info struct layout (only the fields the kernel reads), per
/// the Multiboot Specification.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawMultiboot {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    syms: [u32; 4],
    mmap_length: u32,
    mmap_addr: u32,
}

const FLAG_MEM: u32 = 1 << 0;
const FLAG_MODS: u32 = 1 << 3;
const FLAG_MMAP: u32 = 1 << 6;
const FLAG_CMDLINE: u32 = 1 << 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootInfo {
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub mmap_addr: u32,
    pub mmap_length: u32,
    pub cmdline: u32,
}

/// Reads a `RawMultiboot` out of `bytes` (as the bootloader hands it, with
/// no alignment guarantee) and keeps only the fields its `flags` bitmap
/// says are present; an absent field is left at its `Default`.
pub fn parse(bytes: &[u8]) -> Option<BootInfo> {
    if bytes.len() < core::mem::size_of::<RawMultiboot>() {
        return None;
    }
    let raw = unsafe { (bytes.as_ptr() as *const RawMultiboot).read_unaligned() };

    let mut info = BootInfo::default();
    if raw.flags & FLAG_MEM != 0 {
        info.mem_lower = raw.mem_lower;
        info.mem_upper = raw.mem_upper;
    }
    if raw.flags & FLAG_MODS != 0 {
        info.mods_count = raw.mods_count;
        info.mods_addr = raw.mods_addr;
    }
    if raw.flags & FLAG_MMAP != 0 {
        info.mmap_addr = raw.mmap_addr;
        info.mmap_length = raw.mmap_length;
    }
    if raw.flags & FLAG_CMDLINE != 0 {
        info.cmdline = raw.cmdline;
    }
    Some(info)
}

/// Flags the kernel command-line can toggle: `--no-ioglue` skips dynamic
/// library loading entirely, `--heap-secure` turns on the zone heap's
/// `Secure` (zero-on-free) behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub no_ioglue: bool,
    pub heap_secure: bool,
}

impl Flags {
    pub fn parse(cmdline: &str) -> Flags {
        let mut flags = Flags::default();
        for token in cmdline.split_whitespace() {
            match token {
                "--no-ioglue" => flags.no_ioglue = true,
                "--heap-secure" => flags.heap_secure = true,
                _ => {}
            }
        }
        flags
    }

    pub fn heap_flags(&self) -> HeapFlags {
        if self.heap_secure {
            HeapFlags::SECURE
        } else {
            HeapFlags::empty()
        }
    }
}
