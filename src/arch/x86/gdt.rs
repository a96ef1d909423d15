//! GDT entry packing and the flat ring0/ring3 segment layout.
//!
//! The original source has no GDT translation unit of its own (segment
//! setup lives in asm the boot stub loads directly); the entry-packing
//! shape here follows `examples/chris17453-watos/src/gdt.rs`'s
//! `GdtEntry::new`, narrowed from that crate's long-mode descriptors to
//! the flat 32-bit ring0/ring3 pairs this kernel actually runs.

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    pub const fn null() -> Self {
        GdtEntry { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    pub const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        GdtEntry {
            limit_low: (limit & 0xffff) as u16,
            base_low: (base & 0xffff) as u16,
            base_mid: ((base >> 16) & 0xff) as u8,
            access,
            granularity: ((limit >> 16) & 0x0f) as u8 | (granularity & 0xf0),
            base_high: ((base >> 24) & 0xff) as u8,
        }
    }
}

pub mod selectors {
    pub const KERNEL_CODE: u16 = 0x08;
    pub const KERNEL_DATA: u16 = 0x10;
    pub const USER_CODE: u16 = 0x18 | 3;
    pub const USER_DATA: u16 = 0x20 | 3;
}

/// Flat ring0/ring3 code+data GDT: base 0, limit spans all 4GiB, 4KiB
/// granularity.
#[repr(C, packed)]
pub struct Gdt {
    null: GdtEntry,
    kernel_code: GdtEntry,
    kernel_data: GdtEntry,
    user_code: GdtEntry,
    user_data: GdtEntry,
}

impl Gdt {
    pub const fn new() -> Self {
        Gdt {
            null: GdtEntry::null(),
            kernel_code: GdtEntry::new(0, 0xfffff, 0x9a, 0xc0),
            kernel_data: GdtEntry::new(0, 0xfffff, 0x92, 0xc0),
            user_code: GdtEntry::new(0, 0xfffff, 0xfa, 0xc0),
            user_data: GdtEntry::new(0, 0xfffff, 0xf2, 0xc0),
        }
    }
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}
