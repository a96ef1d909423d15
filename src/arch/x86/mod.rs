//! x86 bit-layout constants and the handful of instructions that can't be
//! expressed in portable Rust: port I/O and the IDT/GDT entry encodings.
//!
//! Grounded on `original_source/sys/machine/interrupts/interrupts.cpp`'s
//! `idt_set_entry` (the 64-bit gate-descriptor packing) and
//! `original_source/sys/syscall/syscall.c`'s `ir_setInterruptHandler(...,
//! 0x80)` for the syscall vector. This module only runs on real x86
//! hardware, so it is excluded entirely when the crate builds for its
//! host test target.

pub mod gdt;
pub mod idt;
pub mod port;

pub use idt::{idt_entry, IdtFlags};

pub const SYSCALL_VECTOR: u8 = 0x80;
