//! Kernel symbol stub table: the kernel's own exports, consulted before
//! anything in the dependency graph. Grounded on
//! `original_source/sys/ioglue/iostore.c`'s kernel stub library, which
//! exposes a fixed set of kernel functions to loaded libraries the same
//! way a regular shared object would, without involving a real ELF image.
//!
//! Real entries would point at actual kernel function addresses; this
//! table's values are placeholders until the symbols they name are wired up
//! to real kernel routines.

pub struct KernelStub {
    name: &'static str,
    address: usize,
}

/// Fixed at compile time because the kernel's exported surface doesn't
/// change at runtime the way a loaded library's symbol table can.
static STUBS: &[KernelStub] = &[
    KernelStub { name: "kprint", address: 0x1 },
    KernelStub { name: "kmalloc", address: 0x2 },
    KernelStub { name: "kfree", address: 0x3 },
    KernelStub { name: "thread_sleep", address: 0x4 },
    KernelStub { name: "port_send", address: 0x5 },
];

pub fn lookup(name: &str) -> Option<usize> {
    STUBS.iter().find(|s| s.name == name).map(|s| s.address)
}
