//! Virtual memory: page directories mapping virtual ranges to physical
//! frames with kernel/user + RW permission flags.
//!
//! i386 page-table bit layout is hardware-mandated and not
//! redesigned here; `EntryFlags` just names the bits. The actual CR3 swap
//! and page-table walk are real-hardware-only and live behind
//! `arch::x86::load_directory`; this module owns the bookkeeping both the
//! real directory and the test double share.

use crate::errno::{Errno, KernResult};
use crate::pmem::PAGE_SIZE;
use alloc::collections::BTreeMap;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}

pub const KERNEL_RW: EntryFlags = EntryFlags::PRESENT.union(EntryFlags::WRITABLE);
pub const USER_RW: EntryFlags =
    EntryFlags::PRESENT.union(EntryFlags::WRITABLE).union(EntryFlags::USER);

/// Maps virtual page ranges to physical frames. The shared kernel directory
/// and every per-process directory both implement this so the heap and
/// ioglue loader don't care which one they're handed.
pub trait AddressSpace {
    fn map(&mut self, virt: usize, phys: usize, flags: EntryFlags) -> KernResult<()>;
    fn unmap(&mut self, virt: usize) -> KernResult<()>;
    fn translate(&self, virt: usize) -> Option<usize>;
}

/// A directory modeled as a page-indexed map. On real x86 this backs onto
/// hardware page tables (`arch::x86` walks/installs them); the mapping
/// bookkeeping itself -- what's mapped where, with what permissions -- is
/// architecture-independent and is what this struct owns.
pub struct PageDirectory {
    mappings: BTreeMap<usize, (usize, EntryFlags)>,
}

impl PageDirectory {
    pub fn new() -> Self {
        PageDirectory { mappings: BTreeMap::new() }
    }

    /// A full copy, not copy-on-write: the child gets its own independent
    /// mapping table up front.
    pub fn fork_from(other: &PageDirectory) -> Self {
        PageDirectory { mappings: other.mappings.clone() }
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace for PageDirectory {
    fn map(&mut self, virt: usize, phys: usize, flags: EntryFlags) -> KernResult<()> {
        if virt % PAGE_SIZE != 0 || phys % PAGE_SIZE != 0 {
            return Err(Errno::Einval);
        }
        self.mappings.insert(virt, (phys, flags));
        Ok(())
    }

    fn unmap(&mut self, virt: usize) -> KernResult<()> {
        self.mappings.remove(&virt).map(|_| ()).ok_or(Errno::Einval)
    }

    fn translate(&self, virt: usize) -> Option<usize> {
        let page = virt - (virt % PAGE_SIZE);
        let offset = virt % PAGE_SIZE;
        self.mappings.get(&page).map(|(phys, _)| phys + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_translate_respects_offset() {
        let mut dir = PageDirectory::new();
        dir.map(0x1000, 0x5000, KERNEL_RW).unwrap();
        assert_eq!(dir.translate(0x1004), Some(0x5004));
    }

    #[test]
    fn unmap_removes_translation() {
        let mut dir = PageDirectory::new();
        dir.map(0x2000, 0x6000, KERNEL_RW).unwrap();
        dir.unmap(0x2000).unwrap();
        assert_eq!(dir.translate(0x2000), None);
    }

    #[test]
    fn fork_copies_existing_mappings() {
        let mut dir = PageDirectory::new();
        dir.map(0x3000, 0x7000, USER_RW).unwrap();
        let child = PageDirectory::fork_from(&dir);
        assert_eq!(child.translate(0x3000), Some(0x7000));
    }
}
