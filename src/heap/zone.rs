//! Zones and allocation records. See `original_source/lib/libc/sys/zone.c`
//! for the algorithm this is ported from; the one deliberate departure is
//! that records live in an ordinary `Vec` (the "arena + offsets" model spec
//! section 9 suggests) instead of being packed into the zone's first page,
//! since a kernel zone's metadata doesn't need to be byte-addressable the
//! way the source's mmap-backed userspace zone did.

use super::pages_for_class;
use crate::errno::KernResult;
use crate::pmem::{PageAllocator, Frame, PAGE_SIZE};
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Tiny,
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn for_size(size: usize) -> SizeClass {
        if size > 2048 {
            SizeClass::Large
        } else if size > 256 {
            SizeClass::Medium
        } else if size > 64 {
            SizeClass::Small
        } else {
            SizeClass::Tiny
        }
    }
}

/// Matches the 4-byte Tiny record layout exactly; the Regular
/// record size is this crate's choice for the i386 field layout
/// (type + pad + size:u32 + pointer:u32).
const TINY_RECORD_SIZE: usize = 4;
const REGULAR_RECORD_SIZE: usize = 12;
const ZONE_HEADER_SIZE: usize = 64;

const TINY_MAX_SIZE: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    Free,
    Used,
    Unused,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AllocationRecord {
    pub state: RecordState,
    pub size: usize,
    /// Tiny: offset from zone.begin. Regular: absolute address.
    pub location: usize,
}

impl AllocationRecord {
    fn address(&self, header: &ZoneHeader) -> usize {
        match header.class {
            SizeClass::Tiny => header.begin + self.location,
            _ => self.location,
        }
    }

    pub fn size(&self, _class: SizeClass) -> usize {
        self.size
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneHeader {
    pub class: SizeClass,
    pub begin: usize,
    pub end: usize,
    pub allocations: usize,
    pub free_allocations: usize,
    pub free_size: usize,
    pub changes: usize,
}

impl ZoneHeader {
    pub fn contains(&self, ptr: usize) -> bool {
        ptr >= self.begin && ptr < self.end
    }
}

pub(crate) struct Zone {
    pub header: ZoneHeader,
    pub next: Option<alloc::boxed::Box<Zone>>,
    records: Vec<AllocationRecord>,
    frame: Frame,
    pages: usize,
}

fn record_size_for(class: SizeClass) -> usize {
    if class == SizeClass::Tiny { TINY_RECORD_SIZE } else { REGULAR_RECORD_SIZE }
}

impl Zone {
    pub fn max_allocations(&self) -> usize {
        (PAGE_SIZE - ZONE_HEADER_SIZE) / record_size_for(self.header.class)
    }

    pub fn create<A: PageAllocator>(
        class: SizeClass,
        requested_size: usize,
        allocator: &mut A,
    ) -> KernResult<Zone> {
        let pages = pages_for_class(class, requested_size);
        let frame = allocator.alloc_contiguous(pages)?;
        let begin = allocator.frame_to_addr(frame);
        let end = begin + pages * PAGE_SIZE;
        let free_size = pages * PAGE_SIZE;

        let max_allocations = (PAGE_SIZE - ZONE_HEADER_SIZE) / record_size_for(class);

        let mut records = Vec::with_capacity(max_allocations);

        if class == SizeClass::Tiny {
            let mut size_left = free_size;
            let mut offset = 0usize;
            for _ in 0..max_allocations {
                if size_left > 0 {
                    let sz = size_left.min(TINY_MAX_SIZE);
                    records.push(AllocationRecord { state: RecordState::Free, size: sz, location: offset });
                    offset += sz;
                    size_left -= sz;
                } else {
                    records.push(AllocationRecord { state: RecordState::Unused, size: 0, location: 0 });
                }
            }
        } else {
            records.push(AllocationRecord { state: RecordState::Free, size: free_size, location: begin });
            for _ in 1..max_allocations {
                records.push(AllocationRecord { state: RecordState::Unused, size: 0, location: 0 });
            }
        }

        let allocations = records.iter().filter(|r| r.state != RecordState::Unused).count();
        let free_allocations = allocations;

        Ok(Zone {
            header: ZoneHeader { class, begin, end, allocations, free_allocations, free_size, changes: 0 },
            next: None,
            records,
            frame,
            pages,
        })
    }

    pub fn destroy<A: PageAllocator>(self, allocator: &mut A) {
        allocator.free(self.frame, self.pages);
    }

    /// Index of a Free record with room for `required` bytes.
    pub fn find_free_record(&self, required: usize) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.state == RecordState::Free && r.size >= required)
    }

    fn find_unused_record(&self) -> Option<usize> {
        self.records.iter().position(|r| r.state == RecordState::Unused)
    }

    fn find_record_at_address(&self, addr: usize) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.state != RecordState::Unused && r.address(&self.header) == addr)
    }

    pub fn find_used_record(&mut self, ptr: usize) -> Option<RecordHandle<'_>> {
        let index = self
            .records
            .iter()
            .position(|r| r.state == RecordState::Used && r.address(&self.header) == ptr)?;
        Some(RecordHandle { zone: self, index })
    }

    /// Marks the Free record at `index` Used, splitting off the remainder
    /// into an Unused slot when one is available and the record is larger
    /// than required. Returns the usable address.
    pub fn use_record(&mut self, index: usize, required: usize) -> usize {
        let class = self.header.class;
        let tiny_cap_hit = class == SizeClass::Tiny && self.records[index].size - required > TINY_MAX_SIZE;

        self.records[index].state = RecordState::Used;
        let addr = self.records[index].address(&self.header);

        if self.records[index].size > required && !tiny_cap_hit {
            if let Some(unused_idx) = self.find_unused_record() {
                let old_size = self.records[index].size;
                let old_location = self.records[index].location;

                self.records[unused_idx].size = old_size - required;
                self.records[unused_idx].location = old_location + required;
                self.records[unused_idx].state = RecordState::Free;

                self.records[index].size = required;

                self.header.free_allocations += 1;
                self.header.allocations += 1;
                // Only `required` left the free pool; the split remainder
                // is still Free.
                self.header.free_size -= required;
            } else {
                self.header.free_size -= self.records[index].size;
            }
        } else {
            self.header.free_size -= self.records[index].size;
        }

        self.header.free_allocations -= 1;
        addr
    }

    pub fn defragment(&mut self) {
        let threshold = if self.header.class == SizeClass::Tiny { 100 } else { 20 };
        if self.header.changes < threshold || self.header.free_allocations < 2 {
            return;
        }

        for i in 0..self.records.len() {
            loop {
                if self.records[i].state != RecordState::Free {
                    break;
                }
                let next_addr = self.records[i].address(&self.header) + self.records[i].size;
                let Some(next_idx) = self.find_record_at_address(next_addr) else { break };
                if self.records[next_idx].state != RecordState::Free {
                    break;
                }
                if self.header.class == SizeClass::Tiny
                    && self.records[i].size + self.records[next_idx].size > TINY_MAX_SIZE
                {
                    break;
                }

                let merged = self.records[i].size + self.records[next_idx].size;
                self.records[i].size = merged;
                self.records[next_idx].state = RecordState::Unused;
                self.records[next_idx].location = 0;

                self.header.allocations -= 1;
                self.header.free_allocations -= 1;
            }
        }

        self.header.changes = 0;
    }
}

/// Borrowed handle to a specific record, so `Heap::free` can look one up and
/// then hand it straight to `free_record` without re-scanning.
pub struct RecordHandle<'a> {
    zone: &'a mut Zone,
    index: usize,
}

impl<'a> RecordHandle<'a> {
    pub fn size(&self, class: SizeClass) -> usize {
        self.zone.records[self.index].size(class)
    }

    pub fn free(self) {
        let index = self.index;
        self.zone.records[index].state = RecordState::Free;
        self.zone.header.free_size += self.zone.records[index].size;
        self.zone.header.free_allocations += 1;
        self.zone.header.changes += 1;
    }
}
