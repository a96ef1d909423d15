//! A single loaded ELF shared object: its image, its `PT_DYNAMIC` tables,
//! and the metadata the linker needs to resolve symbols and relocate it.
//!
//! Grounded on `original_source/sys/ioglue/iostore.c`'s load sequence. That
//! source copies `PT_LOAD` segments into real, separately-mapped virtual
//! memory and keeps raw pointers into it; this crate instead owns one
//! contiguous `Vec<u8>` sized to the image's full virtual footprint and
//! treats its base address as `relocBase`, since there's no working paging
//! layer in the host test environment this needs to run against. On real
//! hardware the same `Vec<u8>` would be backed by pages mapped at a fixed
//! virtual address via `vmem::AddressSpace`, which is a drop-in swap behind
//! this same struct.

use super::elf::*;
use crate::errno::{Errno, KernResult};
use crate::pmem::PAGE_SIZE;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

pub struct Library {
    pub name: String,
    pub needed: Vec<String>,
    pub pages: usize,
    image: Vec<u8>,
    entry_off: u32,
    symtab_off: usize,
    strtab_off: usize,
    strtab_size: usize,
    hashtab_off: usize,
    rel_off: usize,
    rel_count: usize,
    pltrel_off: usize,
    pltrel_count: usize,
    init_array_off: usize,
    init_array_count: usize,
}

#[derive(Default)]
struct DynamicInfo {
    symtab_off: usize,
    strtab_off: usize,
    strtab_size: usize,
    hashtab_off: usize,
    rel_off: usize,
    rel_size: usize,
    rel_ent: usize,
    pltrel_off: usize,
    pltrel_size: usize,
    init_array_off: usize,
    init_array_size: usize,
    needed_str_offsets: Vec<u32>,
}

impl Library {
    /// Parses `file`, lays out its `PT_LOAD` segments into a fresh image
    /// buffer, and caches the `PT_DYNAMIC` table pointers. Does not resolve
    /// `DT_NEEDED` names into libraries or relocate anything -- that's the
    /// registry's and `reloc` module's job respectively.
    pub fn load(name: String, file: &[u8]) -> KernResult<Library> {
        let header = Elf32Header::parse(file).ok_or(Errno::Einval)?;

        let mut footprint = 0usize;
        let mut loads: Vec<Elf32ProgramHeader> = Vec::new();
        let mut dynamic: Option<Elf32ProgramHeader> = None;

        for i in 0..header.e_phnum as usize {
            let off = header.e_phoff as usize + i * header.e_phentsize as usize;
            if off + Elf32ProgramHeader::SIZE > file.len() {
                return Err(Errno::Einval);
            }
            let ph = unsafe { core::ptr::read_unaligned(file.as_ptr().add(off) as *const Elf32ProgramHeader) };
            match ph.p_type {
                PT_LOAD => {
                    footprint = footprint.max(ph.p_vaddr as usize + ph.p_memsz as usize);
                    loads.push(ph);
                }
                PT_DYNAMIC => dynamic = Some(ph),
                _ => {}
            }
        }

        let pages = footprint.div_ceil(PAGE_SIZE).max(1);
        let mut image = vec![0u8; pages * PAGE_SIZE];

        for ph in &loads {
            let src_start = ph.p_offset as usize;
            let src_end = src_start + ph.p_filesz as usize;
            if src_end > file.len() {
                return Err(Errno::Einval);
            }
            let dst_start = ph.p_vaddr as usize;
            let dst_end = dst_start + ph.p_filesz as usize;
            image[dst_start..dst_end].copy_from_slice(&file[src_start..src_end]);
        }

        let dyn_info = match dynamic {
            Some(ph) => parse_dynamic(&image, ph.p_vaddr as usize, ph.p_memsz as usize)?,
            None => DynamicInfo::default(),
        };

        let mut library = Library {
            name,
            needed: Vec::new(),
            pages,
            image,
            entry_off: header.e_entry,
            symtab_off: dyn_info.symtab_off,
            strtab_off: dyn_info.strtab_off,
            strtab_size: dyn_info.strtab_size,
            hashtab_off: dyn_info.hashtab_off,
            rel_off: dyn_info.rel_off,
            rel_count: if dyn_info.rel_ent > 0 { dyn_info.rel_size / dyn_info.rel_ent } else { 0 },
            pltrel_off: dyn_info.pltrel_off,
            pltrel_count: dyn_info.pltrel_size / Elf32Rel::SIZE.max(1),
            init_array_off: dyn_info.init_array_off,
            init_array_count: dyn_info.init_array_size / 4,
        };

        for str_off in &dyn_info.needed_str_offsets {
            library.needed.push(String::from(library.c_str_at(library.strtab_off + *str_off as usize)));
        }

        Ok(library)
    }

    pub fn reloc_base(&self) -> usize {
        self.image.as_ptr() as usize
    }

    pub fn entry(&self) -> usize {
        self.reloc_base() + self.entry_off as usize
    }

    pub fn contains_addr(&self, addr: usize) -> bool {
        let base = self.reloc_base();
        addr >= base && addr < base + self.pages * PAGE_SIZE
    }

    fn c_str_at(&self, off: usize) -> &str {
        let limit = if off >= self.strtab_off && self.strtab_size > 0 {
            (self.strtab_off + self.strtab_size).min(self.image.len())
        } else {
            self.image.len()
        };
        let bytes = &self.image[off..limit];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        core::str::from_utf8(&bytes[..end]).unwrap_or("")
    }

    pub fn symbol_name(&self, index: u32) -> &str {
        let sym = self.sym_at(index);
        self.c_str_at(self.strtab_off + sym.st_name as usize)
    }

    pub fn sym_at(&self, index: u32) -> Elf32Sym {
        let off = self.symtab_off + index as usize * Elf32Sym::SIZE;
        unsafe { core::ptr::read_unaligned(self.image.as_ptr().add(off) as *const Elf32Sym) }
    }

    /// Hash-bucket walk over this library's exported symbols, as described
    /// for the dependency-graph traversal: accepts the first match whose
    /// `st_value` is nonzero (a real definition, not just a reference).
    pub fn hash_lookup(&self, name: &str) -> Option<Elf32Sym> {
        if self.hashtab_off == 0 && self.symtab_off == 0 {
            return None;
        }
        let nbucket = self.read_u32(self.hashtab_off) as usize;
        if nbucket == 0 {
            return None;
        }
        let bucket_off = self.hashtab_off + 8;
        let chain_off = bucket_off + nbucket * 4;

        let h = elf_hash(name.as_bytes()) as usize % nbucket;
        let mut index = self.read_u32(bucket_off + h * 4);
        while index != 0 {
            let sym = self.sym_at(index);
            if sym.st_value != 0 && self.symbol_name(index) == name {
                return Some(sym);
            }
            index = self.read_u32(chain_off + index as usize * 4);
        }
        None
    }

    pub fn non_plt_rels(&self) -> impl Iterator<Item = Elf32Rel> + '_ {
        (0..self.rel_count).map(move |i| self.rel_at(self.rel_off, i))
    }

    pub fn plt_rels(&self) -> impl Iterator<Item = Elf32Rel> + '_ {
        (0..self.pltrel_count).map(move |i| self.rel_at(self.pltrel_off, i))
    }

    fn rel_at(&self, base: usize, index: usize) -> Elf32Rel {
        let off = base + index * Elf32Rel::SIZE;
        unsafe { core::ptr::read_unaligned(self.image.as_ptr().add(off) as *const Elf32Rel) }
    }

    pub fn init_array(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.init_array_count).map(move |i| self.read_u32(self.init_array_off + i * 4))
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        unsafe { core::ptr::read_unaligned(self.image.as_ptr().add(offset) as *const u32) }
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        unsafe { core::ptr::write_unaligned(self.image.as_mut_ptr().add(offset) as *mut u32, value) };
    }
}

fn parse_dynamic(image: &[u8], vaddr: usize, memsz: usize) -> KernResult<DynamicInfo> {
    let mut info = DynamicInfo::default();
    let count = memsz / Elf32Dyn::SIZE;

    for i in 0..count {
        let off = vaddr + i * Elf32Dyn::SIZE;
        if off + Elf32Dyn::SIZE > image.len() {
            return Err(Errno::Einval);
        }
        let entry = unsafe { core::ptr::read_unaligned(image.as_ptr().add(off) as *const Elf32Dyn) };
        match entry.d_tag {
            DT_NULL => break,
            DT_NEEDED => info.needed_str_offsets.push(entry.d_val),
            DT_HASH => info.hashtab_off = entry.d_val as usize,
            DT_STRTAB => info.strtab_off = entry.d_val as usize,
            DT_SYMTAB => info.symtab_off = entry.d_val as usize,
            DT_STRSZ => info.strtab_size = entry.d_val as usize,
            DT_REL => info.rel_off = entry.d_val as usize,
            DT_RELSZ => info.rel_size = entry.d_val as usize,
            DT_RELENT => info.rel_ent = entry.d_val as usize,
            DT_JMPREL => info.pltrel_off = entry.d_val as usize,
            DT_PLTRELSZ => info.pltrel_size = entry.d_val as usize,
            DT_INIT_ARRAY => info.init_array_off = entry.d_val as usize,
            DT_INIT_ARRAYSZ => info.init_array_size = entry.d_val as usize,
            _ => {}
        }
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(phnum: u16, phoff: u32, entry: u32) -> Vec<u8> {
        let mut h = Elf32Header {
            e_ident: [0; 16],
            e_type: 3,
            e_machine: 3,
            e_version: 1,
            e_entry: entry,
            e_phoff: phoff,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: Elf32Header::SIZE as u16,
            e_phentsize: Elf32ProgramHeader::SIZE as u16,
            e_phnum: phnum,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        };
        h.e_ident[0..4].copy_from_slice(&ELF_MAGIC);
        h.e_ident[4] = ELFCLASS32;
        unsafe {
            core::slice::from_raw_parts(&h as *const _ as *const u8, Elf32Header::SIZE).to_vec()
        }
    }

    #[test]
    fn rejects_truncated_file() {
        assert!(Library::load(String::from("x"), &[0u8; 4]).is_err());
    }

    #[test]
    fn loads_a_single_load_segment_with_no_dynamic() {
        let payload = b"hello world";
        let phoff = Elf32Header::SIZE as u32;
        let mut file = header_bytes(1, phoff, 0);

        let ph = Elf32ProgramHeader {
            p_type: PT_LOAD,
            p_offset: phoff + Elf32ProgramHeader::SIZE as u32,
            p_vaddr: 0,
            p_paddr: 0,
            p_filesz: payload.len() as u32,
            p_memsz: payload.len() as u32,
            p_flags: 5,
            p_align: 4,
        };
        file.extend_from_slice(unsafe {
            core::slice::from_raw_parts(&ph as *const _ as *const u8, Elf32ProgramHeader::SIZE)
        });
        file.extend_from_slice(payload);

        let lib = Library::load(String::from("payload.so"), &file).unwrap();
        assert_eq!(lib.pages, 1);
        assert!(lib.needed.is_empty());
    }
}
