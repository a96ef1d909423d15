//! Relocation application: two passes, non-PLT then PLT, matching
//! `original_source/bin/linkd/reloc.c`'s `library_relocateNonPLT` and
//! `library_relocatePLT` almost line for line -- the arithmetic here is
//! exactly what that file does, just against `Library`'s buffer-backed
//! image instead of raw process memory.

use super::elf::*;
use super::library::Library;
use super::registry::Registry;

/// Applies every non-PLT relocation in `library`. Returns `false` (and
/// leaves the culprit relocation applied-so-far state alone) the first time
/// a referenced symbol can't be resolved anywhere in the dependency graph.
pub fn relocate_non_plt(library: &mut Library, registry: &Registry) -> bool {
    let rels: alloc::vec::Vec<Elf32Rel> = library.non_plt_rels().collect();

    for rel in rels {
        let kind = rel.kind();
        let symnum = rel.sym();
        let offset = rel.r_offset as usize;

        match kind {
            R_386_NONE => {}

            R_386_32 | R_386_GLOB_DAT => {
                let Some((symbol, container_base)) = registry.resolve_symbol(library, symnum) else {
                    return false;
                };
                let target = container_base.wrapping_add(symbol.st_value as usize) as u32;
                let addend = library.read_u32(offset);
                library.write_u32(offset, target.wrapping_add(addend));
            }

            R_386_PC32 => {
                let Some((symbol, container_base)) = registry.resolve_symbol(library, symnum) else {
                    return false;
                };
                let target = container_base.wrapping_add(symbol.st_value as usize) as u32;
                let site = library.reloc_base().wrapping_add(offset) as u32;
                let addend = library.read_u32(offset);
                library.write_u32(offset, addend.wrapping_add(target.wrapping_sub(site)));
            }

            R_386_RELATIVE => {
                let addend = library.read_u32(offset);
                let base = library.reloc_base() as u32;
                library.write_u32(offset, addend.wrapping_add(base));
            }

            _ => {}
        }
    }

    true
}

/// Applies every `R_386_JMP_SLOT` relocation. No lazy binding: every PLT
/// slot is resolved and written immediately.
pub fn relocate_plt(library: &mut Library, registry: &Registry) -> bool {
    let rels: alloc::vec::Vec<Elf32Rel> = library.plt_rels().collect();

    for rel in rels {
        debug_assert_eq!(rel.kind(), R_386_JMP_SLOT);
        let symnum = rel.sym();
        let offset = rel.r_offset as usize;

        let Some((symbol, container_base)) = registry.resolve_symbol(library, symnum) else {
            return false;
        };
        let target = container_base.wrapping_add(symbol.st_value as usize) as u32;
        library.write_u32(offset, target);
    }

    true
}
