//! ELF runtime linker: loads position-independent shared objects into an
//! address space, resolves symbols across a dependency graph, and applies
//! relocations. Grounded throughout on `original_source/sys/ioglue/iostore.c`
//! and the companion `original_source/bin/linkd/reloc.c`.
//!
//! This module owns one global [`Registry`] behind a lock, mirroring the
//! single kernel-wide library store the source keeps; callers never see
//! raw file bytes, only names and addresses.

pub mod elf;
pub mod kernel_stub;
pub mod library;
pub mod reloc;
pub mod registry;

pub use library::Library;
pub use registry::Registry;

use crate::errno::{Errno, KernResult};
use alloc::collections::BTreeSet;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use spin::Mutex;

static STORE: Mutex<Registry> = Mutex::new(Registry::new());

/// Supplies the bytes of a named module on demand, so dependency
/// resolution (`DT_NEEDED`) can fetch and recursively load libraries
/// without this module knowing how modules are actually stored.
pub trait ModuleSource {
    fn fetch(&self, name: &str) -> Option<Vec<u8>>;
}

/// Loads `bytes` as a library named `name`, resolving and loading every
/// `DT_NEEDED` dependency through `source` first, then relocating and
/// running init functions. Re-loading an already-registered name is a
/// no-op success.
pub fn load(name: &str, bytes: &[u8], source: &dyn ModuleSource) -> KernResult<()> {
    let mut store = STORE.lock();
    let mut visiting = BTreeSet::new();
    load_recursive(&mut store, name, bytes, source, &mut visiting)
}

fn load_recursive(
    store: &mut Registry,
    name: &str,
    bytes: &[u8],
    source: &dyn ModuleSource,
    visiting: &mut BTreeSet<String>,
) -> KernResult<()> {
    if store.by_name(name).is_some() {
        return Ok(());
    }
    if !visiting.insert(name.to_string()) {
        // Already in progress somewhere up the recursion: a dependency
        // cycle. Leave it for whichever frame loads it first.
        return Ok(());
    }

    let mut library = Library::load(name.to_string(), bytes)?;

    let needed = library.needed.clone();
    for dep_name in &needed {
        if store.by_name(dep_name).is_some() {
            continue;
        }
        let Some(dep_bytes) = source.fetch(dep_name) else {
            continue;
        };
        load_recursive(store, dep_name, &dep_bytes, source, visiting)?;
    }

    if !reloc::relocate_non_plt(&mut library, store) {
        return Err(Errno::Einval);
    }
    if !reloc::relocate_plt(&mut library, store) {
        return Err(Errno::Einval);
    }

    call_init_functions(&library);
    store.add(library);
    Ok(())
}

/// Iterates `init_array`, skipping null and the `UINT32_MAX` sentinel, and
/// returns how many entries were actually invoked. Real invocation (arch
/// code transmuting the value to a niladic function pointer) only happens
/// outside host tests, since a host-test-built init array never contains
/// addresses that are safe to call.
pub fn call_init_functions(library: &Library) -> usize {
    let mut called = 0;
    for entry in library.init_array() {
        if entry == 0 || entry == elf::INIT_ARRAY_SKIP {
            continue;
        }
        called += 1;
        #[cfg(not(test))]
        unsafe {
            let f: extern "C" fn() = core::mem::transmute(entry as usize);
            f();
        }
    }
    called
}

pub fn remove(name: &str) {
    STORE.lock().remove(name);
}

pub fn with_library_by_name<R>(name: &str, f: impl FnOnce(&Library) -> R) -> Option<R> {
    STORE.lock().by_name(name).map(f)
}

pub fn with_library_by_address<R>(addr: usize, f: impl FnOnce(&Library) -> R) -> Option<R> {
    STORE.lock().by_address(addr).map(f)
}

/// Non-blocking address lookup for contexts (a page-fault handler) that
/// must not block on the store's lock: returns `None` if the store is
/// currently held rather than spinning.
pub fn library_with_address_nonblocking(addr: usize) -> Option<String> {
    let guard = STORE.try_lock()?;
    guard.by_address(addr).map(|lib| lib.name.clone())
}

pub fn find_symbol(library: &Library, name: &str) -> Option<usize> {
    library.hash_lookup(name).map(|sym| library.reloc_base() + sym.st_value as usize)
}
