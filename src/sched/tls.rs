//! Key-based thread-local storage: a kernel-wide key allocator plus
//! per-thread key -> value storage.
//!
//! Grounded on `original_source/lib/libtest/tls.h` -- `tls_key_t`,
//! `kTLSInvalidKey`, and the `tls_allocateKey`/`tls_freeKey`/`tls_set`/
//! `tls_get` surface all come from there directly. This is a different
//! facility from `Thread::tls_area`'s raw byte region (`task.h`'s
//! `thread_getTLSArea`): that's an arena a thread indexes into by offset,
//! this is a process-wide key space where each thread holds its own value
//! per key.

use alloc::collections::BTreeSet;

pub type TlsKey = u32;

/// Mirrors `kTLSInvalidKey`.
pub const INVALID_KEY: TlsKey = u32::MAX;

/// Allocates and frees TLS keys. Keys are unique kernel-wide (not per
/// thread or per process) so a key handed out to one thread can't collide
/// with one handed to another.
pub struct TlsKeyTable {
    next: TlsKey,
    allocated: BTreeSet<TlsKey>,
}

impl TlsKeyTable {
    pub const fn new() -> Self {
        TlsKeyTable { next: 0, allocated: BTreeSet::new() }
    }

    /// Returns a fresh key, skipping `INVALID_KEY` and anything still
    /// allocated.
    pub fn allocate(&mut self) -> TlsKey {
        loop {
            let key = self.next;
            self.next = self.next.wrapping_add(1);
            if key == INVALID_KEY {
                continue;
            }
            if self.allocated.insert(key) {
                return key;
            }
        }
    }

    pub fn free(&mut self, key: TlsKey) {
        self.allocated.remove(&key);
    }

    pub fn is_allocated(&self, key: TlsKey) -> bool {
        self.allocated.contains(&key)
    }
}

impl Default for TlsKeyTable {
    fn default() -> Self {
        Self::new()
    }
}
