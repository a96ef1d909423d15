//! Process-wide channel -> waiter-list dictionary.
//!
//! Ported from `original_source/sys/os/waitqueue.cpp`: a dictionary keyed by
//! an opaque channel pointer, guarded by a single global lock, with
//! `Wakeup` draining the entry under the lock and unblocking its threads
//! outside it. The channel key here is `usize` rather than a raw pointer --
//! the scheduler uses a `Tid` (cast to `usize`) as the channel for
//! `thread_join`, and a caller-supplied address for everything else.

use crate::sched::thread::Tid;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

pub struct Waitqueue {
    entries: Mutex<BTreeMap<usize, Vec<Tid>>>,
}

impl Waitqueue {
    pub const fn new() -> Self {
        Waitqueue { entries: Mutex::new(BTreeMap::new()) }
    }

    /// Appends `tid` to `channel`'s waiter list. The caller blocks the
    /// thread itself; this only does the bookkeeping.
    pub fn add_waiter(&self, channel: usize, tid: Tid) {
        self.entries.lock().entry(channel).or_default().push(tid);
    }

    /// Atomically removes and returns every thread waiting on `channel`.
    pub fn drain(&self, channel: usize) -> Vec<Tid> {
        self.entries.lock().remove(&channel).unwrap_or_default()
    }
}

impl Default for Waitqueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_removes_the_entry_entirely() {
        let wq = Waitqueue::new();
        wq.add_waiter(0x1000, 1);
        wq.add_waiter(0x1000, 2);
        assert_eq!(wq.drain(0x1000), alloc::vec![1, 2]);
        assert!(wq.drain(0x1000).is_empty());
    }

    #[test]
    fn channels_are_independent() {
        let wq = Waitqueue::new();
        wq.add_waiter(1, 10);
        wq.add_waiter(2, 20);
        assert_eq!(wq.drain(1), alloc::vec![10]);
        assert_eq!(wq.drain(2), alloc::vec![20]);
    }
}
