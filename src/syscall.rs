//! Syscall dispatch: a fixed-size handler table indexed by syscall number,
//! and the result/errno marshalling a trap handler performs once a handler
//! returns.
//!
//! Grounded on `original_source/sys/syscall/syscall.{h,c}` -- the
//! `_SYS_MAXCALLS`-sized table, `sc_setSyscallHandler`'s bounds-checked
//! registration, and `_sc_execute`'s exact marshalling (`eax` gets the
//! handler's return value, `ecx` only changes when `errno != 0`, an
//! unregistered number leaves both alone) all come from there. There is no
//! real `int 0x80` trap or user stack to map on the host, so `dispatch`
//! takes the already-decoded argument words a trap handler would have read
//! from `uesp` instead of a raw stack pointer.

use crate::errno::Errno;
use crate::sched::{Scheduler, Tid};

pub const MAX_SYSCALLS: usize = 128;

pub const SYS_PRINT: usize = 0;
pub const SYS_PRINTCOLOR: usize = 1;
pub const SYS_EXIT: usize = 2;
pub const SYS_YIELD: usize = 3;
pub const SYS_THREADATTACH: usize = 4;
pub const SYS_THREADEXIT: usize = 5;
pub const SYS_THREADJOIN: usize = 6;
pub const SYS_PROCESSCREATE: usize = 7;
pub const SYS_PROCESSKILL: usize = 8;
pub const SYS_MMAP: usize = 9;
pub const SYS_MUNMAP: usize = 10;
pub const SYS_MPROTECT: usize = 11;
pub const SYS_FORK: usize = 12;
pub const SYS_ERRNO: usize = 13;
pub const SYS_TLS_ALLOCATE: usize = 14;
pub const SYS_TLS_FREE: usize = 15;
pub const SYS_TLS_SET: usize = 16;
pub const SYS_TLS_GET: usize = 17;
pub const SYS_SLEEP: usize = 18;

/// Decoded syscall arguments, standing in for the words a trap handler
/// would read off the user stack past the return address and syscall
/// number slots.
pub type Args = [u32; 4];

pub type Handler = fn(&mut Scheduler, Tid, &Args) -> Result<u32, Errno>;

pub struct SyscallTable {
    handlers: [Option<Handler>; MAX_SYSCALLS],
}

impl SyscallTable {
    pub const fn new() -> Self {
        SyscallTable { handlers: [None; MAX_SYSCALLS] }
    }

    /// Mirrors `sc_setSyscallHandler`'s bounds assert: out-of-range numbers
    /// are silently ignored rather than panicking, since the table size is
    /// a kernel-wide constant and callers pass in the named constants above.
    pub fn register(&mut self, syscall: usize, handler: Handler) {
        if let Some(slot) = self.handlers.get_mut(syscall) {
            *slot = Some(handler);
        }
    }

    pub fn is_registered(&self, syscall: usize) -> bool {
        self.handlers.get(syscall).is_some_and(Option::is_some)
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The register pair a trap return restores: `eax` the result, `ecx` the
/// errno (only ever meaningful when it's nonzero, exactly as the original
/// only overwrites `state->ecx` on a nonzero errno).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapResult {
    pub eax: u32,
    pub ecx: u32,
}

/// Looks up `syscall` in `table` and invokes it. An unregistered number
/// returns `None`, signalling "leave eax/ecx untouched" the way
/// `_sc_execute` returns `esp` unchanged without writing `state->eax`.
pub fn dispatch(
    table: &SyscallTable,
    scheduler: &mut Scheduler,
    tid: Tid,
    syscall: usize,
    args: &Args,
) -> Option<TrapResult> {
    let handler = (*table.handlers.get(syscall)?)?;
    match handler(scheduler, tid, args) {
        Ok(value) => Some(TrapResult { eax: value, ecx: 0 }),
        Err(errno) => Some(TrapResult { eax: u32::MAX, ecx: errno.as_i32() as u32 }),
    }
}

/// Builds the table `sc_init` would, wiring the syscalls the scheduler and
/// IPC layers can serve without touching hardware-specific mmap handling.
pub fn default_table() -> SyscallTable {
    let mut table = SyscallTable::new();
    table.register(SYS_YIELD, handle_yield);
    table.register(SYS_THREADEXIT, handle_thread_exit);
    table.register(SYS_THREADJOIN, handle_thread_join);
    table.register(SYS_FORK, handle_fork);
    table.register(SYS_SLEEP, handle_sleep);
    table.register(SYS_TLS_ALLOCATE, handle_tls_allocate);
    table.register(SYS_TLS_FREE, handle_tls_free);
    table.register(SYS_TLS_SET, handle_tls_set);
    table.register(SYS_TLS_GET, handle_tls_get);
    table
}

fn handle_yield(scheduler: &mut Scheduler, tid: Tid, _args: &Args) -> Result<u32, Errno> {
    scheduler.thread_sleep(tid, 0);
    Ok(0)
}

fn handle_thread_exit(scheduler: &mut Scheduler, tid: Tid, _args: &Args) -> Result<u32, Errno> {
    scheduler.thread_exit(tid);
    Ok(0)
}

fn handle_thread_join(scheduler: &mut Scheduler, tid: Tid, args: &Args) -> Result<u32, Errno> {
    let target = args[0];
    scheduler.thread_join(tid, target)?;
    Ok(0)
}

fn handle_fork(scheduler: &mut Scheduler, _tid: Tid, _args: &Args) -> Result<u32, Errno> {
    scheduler.fork()
}

fn handle_sleep(scheduler: &mut Scheduler, tid: Tid, args: &Args) -> Result<u32, Errno> {
    scheduler.thread_sleep(tid, args[0] as u64);
    Ok(0)
}

fn handle_tls_allocate(scheduler: &mut Scheduler, _tid: Tid, _args: &Args) -> Result<u32, Errno> {
    Ok(scheduler.tls_allocate())
}

fn handle_tls_free(scheduler: &mut Scheduler, _tid: Tid, args: &Args) -> Result<u32, Errno> {
    scheduler.tls_free(args[0]);
    Ok(0)
}

fn handle_tls_set(scheduler: &mut Scheduler, tid: Tid, args: &Args) -> Result<u32, Errno> {
    scheduler.tls_set(tid, args[0], args[1] as usize)?;
    Ok(0)
}

fn handle_tls_get(scheduler: &mut Scheduler, tid: Tid, args: &Args) -> Result<u32, Errno> {
    scheduler.tls_get(tid, args[0]).map(|value| value as u32)
}
