//! Errno-compatible error codes returned across the syscall boundary.
//!
//! Internal invariant violations (a broken heap, a missing mandatory
//! relocation symbol) panic rather than flow through here -- `Errno` is
//! only for conditions a caller can legitimately hit and recover from.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// Bad argument, bad file descriptor, or operation on a dead process.
    Einval,
    /// Page allocator failed, or a zone/kernel virtual range is exhausted.
    Enomem,
    /// VFS path does not exist.
    Enoent,
    /// Missing IPC right (e.g. popping from a send-only port).
    Eperm,
    /// `mkdir` on an existing path.
    Eexist,
}

impl Errno {
    pub const fn as_i32(self) -> i32 {
        match self {
            Errno::Einval => 22,
            Errno::Enomem => 12,
            Errno::Enoent => 2,
            Errno::Eperm => 1,
            Errno::Eexist => 17,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Errno::Einval => "EINVAL",
            Errno::Enomem => "ENOMEM",
            Errno::Enoent => "ENOENT",
            Errno::Eperm => "EPERM",
            Errno::Eexist => "EEXIST",
        };
        f.write_str(s)
    }
}

pub type KernResult<T> = Result<T, Errno>;
