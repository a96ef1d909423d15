//! VFS boundary: the stat record shape and the open/close/read/write/seek/
//! mkdir/remove/move surface a filesystem implements, kept separate from
//! any actual filesystem (none ships here).
//!
//! Grounded on `original_source/sys/vfs/{vfs.h,descriptor.h}` for the
//! operation set and `Descriptor`'s name+flags+instance shape, and on the
//! teacher's `fs.rs` for the `BTreeMap`-of-open-descriptors,
//! next-fd-counter idiom this module's test double reuses.

use crate::errno::KernResult;
use alloc::string::String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Reg,
    Dir,
    Lnk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub file_type: FileType,
    pub name: String,
    pub id: u64,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// The operations any registered filesystem implements. A path is resolved
/// against the filesystem's own namespace; there is no cross-filesystem
/// mount table here, matching `vfs_open`/`vfs_stat` taking one flat path.
pub trait VfsOps {
    fn open(&mut self, path: &str) -> KernResult<u32>;
    fn close(&mut self, fd: u32) -> KernResult<()>;
    fn read(&mut self, fd: u32, buf: &mut [u8]) -> KernResult<usize>;
    fn write(&mut self, fd: u32, buf: &[u8]) -> KernResult<usize>;
    fn seek(&mut self, fd: u32, offset: i64, whence: Whence) -> KernResult<u64>;
    fn mkdir(&mut self, path: &str) -> KernResult<()>;
    fn remove(&mut self, path: &str) -> KernResult<()>;
    fn mv(&mut self, source: &str, destination: &str) -> KernResult<()>;
    fn stat(&self, path: &str) -> KernResult<Stat>;
}
