//! A process: its page directory, its thread list, and its file table.
//!
//! Grounded on `original_source/sys/os/scheduler/task.h`'s `Task` --
//! `GetDirectory`, `GetPid`, and the `_files[CONFIG_MAX_FILES]` fixed-size
//! descriptor table all come from there. `ProcessManager`'s `Vec`-of-structs
//! + id-lookup shape in the teacher's `process.rs` is kept; only the field
//! set changes to match what a `Task` actually carries.

use crate::errno::{Errno, KernResult};
use crate::vmem::PageDirectory;
use alloc::vec::Vec;

pub type Pid = u32;

pub const MAX_FILES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Waiting,
    Running,
    Blocked,
    Died,
}

pub struct Process {
    pub pid: Pid,
    pub directory: PageDirectory,
    pub state: ProcessState,
    pub ring3: bool,
    pub threads: Vec<u32>,
    file_table: [Option<u32>; MAX_FILES],
}

impl Process {
    pub fn new(pid: Pid, directory: PageDirectory, ring3: bool) -> Self {
        Process {
            pid,
            directory,
            state: ProcessState::Waiting,
            ring3,
            threads: Vec::new(),
            file_table: [None; MAX_FILES],
        }
    }

    pub fn fork_directory(&self) -> PageDirectory {
        // A full copy, not copy-on-write -- see PageDirectory::fork_from.
        PageDirectory::fork_from(&self.directory)
    }

    pub fn clone_file_table(&self) -> [Option<u32>; MAX_FILES] {
        self.file_table
    }

    pub fn set_file_table(&mut self, table: [Option<u32>; MAX_FILES]) {
        self.file_table = table;
    }

    pub fn allocate_fd(&mut self, handle: u32) -> KernResult<usize> {
        for (fd, slot) in self.file_table.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(handle);
                return Ok(fd);
            }
        }
        Err(Errno::Enomem)
    }

    pub fn free_fd(&mut self, fd: usize) {
        if let Some(slot) = self.file_table.get_mut(fd) {
            *slot = None;
        }
    }

    pub fn file_for_fd(&self, fd: usize) -> Option<u32> {
        self.file_table.get(fd).copied().flatten()
    }
}
