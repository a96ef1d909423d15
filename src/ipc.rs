//! IPC ports: named, rights-bearing message queues.
//!
//! Grounded on `original_source/sys/os/ipc/IPCPort.cpp` -- `Port::Init`'s
//! packed port name, the Receive-only `PushMessage`/`PeekMessage`/
//! `PopMessage` asserts, and `InitAsPortRight`'s rights-preserving,
//! name-recomposing duplication all come from there. The teacher's
//! `ipc.rs` kept a `BTreeMap`-of-id-keyed-objects-behind-a-lock shape
//! (`IPCManager`/`SharedMemoryManager`); `PortTable` keeps that shape for
//! port lookup by name.

use crate::errno::{Errno, KernResult};
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use spin::Mutex;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u8 {
        const SEND = 1 << 0;
        const RECEIVE = 1 << 1;
    }
}

/// `(pid, system_id, local_name)` packed into 64 bits so equality also
/// distinguishes receive-port origins from port-right holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortName(u64);

impl PortName {
    pub fn new(pid: u32, system_id: u16, local_name: u16) -> PortName {
        PortName((pid as u64) << 32 | (system_id as u64) << 16 | local_name as u64)
    }

    pub fn pid(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn system_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn local_name(self) -> u16 {
        self.0 as u16
    }
}

#[derive(Debug)]
pub struct Message {
    pub sender: PortName,
    pub receiver: PortName,
    pub id: u32,
    pub flags: u32,
    pub payload: Vec<u8>,
    pub transferred_right: Option<PortName>,
}

pub struct Port {
    pub name: PortName,
    pub rights: Rights,
    queue: Option<VecDeque<Message>>,
}

impl Port {
    pub fn new(pid: u32, system_id: u16, local_name: u16, rights: Rights) -> Port {
        let queue = rights.contains(Rights::RECEIVE).then(VecDeque::new);
        Port { name: PortName::new(pid, system_id, local_name), rights, queue }
    }

    /// A send-right over `origin`: same rights, but `portName` is
    /// recomposed under `holder_pid` so the receiver can authenticate who
    /// actually sent a message through it.
    pub fn as_port_right(&self, holder_pid: u16, local_name: u16) -> Port {
        Port {
            name: PortName::new(holder_pid as u32, self.name.system_id(), local_name),
            rights: self.rights,
            queue: None,
        }
    }

    pub fn push(&mut self, msg: Message) -> KernResult<()> {
        let queue = self.queue.as_mut().ok_or(Errno::Eperm)?;
        queue.push_back(msg);
        Ok(())
    }

    pub fn peek(&self) -> KernResult<Option<&Message>> {
        let queue = self.queue.as_ref().ok_or(Errno::Eperm)?;
        Ok(queue.front())
    }

    pub fn pop(&mut self) -> KernResult<Option<Message>> {
        let queue = self.queue.as_mut().ok_or(Errno::Eperm)?;
        Ok(queue.pop_front())
    }
}

/// Ports keyed by name, one table per kernel (or, in a fuller build, one
/// per task) -- the lookup structure `IPCPort.cpp` leaves to its caller.
pub struct PortTable {
    ports: BTreeMap<PortName, Port>,
}

impl PortTable {
    pub const fn new() -> Self {
        PortTable { ports: BTreeMap::new() }
    }

    pub fn insert(&mut self, port: Port) {
        self.ports.insert(port.name, port);
    }

    pub fn get(&self, name: PortName) -> Option<&Port> {
        self.ports.get(&name)
    }

    pub fn get_mut(&mut self, name: PortName) -> Option<&mut Port> {
        self.ports.get_mut(&name)
    }

    pub fn remove(&mut self, name: PortName) -> Option<Port> {
        self.ports.remove(&name)
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

static PORTS: Mutex<PortTable> = Mutex::new(PortTable::new());

pub fn with_ports<R>(f: impl FnOnce(&mut PortTable) -> R) -> R {
    f(&mut PORTS.lock())
}
