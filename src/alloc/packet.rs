use serde::{Deserialize, Serialize};

use crate::timeq::Cycle;

pub type Addr = u64;
pub type PortId = usize;
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemCmd {
    Read,
    Write,
    LoadLocked,
    StoreCond,
    Swap,
}

impl MemCmd {
    /// Only plain reads may share a backend access with other transactions.
    pub fn is_coalescable(self) -> bool {
        matches!(self, MemCmd::Read)
    }

    /// Accesses that take a line exclusive and invalidate other lanes' copies.
    pub fn is_exclusive(self) -> bool {
        matches!(self, MemCmd::Write | MemCmd::StoreCond | MemCmd::Swap)
    }

    pub fn is_llsc(self) -> bool {
        matches!(self, MemCmd::LoadLocked | MemCmd::StoreCond)
    }

    /// Commands whose response carries data back to the requestor.
    pub fn returns_data(self) -> bool {
        matches!(self, MemCmd::Read | MemCmd::LoadLocked | MemCmd::Swap)
    }

    pub fn snoop_kind(self) -> Option<SnoopKind> {
        match self {
            MemCmd::StoreCond => Some(SnoopKind::ScUpgrade),
            MemCmd::Write | MemCmd::Swap => Some(SnoopKind::Upgrade),
            MemCmd::Read | MemCmd::LoadLocked => None,
        }
    }
}

/// A memory transaction as submitted by a requestor. The allocator never modifies one; it either
/// folds it into a line-sized backend read or forwards its fields verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub tag: u64,
    pub cmd: MemCmd,
    pub addr: Addr,
    pub size: u32,
    pub data: Vec<u8>,
    pub issued_at: Cycle,
}

impl Transaction {
    pub fn read(tag: u64, addr: Addr, size: u32) -> Self {
        Self {
            tag,
            cmd: MemCmd::Read,
            addr,
            size,
            data: Vec::new(),
            issued_at: 0,
        }
    }

    pub fn load_locked(tag: u64, addr: Addr, size: u32) -> Self {
        Self {
            cmd: MemCmd::LoadLocked,
            ..Self::read(tag, addr, size)
        }
    }

    pub fn write(tag: u64, addr: Addr, data: Vec<u8>) -> Self {
        Self {
            tag,
            cmd: MemCmd::Write,
            addr,
            size: data.len() as u32,
            data,
            issued_at: 0,
        }
    }

    pub fn store_cond(tag: u64, addr: Addr, data: Vec<u8>) -> Self {
        Self {
            cmd: MemCmd::StoreCond,
            ..Self::write(tag, addr, data)
        }
    }

    pub fn swap(tag: u64, addr: Addr, data: Vec<u8>) -> Self {
        Self {
            cmd: MemCmd::Swap,
            ..Self::write(tag, addr, data)
        }
    }

    pub fn at(mut self, issued_at: Cycle) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn end(&self) -> Addr {
        self.addr.saturating_add(self.size as Addr)
    }
}

/// Completion handed back to the requestor that issued `tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub tag: u64,
    pub cmd: MemCmd,
    pub addr: Addr,
    pub data: Vec<u8>,
    /// Store-conditional outcome; always true for other commands.
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub id: RequestId,
    pub origin: PortId,
    pub cmd: MemCmd,
    pub addr: Addr,
    pub size: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub id: RequestId,
    pub data: Vec<u8>,
    pub success: bool,
}

impl BackendResponse {
    pub fn new(id: RequestId, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            success: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnoopKind {
    Upgrade,
    ScUpgrade,
}

/// Invalidation broadcast to every lane except the one that issued the exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snoop {
    pub addr: Addr,
    pub size: u32,
    pub kind: SnoopKind,
    pub from: PortId,
}
