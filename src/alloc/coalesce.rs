use smallvec::SmallVec;

use crate::alloc::error::InvariantViolation;
use crate::alloc::packet::{
    Addr, BackendRequest, BackendResponse, MemCmd, PortId, RequestId, Response, Transaction,
};

/// A requestor transaction folded into a backend access, and the port it came from.
#[derive(Debug, Clone)]
pub struct Origin {
    pub port: PortId,
    pub txn: Transaction,
}

/// One backend-bound access standing in for one or more requestor transactions.
///
/// Reads to the same line share an entry and are served by a single line-sized backend read;
/// every other command occupies an entry alone and is forwarded verbatim.
#[derive(Debug, Clone)]
pub struct CoalescedRequest {
    line_addr: Addr,
    cmd: MemCmd,
    // byte range of the triggering transaction within its line
    offset: u32,
    span: u64,
    origins: SmallVec<[Origin; 4]>,
}

pub fn line_addr(addr: Addr, line_size: u32) -> Addr {
    addr & !(line_size as Addr - 1)
}

/// Reject a transaction whose bytes spill past the end of its cache line.
pub fn check_line_fit(
    port: PortId,
    txn: &Transaction,
    line_size: u32,
) -> Result<(), InvariantViolation> {
    let span = txn.end() - line_addr(txn.addr, line_size);
    if span > line_size as u64 {
        return Err(InvariantViolation::OversizedAccess {
            port,
            addr: txn.addr,
            span,
            line_size,
        });
    }
    Ok(())
}

impl CoalescedRequest {
    pub fn new(port: PortId, txn: Transaction, line_size: u32) -> Self {
        let line = line_addr(txn.addr, line_size);
        let offset = (txn.addr - line) as u32;
        Self {
            line_addr: line,
            cmd: txn.cmd,
            offset,
            span: offset as u64 + txn.size as u64,
            origins: smallvec::smallvec![Origin { port, txn }],
        }
    }

    pub fn line_addr(&self) -> Addr {
        self.line_addr
    }

    pub fn cmd(&self) -> MemCmd {
        self.cmd
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Offset plus size of the triggering transaction.
    pub fn span(&self) -> u64 {
        self.span
    }

    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.origins.iter().map(|origin| origin.port)
    }

    pub fn can_merge(&self, txn: &Transaction, line_size: u32) -> bool {
        self.cmd.is_coalescable()
            && txn.cmd == self.cmd
            && line_addr(txn.addr, line_size) == self.line_addr
    }

    /// Fold a same-cycle transaction from another port into this request.
    pub fn coalesce_in_space(&mut self, port: PortId, txn: Transaction, line_size: u32) -> bool {
        if !self.can_merge(&txn, line_size) {
            return false;
        }
        self.origins.push(Origin { port, txn });
        true
    }

    /// Absorb a newer request into this in-flight one. Hands `other` back if the two cannot share
    /// a backend access.
    pub fn coalesce_in_time(&mut self, other: CoalescedRequest) -> Result<usize, CoalescedRequest> {
        if !self.cmd.is_coalescable() || other.cmd != self.cmd || other.line_addr != self.line_addr
        {
            return Err(other);
        }
        let folded = other.origins.len();
        self.origins.extend(other.origins);
        Ok(folded)
    }

    pub fn make_backend_request(&self, id: RequestId, line_size: u32) -> BackendRequest {
        let head = &self.origins[0];
        if self.cmd.is_coalescable() {
            return BackendRequest {
                id,
                origin: head.port,
                cmd: self.cmd,
                addr: self.line_addr,
                size: line_size,
                data: Vec::new(),
            };
        }
        debug_assert_eq!(1, self.origins.len(), "{:?} cannot be coalesced", self.cmd);
        BackendRequest {
            id,
            origin: head.port,
            cmd: self.cmd,
            addr: head.txn.addr,
            size: head.txn.size,
            data: head.txn.data.clone(),
        }
    }

    /// Split a backend response into one completion per origin.
    pub fn fan_out(
        self,
        response: BackendResponse,
    ) -> Result<SmallVec<[(PortId, Response); 4]>, InvariantViolation> {
        if !self.cmd.is_coalescable() {
            return Ok(self
                .origins
                .into_iter()
                .map(|origin| {
                    let completion = Response {
                        tag: origin.txn.tag,
                        cmd: origin.txn.cmd,
                        addr: origin.txn.addr,
                        data: response.data.clone(),
                        success: response.success,
                    };
                    (origin.port, completion)
                })
                .collect());
        }

        let line_addr = self.line_addr;
        self.origins
            .into_iter()
            .map(|origin| {
                let start = (origin.txn.addr - line_addr) as usize;
                let end = start + origin.txn.size as usize;
                let data = response.data.get(start..end).ok_or(
                    InvariantViolation::TruncatedResponse {
                        id: response.id,
                        len: response.data.len(),
                        needed: end,
                    },
                )?;
                let completion = Response {
                    tag: origin.txn.tag,
                    cmd: origin.txn.cmd,
                    addr: origin.txn.addr,
                    data: data.to_vec(),
                    success: true,
                };
                Ok((origin.port, completion))
            })
            .collect()
    }
}
