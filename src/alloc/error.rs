use thiserror::Error;

use crate::alloc::packet::{Addr, PortId, RequestId};
use crate::timeq::Cycle;

/// Conditions that mean the simulated system is wired wrong or the allocator itself is broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("port {port}: access @ {addr:#x} spans {span} bytes, beyond the {line_size} byte line")]
    OversizedAccess {
        port: PortId,
        addr: Addr,
        span: u64,
        line_size: u32,
    },
    #[error("request id {id} is already outstanding")]
    DuplicateRequestId { id: RequestId },
    #[error("backend response {id} matches no outstanding request")]
    UnknownResponse { id: RequestId },
    #[error("backend response {id} carries {len} bytes, {needed} needed")]
    TruncatedResponse {
        id: RequestId,
        len: usize,
        needed: usize,
    },
    #[error("port {port} refused completion for {addr:#x}")]
    DeliveryRefused { port: PortId, addr: Addr },
    #[error("load-locked on {addr:#x} by port {port} while port {owner} holds the lock")]
    LockOwnerMismatch {
        addr: Addr,
        owner: PortId,
        port: PortId,
    },
}

/// The allocator is consistent but stuck.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LivenessFailure {
    #[error("port {port}: request @ {addr:#x} has not issued for {waited} cycles")]
    PortStalled {
        port: PortId,
        addr: Addr,
        waited: Cycle,
    },
    #[error("allocator idle since cycle {last_active} (now {now})")]
    GlobalIdle { last_active: Cycle, now: Cycle },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("no forward progress: {0}")]
    Liveness(#[from] LivenessFailure),
}

impl AllocError {
    pub fn is_liveness(&self) -> bool {
        matches!(self, AllocError::Liveness(_))
    }
}
