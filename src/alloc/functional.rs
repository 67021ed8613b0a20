use log::debug;

use crate::alloc::coalesce::check_line_fit;
use crate::alloc::error::AllocError;
use crate::alloc::packet::{BackendRequest, PortId, RequestId, Response, Snoop, Transaction};
use crate::base::port::{Backend, Requestor};
use crate::timeq::Cycle;

use super::Allocator;

/// Id carried by functional accesses; never allocated to a timed request.
pub const FUNCTIONAL_REQUEST_ID: RequestId = RequestId::MAX;

impl Allocator {
    /// Perform `txn` immediately, bypassing admission queues, arbitration and coalescing. Used for
    /// loaders and debug accesses. Exclusive accesses still invalidate the other lanes.
    pub fn access_functional<R: Requestor, B: Backend>(
        &mut self,
        now: Cycle,
        port: PortId,
        txn: Transaction,
        requestors: &mut [R],
        backend: &mut B,
    ) -> Result<Response, AllocError> {
        assert!(port < self.ports.len(), "functional access on unknown port {}", port);
        check_line_fit(port, &txn, self.config.line_size)?;
        debug!(
            "port {}: functional {:?} @ {:#x} ({} bytes)",
            port, txn.cmd, txn.addr, txn.size
        );

        if let Some(kind) = txn.cmd.snoop_kind() {
            let snoop = Snoop {
                addr: txn.addr,
                size: txn.size,
                kind,
                from: port,
            };
            self.broadcast_snoop(requestors, snoop);
        }

        let request = BackendRequest {
            id: FUNCTIONAL_REQUEST_ID,
            origin: port,
            cmd: txn.cmd,
            addr: txn.addr,
            size: txn.size,
            data: txn.data,
        };
        let response = backend.access_functional(&request);
        self.stats.record_functional();
        self.last_active = now;

        Ok(Response {
            tag: txn.tag,
            cmd: txn.cmd,
            addr: txn.addr,
            data: response.data,
            success: response.success,
        })
    }
}
