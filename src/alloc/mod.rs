use std::collections::BTreeMap;

use log::debug;

use crate::base::port::{Backend, Requestor};
use crate::timeq::Cycle;

pub mod arbiter;
pub mod backend_port;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod lock_table;
pub mod packet;
pub mod requestor_port;
pub mod stats;

mod completions;
mod functional;
mod issue;
mod watchdog;


pub use arbiter::RoundRobinArbiter;
pub use backend_port::BackendPort;
pub use coalesce::CoalescedRequest;
pub use config::AllocatorConfig;
pub use error::{AllocError, InvariantViolation, LivenessFailure};
pub use functional::FUNCTIONAL_REQUEST_ID;
pub use lock_table::{AddressLockTable, LockCheck};
pub use packet::*;
pub use requestor_port::RequestorPort;
pub use stats::AllocatorStats;

/// Arbitrates N requestor ports onto one backend, coalescing same-line reads and enforcing LL/SC
/// locks.
///
/// Each cycle the simulation top calls `tick`, which drains ready backend responses before
/// issuing new requests, so a queue slot or busy flag freed by a response is usable in the same
/// cycle. Requestors and the backend are lent in on every call rather than owned.
#[derive(Debug)]
pub struct Allocator {
    config: AllocatorConfig,
    ports: Vec<RequestorPort>,
    backend_port: BackendPort,
    arbiter: RoundRobinArbiter,
    // ordered so time-coalescing always picks the oldest candidate
    outstanding: BTreeMap<RequestId, CoalescedRequest>,
    locks: AddressLockTable,
    next_id: RequestId,
    last_active: Cycle,
    next_progress_check: Cycle,
    stats: AllocatorStats,
}

impl Allocator {
    pub fn new(config: AllocatorConfig) -> Self {
        config.ensure_valid();
        let ports = (0..config.num_ports)
            .map(|port| RequestorPort::new(port, config.port_latency(port)))
            .collect();
        Self {
            ports,
            backend_port: BackendPort::new(config.response_latency),
            arbiter: RoundRobinArbiter::new(config.num_ports),
            outstanding: BTreeMap::new(),
            locks: AddressLockTable::new(config.lock_timeout),
            next_id: 0,
            last_active: 0,
            next_progress_check: config.progress_check_period,
            stats: AllocatorStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn stats(&self) -> &AllocatorStats {
        &self.stats
    }

    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    pub fn port(&self, port: PortId) -> &RequestorPort {
        &self.ports[port]
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn outstanding(&self, id: RequestId) -> Option<&CoalescedRequest> {
        self.outstanding.get(&id)
    }

    pub fn lock_holder(&self, addr: Addr) -> Option<PortId> {
        self.locks.holder(addr)
    }

    pub fn backend_busy(&self) -> bool {
        self.backend_port.is_busy()
    }

    pub fn last_active(&self) -> Cycle {
        self.last_active
    }

    /// Nothing queued, nothing in flight and no response waiting to drain.
    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty()
            && self.backend_port.pending_responses() == 0
            && self.ports.iter().all(RequestorPort::is_empty)
    }

    /// Upstream entry point. A false return obliges the allocator to call `notify_retry` on that
    /// requestor exactly once after a slot frees.
    pub fn submit(&mut self, now: Cycle, port: PortId, txn: Transaction) -> bool {
        assert!(port < self.ports.len(), "submit on unknown port {}", port);
        debug!(
            "port {}: receiving {:?} @ {:#x} ({} bytes, tag {})",
            port, txn.cmd, txn.addr, txn.size, txn.tag
        );
        if self.ports[port].push(now, txn) {
            self.stats.record_accept();
            true
        } else {
            self.stats.record_requestor_reject();
            false
        }
    }

    /// Downstream delivery of a completed backend access.
    pub fn recv_response(&mut self, now: Cycle, response: BackendResponse) -> bool {
        debug!("receiving response {} ({} bytes)", response.id, response.data.len());
        let accepted = self.backend_port.recv_response(now, response);
        if !accepted {
            self.stats.record_response_reject();
        }
        accepted
    }

    /// The backend can take requests again after refusing one.
    pub fn on_backend_retry(&mut self) {
        debug!("backend retry, unblocking issue");
        self.backend_port.on_retry();
    }

    pub fn tick<R: Requestor, B: Backend>(
        &mut self,
        now: Cycle,
        requestors: &mut [R],
        backend: &mut B,
    ) -> Result<(), AllocError> {
        assert_eq!(
            requestors.len(),
            self.ports.len(),
            "one requestor per port expected"
        );
        self.handle_responses(now, requestors, backend)?;
        self.handle_requests(now, requestors, backend)?;
        self.check_forward_progress(now)?;
        Ok(())
    }

    fn broadcast_snoop<R: Requestor>(&mut self, requestors: &mut [R], snoop: Snoop) {
        for (port, requestor) in requestors.iter_mut().enumerate() {
            if port == snoop.from {
                continue;
            }
            debug!("port {} is snooping port {} ({:?})", snoop.from, port, snoop.kind);
            requestor.receive_snoop(&snoop);
        }
        self.stats.record_snoops(requestors.len().saturating_sub(1));
    }
}
