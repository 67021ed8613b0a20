use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::alloc::packet::{Addr, BackendRequest, BackendResponse, MemCmd, PortId};
use crate::alloc::Allocator;
use crate::base::mem::HasMemory;
use crate::base::port::Backend;
use crate::sim::config::Config;
use crate::sim::flat_mem::FlatMemory;
use crate::timeq::{Cycle, QueueConfig, TimedQueue};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConfig {
    /// Cycles from accepting a request to offering its response
    pub latency: Cycle,
    /// Accesses in flight before the backend starts refusing
    pub capacity: usize,
    pub memory_bytes: usize,
    /// Granularity of load-locked reservations
    pub reservation_bytes: u64,
}

impl Config for BackendConfig {}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            latency: 8,
            capacity: 8,
            memory_bytes: 1 << 20,
            reservation_bytes: 64,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BackendStats {
    pub accepted: u64,
    pub refused: u64,
    pub responses: u64,
    pub responses_refused: u64,
    pub sc_failures: u64,
}

/// Fixed-latency memory behind the allocator.
///
/// An access is performed against the backing store when accepted and its response is held for
/// `latency` cycles. Load-locked sets a reservation for the issuing port; a store-conditional
/// succeeds only while that reservation is intact, and any store to the granule clears it.
#[derive(Debug)]
pub struct LatencyBackend {
    config: BackendConfig,
    mem: FlatMemory,
    inflight: TimedQueue<BackendResponse>,
    reservations: BTreeMap<Addr, PortId>,
    owe_retry: bool,
    response_blocked: bool,
    fault: Option<anyhow::Error>,
    stats: BackendStats,
}

impl LatencyBackend {
    pub fn new(config: BackendConfig) -> Self {
        assert!(config.capacity > 0, "backend capacity must be non-zero");
        assert!(
            config.reservation_bytes.is_power_of_two(),
            "reservation granule must be a power of two"
        );
        Self {
            mem: FlatMemory::new_with_size(config.memory_bytes),
            inflight: TimedQueue::new(QueueConfig {
                latency: config.latency,
                capacity: config.capacity,
            }),
            reservations: BTreeMap::new(),
            owe_retry: false,
            response_blocked: false,
            fault: None,
            stats: BackendStats::default(),
            config,
        }
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    pub fn mem(&self) -> &FlatMemory {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut FlatMemory {
        &mut self.mem
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn reservation(&self, addr: Addr) -> Option<PortId> {
        self.reservations.get(&self.granule(addr)).copied()
    }

    /// First out-of-range or otherwise failed access, if any.
    pub fn take_fault(&mut self) -> Option<anyhow::Error> {
        self.fault.take()
    }

    /// Offer ready responses to the allocator, then grant a retry if a refused request can now
    /// be taken.
    pub fn tick(&mut self, now: Cycle, alloc: &mut Allocator) {
        while !self.response_blocked {
            let Some(response) = self.inflight.peek_ready(now).cloned() else {
                break;
            };
            let id = response.id;
            if alloc.recv_response(now, response) {
                self.inflight.pop_ready(now);
                self.stats.responses += 1;
            } else {
                debug!("allocator refused response {}, waiting for retry", id);
                self.stats.responses_refused += 1;
                self.response_blocked = true;
            }
        }

        if self.owe_retry && !self.inflight.is_full() {
            self.owe_retry = false;
            alloc.on_backend_retry();
        }
    }

    fn granule(&self, addr: Addr) -> Addr {
        addr & !(self.config.reservation_bytes - 1)
    }

    fn clear_reservations(&mut self, addr: Addr, size: u32) {
        let first = self.granule(addr);
        let last = self.granule(addr.saturating_add(size.max(1) as Addr - 1));
        let cleared: Vec<Addr> = self.reservations.range(first..=last).map(|(&a, _)| a).collect();
        for granule in cleared {
            self.reservations.remove(&granule);
        }
    }

    fn perform(&mut self, request: &BackendRequest) -> anyhow::Result<BackendResponse> {
        let size = request.size as usize;
        let mut response = BackendResponse::new(request.id, Vec::new());
        match request.cmd {
            MemCmd::Read => {
                response.data = self.mem.read(request.addr, size)?.to_vec();
            }
            MemCmd::LoadLocked => {
                response.data = self.mem.read(request.addr, size)?.to_vec();
                let granule = self.granule(request.addr);
                self.reservations.insert(granule, request.origin);
            }
            MemCmd::Write => {
                self.mem.write(request.addr, &request.data)?;
                self.clear_reservations(request.addr, request.size);
            }
            MemCmd::Swap => {
                response.data = self.mem.swap(request.addr, &request.data)?;
                self.clear_reservations(request.addr, request.size);
            }
            MemCmd::StoreCond => {
                let held = self.reservation(request.addr) == Some(request.origin);
                if held {
                    self.mem.write(request.addr, &request.data)?;
                } else {
                    self.stats.sc_failures += 1;
                }
                self.clear_reservations(request.addr, request.size);
                response.success = held;
            }
        }
        Ok(response)
    }

    fn perform_or_fault(&mut self, request: &BackendRequest) -> BackendResponse {
        match self.perform(request) {
            Ok(response) => response,
            Err(err) => {
                warn!("backend access {} failed: {}", request.id, err);
                let err = err.context(format!(
                    "{:?} @ {:#x} from port {}",
                    request.cmd, request.addr, request.origin
                ));
                self.fault.get_or_insert(err);
                BackendResponse {
                    id: request.id,
                    data: vec![0; request.size as usize],
                    success: false,
                }
            }
        }
    }
}

impl Backend for LatencyBackend {
    fn accept(&mut self, now: Cycle, request: BackendRequest) -> bool {
        if self.inflight.is_full() {
            self.owe_retry = true;
            self.stats.refused += 1;
            return false;
        }
        let response = self.perform_or_fault(&request);
        self.stats.accepted += 1;
        self.inflight.try_push(now, response).is_ok()
    }

    fn notify_response_retry(&mut self) {
        self.response_blocked = false;
    }

    fn access_functional(&mut self, request: &BackendRequest) -> BackendResponse {
        self.perform_or_fault(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::AllocatorConfig;

    fn request(id: u64, origin: PortId, cmd: MemCmd, addr: Addr, data: Vec<u8>) -> BackendRequest {
        BackendRequest {
            id,
            origin,
            cmd,
            addr,
            size: if data.is_empty() { 4 } else { data.len() as u32 },
            data,
        }
    }

    fn small_backend(capacity: usize) -> LatencyBackend {
        LatencyBackend::new(BackendConfig {
            latency: 2,
            capacity,
            memory_bytes: 4096,
            reservation_bytes: 64,
        })
    }

    #[test]
    fn store_conditional_needs_own_reservation() {
        let mut backend = small_backend(8);
        backend.access_functional(&request(0, 1, MemCmd::LoadLocked, 0x100, vec![]));
        assert_eq!(Some(1), backend.reservation(0x104));

        let foreign = backend.access_functional(&request(1, 0, MemCmd::StoreCond, 0x100, vec![7; 4]));
        assert!(!foreign.success);
        assert_eq!(None, backend.reservation(0x100));

        backend.access_functional(&request(2, 1, MemCmd::LoadLocked, 0x100, vec![]));
        let own = backend.access_functional(&request(3, 1, MemCmd::StoreCond, 0x100, vec![7; 4]));
        assert!(own.success);
        assert_eq!(&[7; 4], backend.mem().read(0x100, 4).unwrap());
        assert_eq!(1, backend.stats().sc_failures);
    }

    #[test]
    fn plain_store_breaks_reservation() {
        let mut backend = small_backend(8);
        backend.access_functional(&request(0, 2, MemCmd::LoadLocked, 0x40, vec![]));
        backend.access_functional(&request(1, 0, MemCmd::Write, 0x7c, vec![1; 4]));
        let sc = backend.access_functional(&request(2, 2, MemCmd::StoreCond, 0x40, vec![1; 4]));
        assert!(!sc.success);
    }

    #[test]
    fn swap_returns_old_value() {
        let mut backend = small_backend(8);
        backend.mem_mut().write(0x20, &[5; 4]).unwrap();
        let old = backend.access_functional(&request(0, 0, MemCmd::Swap, 0x20, vec![6; 4]));
        assert_eq!(vec![5; 4], old.data);
        assert_eq!(&[6; 4], backend.mem().read(0x20, 4).unwrap());
    }

    #[test]
    fn out_of_range_access_is_reported_as_fault() {
        let mut backend = small_backend(8);
        let resp = backend.access_functional(&request(9, 0, MemCmd::Read, 0x2000, vec![]));
        assert!(!resp.success);
        let err = backend.take_fault().expect("fault recorded");
        assert!(format!("{:#}", err).contains("0x2000"));
        assert!(backend.take_fault().is_none());
    }

    #[test]
    fn full_backend_refuses_then_grants_retry() {
        let mut backend = small_backend(1);
        let mut alloc = Allocator::new(AllocatorConfig::default());
        assert!(backend.accept(0, request(0, 0, MemCmd::Read, 0, vec![])));
        assert!(!backend.accept(0, request(1, 0, MemCmd::Read, 4, vec![])));
        assert_eq!(1, backend.stats().refused);

        // response not yet ready, so the slot is still held
        backend.tick(1, &mut alloc);
        assert_eq!(1, backend.stats().accepted);
        backend.tick(2, &mut alloc);
        assert_eq!(1, backend.stats().responses);
        assert!(backend.is_idle());
    }
}
