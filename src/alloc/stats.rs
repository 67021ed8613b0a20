use serde::Serialize;
use std::ops::AddAssign;

use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AllocatorStats {
    accepted: u64,
    requestor_rejects: u64,
    backend_sends: u64,
    backend_blocked: u64,
    space_coalesced: u64,
    time_coalesced: u64,
    lock_blocks: u64,
    locks_acquired: u64,
    locks_released: u64,
    snoops_sent: u64,
    responses_drained: u64,
    responses_delivered: u64,
    response_rejects: u64,
    functional_accesses: u64,
    request_count: u64,
    wait_latency: u64,
    outstanding: u64,
    max_outstanding: u64,
}

impl AllocatorStats {
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn requestor_rejects(&self) -> u64 {
        self.requestor_rejects
    }

    pub fn backend_sends(&self) -> u64 {
        self.backend_sends
    }

    pub fn backend_blocked(&self) -> u64 {
        self.backend_blocked
    }

    pub fn space_coalesced(&self) -> u64 {
        self.space_coalesced
    }

    pub fn time_coalesced(&self) -> u64 {
        self.time_coalesced
    }

    pub fn lock_blocks(&self) -> u64 {
        self.lock_blocks
    }

    pub fn locks_acquired(&self) -> u64 {
        self.locks_acquired
    }

    pub fn locks_released(&self) -> u64 {
        self.locks_released
    }

    pub fn snoops_sent(&self) -> u64 {
        self.snoops_sent
    }

    pub fn responses_drained(&self) -> u64 {
        self.responses_drained
    }

    pub fn responses_delivered(&self) -> u64 {
        self.responses_delivered
    }

    pub fn response_rejects(&self) -> u64 {
        self.response_rejects
    }

    pub fn functional_accesses(&self) -> u64 {
        self.functional_accesses
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn wait_latency(&self) -> u64 {
        self.wait_latency
    }

    pub fn max_outstanding(&self) -> u64 {
        self.max_outstanding
    }

    pub fn avg_wait_latency(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.wait_latency as f64 / self.request_count as f64
    }

    pub fn record_accept(&mut self) {
        self.accepted = self.accepted.saturating_add(1);
    }

    pub fn record_requestor_reject(&mut self) {
        self.requestor_rejects = self.requestor_rejects.saturating_add(1);
    }

    pub fn record_send(&mut self) {
        self.backend_sends = self.backend_sends.saturating_add(1);
        self.outstanding = self.outstanding.saturating_add(1);
        self.max_outstanding = self.max_outstanding.max(self.outstanding);
    }

    pub fn record_backend_blocked(&mut self) {
        self.backend_blocked = self.backend_blocked.saturating_add(1);
    }

    pub fn record_space_coalesced(&mut self, folded: usize) {
        self.space_coalesced = self.space_coalesced.saturating_add(folded as u64);
    }

    pub fn record_time_coalesced(&mut self, folded: usize) {
        self.time_coalesced = self.time_coalesced.saturating_add(folded as u64);
    }

    pub fn record_lock_block(&mut self) {
        self.lock_blocks = self.lock_blocks.saturating_add(1);
    }

    pub fn record_lock_acquired(&mut self) {
        self.locks_acquired = self.locks_acquired.saturating_add(1);
    }

    pub fn record_locks_released(&mut self, count: usize) {
        self.locks_released = self.locks_released.saturating_add(count as u64);
    }

    pub fn record_snoops(&mut self, count: usize) {
        self.snoops_sent = self.snoops_sent.saturating_add(count as u64);
    }

    pub fn record_drain(&mut self) {
        self.responses_drained = self.responses_drained.saturating_add(1);
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    pub fn record_delivery(&mut self) {
        self.responses_delivered = self.responses_delivered.saturating_add(1);
    }

    pub fn record_response_reject(&mut self) {
        self.response_rejects = self.response_rejects.saturating_add(1);
    }

    pub fn record_functional(&mut self) {
        self.functional_accesses = self.functional_accesses.saturating_add(1);
    }

    pub fn record_wait(&mut self, latency: Cycle) {
        self.request_count = self.request_count.saturating_add(1);
        self.wait_latency = self.wait_latency.saturating_add(latency);
    }
}

impl AddAssign<&AllocatorStats> for AllocatorStats {
    fn add_assign(&mut self, other: &AllocatorStats) {
        self.accepted = self.accepted.saturating_add(other.accepted);
        self.requestor_rejects = self
            .requestor_rejects
            .saturating_add(other.requestor_rejects);
        self.backend_sends = self.backend_sends.saturating_add(other.backend_sends);
        self.backend_blocked = self.backend_blocked.saturating_add(other.backend_blocked);
        self.space_coalesced = self.space_coalesced.saturating_add(other.space_coalesced);
        self.time_coalesced = self.time_coalesced.saturating_add(other.time_coalesced);
        self.lock_blocks = self.lock_blocks.saturating_add(other.lock_blocks);
        self.locks_acquired = self.locks_acquired.saturating_add(other.locks_acquired);
        self.locks_released = self.locks_released.saturating_add(other.locks_released);
        self.snoops_sent = self.snoops_sent.saturating_add(other.snoops_sent);
        self.responses_drained = self
            .responses_drained
            .saturating_add(other.responses_drained);
        self.responses_delivered = self
            .responses_delivered
            .saturating_add(other.responses_delivered);
        self.response_rejects = self.response_rejects.saturating_add(other.response_rejects);
        self.functional_accesses = self
            .functional_accesses
            .saturating_add(other.functional_accesses);
        self.request_count = self.request_count.saturating_add(other.request_count);
        self.wait_latency = self.wait_latency.saturating_add(other.wait_latency);
        self.outstanding = self.outstanding.saturating_add(other.outstanding);
        self.max_outstanding = self.max_outstanding.max(other.max_outstanding);
    }
}

impl AddAssign<AllocatorStats> for AllocatorStats {
    fn add_assign(&mut self, other: AllocatorStats) {
        *self += &other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_wait_handles_empty() {
        let stats = AllocatorStats::default();
        assert_eq!(0.0, stats.avg_wait_latency());
    }

    #[test]
    fn outstanding_high_water_mark() {
        let mut stats = AllocatorStats::default();
        stats.record_send();
        stats.record_send();
        stats.record_drain();
        stats.record_send();
        assert_eq!(3, stats.backend_sends());
        assert_eq!(2, stats.max_outstanding());
    }

    #[test]
    fn add_assign_sums_counters() {
        let mut a = AllocatorStats::default();
        a.record_wait(4);
        a.record_snoops(3);
        let mut b = AllocatorStats::default();
        b.record_wait(2);
        b.record_send();
        a += b;
        assert_eq!(2, a.request_count());
        assert_eq!(3.0, a.avg_wait_latency());
        assert_eq!(3, a.snoops_sent());
        assert_eq!(1, a.max_outstanding());
    }
}
