use log::debug;
use smallvec::SmallVec;

use crate::alloc::coalesce::{check_line_fit, CoalescedRequest};
use crate::alloc::error::{AllocError, InvariantViolation};
use crate::alloc::lock_table::LockCheck;
use crate::alloc::packet::{MemCmd, PortId, RequestId, Snoop};
use crate::base::port::{Backend, Requestor};
use crate::timeq::Cycle;

use super::Allocator;

type ReadyMask = SmallVec<[bool; 16]>;
type PortList = SmallVec<[PortId; 4]>;

impl Allocator {
    /// Issue path: arbitrate, lock-check, coalesce and send until the backend blocks, the per-cycle
    /// budget is spent, or no port has a ready head.
    pub(super) fn handle_requests<R: Requestor, B: Backend>(
        &mut self,
        now: Cycle,
        requestors: &mut [R],
        backend: &mut B,
    ) -> Result<(), AllocError> {
        self.sweep_locks(now);

        let line_size = self.config.line_size;
        let mut issued = 0;
        while !self.backend_port.is_busy() && issued < self.config.max_issue_per_cycle {
            let ready = self.ready_mask(now);
            let Some(granted) = self.arbiter.arbitrate(&ready) else {
                break;
            };
            let Some(head) = self.ports[granted].peek_head(now).cloned() else {
                break;
            };
            debug!(
                "requesting ports {:?}, granted port {} ({:?} @ {:#x})",
                ready, granted, head.cmd, head.addr
            );

            match self
                .locks
                .is_locked_against(head.addr, granted, now, head.cmd)
            {
                LockCheck::Blocked { .. } => {
                    // parked until a release; the arbiter does not advance
                    self.ports[granted].set_locked(true);
                    self.stats.record_lock_block();
                    continue;
                }
                LockCheck::Released => {
                    self.stats.record_locks_released(1);
                    self.unlock_ports();
                }
                LockCheck::Free => {}
            }

            check_line_fit(granted, &head, line_size)?;
            let mut request = CoalescedRequest::new(granted, head, line_size);

            let mut space_folded = 0;
            if self.config.enable_coalescing && request.cmd().is_coalescable() {
                space_folded = self.coalesce_in_space(now, granted, &ready, &mut request)?;

                if let Some(target) = self.time_coalesce_target(&request) {
                    let ports: PortList = request.ports().collect();
                    match self.fold_in_time(target, request) {
                        Ok(folded) => {
                            debug!("coalesced {} request(s) into in-flight {}", folded, target);
                            self.stats.record_space_coalesced(space_folded);
                            self.stats.record_time_coalesced(folded);
                            self.retire_heads(now, &ports, requestors);
                            self.arbiter.update(granted);
                            self.last_active = now;
                            continue;
                        }
                        Err(unfolded) => request = unfolded,
                    }
                }
            }

            if !self.send(now, granted, request, requestors, backend)? {
                break;
            }
            self.stats.record_space_coalesced(space_folded);
            issued += 1;
        }
        Ok(())
    }

    fn ready_mask(&self, now: Cycle) -> ReadyMask {
        self.ports
            .iter()
            .map(|port| port.is_head_ready(now))
            .collect()
    }

    fn sweep_locks(&mut self, now: Cycle) {
        let expired = self.locks.expire(now);
        if expired > 0 {
            debug!("{} lock(s) expired", expired);
            self.stats.record_locks_released(expired);
            self.unlock_ports();
        }
    }

    fn unlock_ports(&mut self) {
        for port in self.ports.iter_mut().filter(|port| port.is_locked()) {
            port.set_locked(false);
        }
    }

    /// Fold same-line reads sitting at the head of other ready ports and return how many were
    /// folded. Only current heads are considered, never deeper queue entries.
    fn coalesce_in_space(
        &self,
        now: Cycle,
        granted: PortId,
        ready: &[bool],
        request: &mut CoalescedRequest,
    ) -> Result<usize, InvariantViolation> {
        let line_size = self.config.line_size;
        let mut folded = 0;
        for (port, _) in ready
            .iter()
            .enumerate()
            .filter(|&(port, &r)| r && port != granted)
        {
            let Some(txn) = self.ports[port].peek_head(now) else {
                continue;
            };
            if !request.can_merge(txn, line_size) {
                continue;
            }
            check_line_fit(port, txn, line_size)?;
            request.coalesce_in_space(port, txn.clone(), line_size);
            folded += 1;
        }
        if folded > 0 {
            debug!(
                "coalesced {} same-cycle read(s) on line {:#x}",
                folded,
                request.line_addr()
            );
        }
        Ok(folded)
    }

    /// Oldest in-flight read on the same line with no exclusive access to that line issued
    /// after it.
    fn time_coalesce_target(&self, request: &CoalescedRequest) -> Option<RequestId> {
        let mut target = None;
        for (&id, pending) in self
            .outstanding
            .iter()
            .filter(|(_, pending)| pending.line_addr() == request.line_addr())
        {
            if pending.cmd().is_exclusive() {
                target = None;
            } else if target.is_none() && pending.cmd() == request.cmd() {
                target = Some(id);
            }
        }
        target
    }

    fn fold_in_time(
        &mut self,
        target: RequestId,
        request: CoalescedRequest,
    ) -> Result<usize, CoalescedRequest> {
        match self.outstanding.get_mut(&target) {
            Some(pending) => pending.coalesce_in_time(request),
            None => Err(request),
        }
    }

    /// Offer `request` to the backend. On refusal nothing is consumed and false is returned.
    fn send<R: Requestor, B: Backend>(
        &mut self,
        now: Cycle,
        granted: PortId,
        request: CoalescedRequest,
        requestors: &mut [R],
        backend: &mut B,
    ) -> Result<bool, AllocError> {
        let id = self.next_id;
        if self.outstanding.contains_key(&id) {
            return Err(InvariantViolation::DuplicateRequestId { id }.into());
        }

        let backend_request = request.make_backend_request(id, self.config.line_size);
        let (cmd, addr, size) = (backend_request.cmd, backend_request.addr, backend_request.size);
        if !self.backend_port.try_send(now, backend, backend_request) {
            self.stats.record_backend_blocked();
            return Ok(false);
        }
        self.next_id += 1;
        debug!(
            "sent request {} ({:?} @ {:#x}, {} origin(s))",
            id,
            cmd,
            addr,
            request.len()
        );

        if cmd == MemCmd::LoadLocked {
            self.locks.acquire(addr, granted, now)?;
            self.stats.record_lock_acquired();
        }
        if let Some(kind) = cmd.snoop_kind() {
            let snoop = Snoop {
                addr,
                size,
                kind,
                from: granted,
            };
            self.broadcast_snoop(requestors, snoop);
        }

        let ports: PortList = request.ports().collect();
        self.outstanding.insert(id, request);
        self.stats.record_send();
        self.retire_heads(now, &ports, requestors);
        self.arbiter.update(granted);
        self.last_active = now;
        Ok(true)
    }

    /// Pop the heads consumed by an issued or folded request and wake any requestor that was
    /// turned away while its queue was full.
    fn retire_heads<R: Requestor>(&mut self, now: Cycle, ports: &[PortId], requestors: &mut [R]) {
        for &port in ports {
            let head = self.ports[port].pop_head(now);
            debug_assert!(head.is_some(), "port {} had no head to retire", port);
            if let Some(head) = head {
                self.stats.record_wait(head.age(now));
            }
            if self.ports[port].take_retry() {
                debug!("port {}: sending retry", port);
                requestors[port].notify_retry();
            }
        }
    }
}
