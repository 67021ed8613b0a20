use log::debug;

use crate::alloc::packet::{BackendRequest, BackendResponse};
use crate::base::port::Backend;
use crate::timeq::{Cycle, QueueConfig, TimedQueue};

/// Master-side channel to the shared backend.
///
/// Outbound requests go straight to the backend; a refusal marks the port busy until the backend
/// calls back. Inbound responses wait `response_latency` cycles in a bounded queue before the
/// allocator may drain them.
#[derive(Debug)]
pub struct BackendPort {
    responses: TimedQueue<BackendResponse>,
    busy: bool,
    need_retry: bool,
}

impl BackendPort {
    pub fn new(response_latency: Cycle) -> Self {
        Self {
            responses: TimedQueue::new(QueueConfig::pipelined(response_latency)),
            busy: false,
            need_retry: false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn need_retry(&self) -> bool {
        self.need_retry
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    pub fn try_send<B: Backend>(
        &mut self,
        now: Cycle,
        backend: &mut B,
        request: BackendRequest,
    ) -> bool {
        if self.busy {
            return false;
        }
        let id = request.id;
        if backend.accept(now, request) {
            return true;
        }
        debug!("backend refused request {}, blocking until retry", id);
        self.busy = true;
        false
    }

    pub fn on_retry(&mut self) {
        self.busy = false;
    }

    pub fn recv_response(&mut self, now: Cycle, response: BackendResponse) -> bool {
        match self.responses.try_push(now, response) {
            Ok(()) => true,
            Err(rejected) => {
                debug!(
                    "response queue full, backend must retry response {}",
                    rejected.into_payload().id
                );
                self.need_retry = true;
                false
            }
        }
    }

    pub fn drain_ready(&mut self, now: Cycle) -> Option<BackendResponse> {
        self.responses.pop_ready(now).map(|entry| entry.payload)
    }

    pub fn take_retry(&mut self) -> bool {
        std::mem::take(&mut self.need_retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::packet::MemCmd;

    struct Gate {
        open: bool,
        accepted: Vec<u64>,
    }

    impl Backend for Gate {
        fn accept(&mut self, _now: Cycle, request: BackendRequest) -> bool {
            if self.open {
                self.accepted.push(request.id);
            }
            self.open
        }

        fn notify_response_retry(&mut self) {}

        fn access_functional(&mut self, request: &BackendRequest) -> BackendResponse {
            BackendResponse::new(request.id, Vec::new())
        }
    }

    fn request(id: u64) -> BackendRequest {
        BackendRequest {
            id,
            origin: 0,
            cmd: MemCmd::Read,
            addr: 0,
            size: 64,
            data: Vec::new(),
        }
    }

    #[test]
    fn refusal_blocks_until_retry() {
        let mut port = BackendPort::new(0);
        let mut gate = Gate {
            open: false,
            accepted: Vec::new(),
        };
        assert!(!port.try_send(0, &mut gate, request(0)));
        assert!(port.is_busy());
        gate.open = true;
        assert!(!port.try_send(1, &mut gate, request(0)));
        port.on_retry();
        assert!(port.try_send(2, &mut gate, request(0)));
        assert_eq!(vec![0], gate.accepted);
    }

    #[test]
    fn response_queue_applies_latency_and_capacity() {
        let mut port = BackendPort::new(2);
        assert!(port.recv_response(0, BackendResponse::new(1, vec![])));
        assert!(port.recv_response(0, BackendResponse::new(2, vec![])));
        assert!(port.recv_response(1, BackendResponse::new(3, vec![])));
        assert!(!port.recv_response(1, BackendResponse::new(4, vec![])));
        assert!(port.need_retry());

        assert!(port.drain_ready(1).is_none());
        assert_eq!(1, port.drain_ready(2).unwrap().id);
        assert_eq!(2, port.drain_ready(2).unwrap().id);
        assert!(port.drain_ready(2).is_none());
        assert!(port.take_retry());
        assert!(!port.need_retry());
    }
}
