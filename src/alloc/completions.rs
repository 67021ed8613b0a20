use log::debug;

use crate::alloc::error::{AllocError, InvariantViolation};
use crate::base::port::{Backend, Requestor};
use crate::timeq::Cycle;

use super::Allocator;

impl Allocator {
    /// Response path: drain every backend response whose latency has elapsed and fan each out to
    /// the ports folded into it. Requestors must accept completions unconditionally.
    pub(super) fn handle_responses<R: Requestor, B: Backend>(
        &mut self,
        now: Cycle,
        requestors: &mut [R],
        backend: &mut B,
    ) -> Result<(), AllocError> {
        let mut drained = false;
        while let Some(response) = self.backend_port.drain_ready(now) {
            let id = response.id;
            let request = self
                .outstanding
                .remove(&id)
                .ok_or(InvariantViolation::UnknownResponse { id })?;
            debug!(
                "responding to request {} ({:?} @ {:#x}, {} origin(s))",
                id,
                request.cmd(),
                request.line_addr(),
                request.len()
            );

            for (port, completion) in request.fan_out(response)? {
                let addr = completion.addr;
                if !requestors[port].deliver(completion) {
                    return Err(InvariantViolation::DeliveryRefused { port, addr }.into());
                }
                self.stats.record_delivery();
            }
            self.stats.record_drain();
            self.last_active = now;
            drained = true;
        }

        if drained && self.backend_port.take_retry() {
            debug!("response queue drained, sending retry to backend");
            backend.notify_response_retry();
        }
        Ok(())
    }
}
