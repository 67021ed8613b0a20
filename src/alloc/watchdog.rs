use log::{debug, warn};

use crate::alloc::error::LivenessFailure;
use crate::timeq::Cycle;

use super::Allocator;

impl Allocator {
    /// Periodic deadlock check. A head that has waited longer than the check period, locked or
    /// not, means its port is starved.
    pub(super) fn check_forward_progress(&mut self, now: Cycle) -> Result<(), LivenessFailure> {
        if now < self.next_progress_check {
            return Ok(());
        }
        let period = self.config.progress_check_period;
        self.next_progress_check = now.saturating_add(period);
        debug!("checking forward progress at cycle {}", now);

        for port in &self.ports {
            if let Some(head) = port.front() {
                let waited = head.age(now);
                if waited > period {
                    warn!(
                        "port {}: {:?} @ {:#x} is not making forward progress",
                        port.id(),
                        head.payload.cmd,
                        head.payload.addr
                    );
                    return Err(LivenessFailure::PortStalled {
                        port: port.id(),
                        addr: head.payload.addr,
                        waited,
                    });
                }
            }
            if port.needs_retry() {
                warn!("port {} needs retry", port.id());
            }
        }

        if self.config.check_global_progress && now.saturating_sub(self.last_active) > period {
            return Err(LivenessFailure::GlobalIdle {
                last_active: self.last_active,
                now,
            });
        }
        Ok(())
    }
}
