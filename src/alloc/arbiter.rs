use crate::alloc::packet::PortId;

/// Round-robin arbiter over a ready mask. Deciding is pure; only `update` moves the rotation, so a
/// grant that is later withdrawn (locked head, busy backend) leaves fairness untouched.
#[derive(Debug, Clone)]
pub struct RoundRobinArbiter {
    num_ports: usize,
    last_granted: Option<PortId>,
}

impl RoundRobinArbiter {
    pub fn new(num_ports: usize) -> Self {
        assert!(num_ports > 0, "arbiter needs at least one port");
        Self {
            num_ports,
            last_granted: None,
        }
    }

    pub fn num_ports(&self) -> usize {
        self.num_ports
    }

    /// First ready port at or after the one following the last grant, wrapping around.
    pub fn arbitrate(&self, ready: &[bool]) -> Option<PortId> {
        assert_eq!(ready.len(), self.num_ports, "ready mask width mismatch");
        let start = self
            .last_granted
            .map_or(0, |last| (last + 1) % self.num_ports);
        (0..self.num_ports)
            .map(|i| (start + i) % self.num_ports)
            .find(|&port| ready[port])
    }

    pub fn update(&mut self, granted: PortId) {
        assert!(granted < self.num_ports, "granted port {} out of range", granted);
        self.last_granted = Some(granted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_grant_starts_at_port_zero() {
        let arbiter = RoundRobinArbiter::new(4);
        assert_eq!(Some(0), arbiter.arbitrate(&[true, true, true, true]));
        assert_eq!(Some(2), arbiter.arbitrate(&[false, false, true, true]));
    }

    #[test]
    fn empty_mask_grants_nothing() {
        let arbiter = RoundRobinArbiter::new(3);
        assert_eq!(None, arbiter.arbitrate(&[false; 3]));
    }

    #[test]
    fn rotation_wraps_past_last_port() {
        let mut arbiter = RoundRobinArbiter::new(4);
        arbiter.update(3);
        assert_eq!(Some(0), arbiter.arbitrate(&[true, false, true, false]));
        arbiter.update(2);
        assert_eq!(Some(0), arbiter.arbitrate(&[true, false, true, false]));
    }

    #[test]
    fn every_port_granted_once_per_round() {
        let mut arbiter = RoundRobinArbiter::new(5);
        let ready = [true; 5];
        for _round in 0..3 {
            let mut seen = [false; 5];
            for _ in 0..5 {
                let port = arbiter.arbitrate(&ready).unwrap();
                assert!(!seen[port], "port {port} granted twice in one round");
                seen[port] = true;
                arbiter.update(port);
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn arbitrate_without_update_is_stable() {
        let arbiter = RoundRobinArbiter::new(3);
        let ready = [false, true, true];
        assert_eq!(arbiter.arbitrate(&ready), arbiter.arbitrate(&ready));
    }
}
