use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, Default)]
pub struct TrafficLogger {
    enabled: bool,
}

impl TrafficLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn log_pattern_checkpoint(&self, port: usize, pattern_name: &str, cycle: Cycle) {
        if self.enabled {
            println!(
                "[TRAFFIC] port {} {} finished at time {:>10}",
                port, pattern_name, cycle
            );
        }
    }

    pub fn log_port_done(&self, port: usize) {
        if self.enabled {
            println!("[TRAFFIC] port {} all done!", port);
        }
    }

    pub fn log_counter(&self, value: u32, expected: u64) {
        if self.enabled {
            println!("[TRAFFIC] atomic counter {} (expected {})", value, expected);
        }
    }
}
