use serde::Deserialize;

use crate::alloc::coalesce::line_addr;
use crate::alloc::packet::{Addr, PortId};
use crate::sim::config::Config;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub num_ports: usize,
    /// Admission latency applied to every port without an override
    pub request_latency: Cycle,
    /// Optional per-port admission latency, indexed by port id
    pub port_request_latency: Option<Vec<Cycle>>,
    pub response_latency: Cycle,
    pub line_size: u32,
    pub enable_coalescing: bool,
    /// Backend sends per cycle; models the number of cache ports
    pub max_issue_per_cycle: usize,
    pub lock_timeout: Cycle,
    pub progress_check_period: Cycle,
    pub check_global_progress: bool,
}

impl Config for AllocatorConfig {}

impl Default for AllocatorConfig {
    fn default() -> Self {
        let s = Self {
            num_ports: 1,
            request_latency: 1,
            port_request_latency: None,
            response_latency: 0,
            line_size: 64,
            enable_coalescing: false,
            max_issue_per_cycle: 1,
            lock_timeout: 30,
            progress_check_period: 100_000,
            check_global_progress: false,
        };
        s.ensure_valid();
        s
    }
}

impl AllocatorConfig {
    pub fn ensure_valid(&self) {
        assert!(self.num_ports > 0, "num_ports must be > 0");
        assert!(
            self.line_size.is_power_of_two(),
            "line_size must be a power of two, got {}",
            self.line_size
        );
        assert!(self.max_issue_per_cycle > 0, "max_issue_per_cycle must be > 0");
        assert!(self.lock_timeout > 0, "lock_timeout must be > 0");
        assert!(
            self.progress_check_period > 0,
            "progress_check_period must be > 0"
        );
        if let Some(latencies) = &self.port_request_latency {
            assert_eq!(
                latencies.len(),
                self.num_ports,
                "port_request_latency needs one entry per port"
            );
        }
    }

    pub fn port_latency(&self, port: PortId) -> Cycle {
        self.port_request_latency
            .as_ref()
            .and_then(|latencies| latencies.get(port).copied())
            .unwrap_or(self.request_latency)
    }

    pub fn line_addr(&self, addr: Addr) -> Addr {
        line_addr(addr, self.line_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_single_port_allocator() {
        let config = AllocatorConfig::default();
        assert_eq!(1, config.num_ports);
        assert_eq!(1, config.request_latency);
        assert_eq!(0, config.response_latency);
        assert_eq!(64, config.line_size);
        assert!(!config.enable_coalescing);
        assert_eq!(30, config.lock_timeout);
    }

    #[test]
    fn per_port_latency_overrides_default() {
        let config = AllocatorConfig {
            num_ports: 3,
            port_request_latency: Some(vec![0, 4, 2]),
            ..AllocatorConfig::default()
        };
        config.ensure_valid();
        assert_eq!(4, config.port_latency(1));
        assert_eq!(2, config.port_latency(2));
    }

    #[test]
    fn line_addr_masks_offset() {
        let config = AllocatorConfig::default();
        assert_eq!(0x40, config.line_addr(0x40));
        assert_eq!(0x40, config.line_addr(0x7f));
        assert_eq!(0x80, config.line_addr(0x80));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_line() {
        AllocatorConfig {
            line_size: 48,
            ..AllocatorConfig::default()
        }
        .ensure_valid();
    }

    #[test]
    fn parses_toml_section() {
        let table: toml::Table = toml::from_str(
            r#"
            num_ports = 4
            enable_coalescing = true
            lock_timeout = 12
            "#,
        )
        .unwrap();
        let section = toml::Value::Table(table);
        let config = AllocatorConfig::from_section(Some(&section));
        assert_eq!(4, config.num_ports);
        assert!(config.enable_coalescing);
        assert_eq!(12, config.lock_timeout);
        assert_eq!(64, config.line_size);
    }
}
