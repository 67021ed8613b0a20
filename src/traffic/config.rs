use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    /// Wait for every port to finish a pattern before any port starts the next
    pub lockstep_patterns: bool,
    pub reqs_per_pattern: u32,
    pub address: TrafficAddressConfig,
    pub issue: TrafficIssueConfig,
    pub logging: TrafficLoggingConfig,
    pub patterns: Vec<TrafficPatternSpec>,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            lockstep_patterns: true,
            reqs_per_pattern: 256,
            address: TrafficAddressConfig::default(),
            issue: TrafficIssueConfig::default(),
            logging: TrafficLoggingConfig::default(),
            patterns: Vec::new(),
        }
    }
}

/// Memory layout seen by the generators: a preloaded read-only shared region, then one private
/// store region per port, then a single line holding the atomic counter.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficAddressConfig {
    pub base: u64,
    pub shared_bytes: u64,
    pub private_bytes: u64,
}

impl Default for TrafficAddressConfig {
    fn default() -> Self {
        Self {
            base: 0x1000,
            shared_bytes: 64 << 10,
            private_bytes: 4 << 10,
        }
    }
}

impl TrafficAddressConfig {
    pub fn private_base(&self, port: usize) -> u64 {
        self.base + self.shared_bytes + port as u64 * self.private_bytes
    }

    pub fn counter_addr(&self, num_ports: usize) -> u64 {
        self.private_base(num_ports)
    }

    /// One past the last byte touched by `num_ports` generators, given `line_size` lines.
    pub fn end(&self, num_ports: usize, line_size: u64) -> u64 {
        self.counter_addr(num_ports) + line_size
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficIssueConfig {
    pub max_inflight_per_port: usize,
}

impl Default for TrafficIssueConfig {
    fn default() -> Self {
        Self {
            max_inflight_per_port: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficLoggingConfig {
    pub print_traffic_lines: bool,
}

impl Default for TrafficLoggingConfig {
    fn default() -> Self {
        Self {
            print_traffic_lines: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficPatternSpec {
    pub name: String,
    pub kind: String,
    pub op: String,
    /// `shared` or `private`; stores always go to the private region
    pub region: Option<String>,
    pub req_bytes: u32,
    pub step_stride: u32,
    pub port_stride: u32,
    pub random_min: u32,
    pub random_max: u32,
    pub seed: u64,
    pub within_bytes: Option<u64>,
}

impl Default for TrafficPatternSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: String::new(),
            op: "read".to_string(),
            region: None,
            req_bytes: 4,
            step_stride: 1,
            port_stride: 1,
            random_min: 0,
            random_max: 0,
            seed: 0,
            within_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_laid_out_back_to_back() {
        let address = TrafficAddressConfig {
            base: 0x100,
            shared_bytes: 0x400,
            private_bytes: 0x100,
        };
        assert_eq!(0x500, address.private_base(0));
        assert_eq!(0x700, address.private_base(2));
        assert_eq!(0x800, address.counter_addr(3));
        assert_eq!(0x840, address.end(3, 64));
    }

    #[test]
    fn parses_pattern_tables() {
        let table: toml::Table = toml::from_str(
            r#"
            reqs_per_pattern = 16
            [[patterns]]
            kind = "strided"
            req_bytes = 8
            [[patterns]]
            kind = "llsc"
            "#,
        )
        .unwrap();
        let config = TrafficConfig::from_section(Some(&toml::Value::Table(table)));
        assert_eq!(16, config.reqs_per_pattern);
        assert_eq!(2, config.patterns.len());
        assert_eq!(8, config.patterns[0].req_bytes);
        assert_eq!("read", config.patterns[1].op);
        assert!(config.lockstep_patterns);
    }
}
