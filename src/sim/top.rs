use anyhow::{bail, ensure, Context};
use log::info;
use serde::Serialize;

use crate::alloc::packet::Transaction;
use crate::alloc::{Allocator, AllocatorConfig, AllocatorStats, FUNCTIONAL_REQUEST_ID};
use crate::sim::backend::{BackendConfig, BackendStats, LatencyBackend};
use crate::sim::config::SimConfig;
use crate::timeq::Cycle;
use crate::traffic::config::TrafficConfig;
use crate::traffic::driver::{fill_byte, RequestorStats, TrafficRequestor};
use crate::traffic::logging::TrafficLogger;
use crate::traffic::patterns::PatternEngine;

#[derive(Debug, Clone, Serialize)]
pub struct SimSummary {
    pub cycles: Cycle,
    pub allocator: AllocatorStats,
    pub backend: BackendStats,
    pub requestors: Vec<RequestorStats>,
    pub counter: u32,
}

/// Traffic generators, the allocator and a latency backend wired together and stepped one cycle
/// at a time.
pub struct Sim {
    config: SimConfig,
    lockstep: bool,
    alloc: Allocator,
    backend: LatencyBackend,
    engine: PatternEngine,
    requestors: Vec<TrafficRequestor>,
    logger: TrafficLogger,
    shared: (u64, u64),
    counter_addr: u64,
    cycle: Cycle,
}

impl Sim {
    pub fn new(
        sim_config: SimConfig,
        alloc_config: AllocatorConfig,
        backend_config: BackendConfig,
        traffic_config: TrafficConfig,
    ) -> anyhow::Result<Self> {
        let num_ports = alloc_config.num_ports;
        ensure!(num_ports > 0, "allocator needs at least one port");
        let line_size = alloc_config.line_size as u64;
        let address = &traffic_config.address;
        ensure!(
            [address.base, address.shared_bytes, address.private_bytes]
                .iter()
                .all(|v| v % line_size == 0),
            "traffic regions must be aligned to {} byte lines",
            line_size
        );
        let end = address.end(num_ports, line_size);
        ensure!(
            end <= backend_config.memory_bytes as u64,
            "traffic layout ends at {:#x} but backend memory is only {:#x} bytes",
            end,
            backend_config.memory_bytes
        );

        let engine = PatternEngine::new(&traffic_config, num_ports)?;
        let requestors = (0..num_ports)
            .map(|port| {
                TrafficRequestor::new(
                    port,
                    num_ports,
                    &traffic_config.address,
                    &traffic_config.issue,
                    &engine,
                )
            })
            .collect();

        Ok(Self {
            config: sim_config,
            lockstep: traffic_config.lockstep_patterns,
            alloc: Allocator::new(alloc_config),
            backend: LatencyBackend::new(backend_config),
            engine,
            requestors,
            logger: TrafficLogger::new(traffic_config.logging.print_traffic_lines),
            shared: (address.base, address.shared_bytes),
            counter_addr: address.counter_addr(num_ports),
            cycle: 0,
        })
    }

    pub fn simulate(&mut self) -> anyhow::Result<SimSummary> {
        self.preload().context("failed to preload shared region")?;
        for cycle in 0..self.config.timeout {
            self.cycle = cycle;
            self.tick_one(cycle)?;
            if self.finished() {
                info!("simulation finished after {} cycles", cycle);
                return self.summarize();
            }
        }
        bail!(
            "simulation did not finish within {} cycles ({} request(s) outstanding)",
            self.config.timeout,
            self.alloc.outstanding_len()
        )
    }

    pub fn alloc(&self) -> &Allocator {
        &self.alloc
    }

    pub fn backend(&self) -> &LatencyBackend {
        &self.backend
    }

    fn preload(&mut self) -> anyhow::Result<()> {
        let (base, bytes) = self.shared;
        let line_size = self.alloc.config().line_size as u64;
        for addr in (base..base + bytes).step_by(line_size as usize) {
            let data = (addr..addr + line_size).map(fill_byte).collect();
            let txn = Transaction::write(FUNCTIONAL_REQUEST_ID, addr, data);
            self.alloc
                .access_functional(0, 0, txn, &mut self.requestors, &mut self.backend)?;
        }
        if let Some(err) = self.backend.take_fault() {
            return Err(err);
        }
        Ok(())
    }

    fn tick_one(&mut self, now: Cycle) -> anyhow::Result<()> {
        self.backend.tick(now, &mut self.alloc);
        if let Some(err) = self.backend.take_fault() {
            return Err(err.context(format!("backend fault at cycle {}", now)));
        }

        for requestor in &mut self.requestors {
            if let Some(pattern) = requestor.tick(now, &self.engine, &mut self.alloc) {
                let name = self.engine.pattern_name(pattern).unwrap_or("?");
                self.logger
                    .log_pattern_checkpoint(requestor.port(), name, now);
            }
        }

        self.alloc
            .tick(now, &mut self.requestors, &mut self.backend)
            .with_context(|| format!("allocator failed at cycle {}", now))?;

        for requestor in &mut self.requestors {
            if let Some(err) = requestor.take_fault() {
                return Err(err.context(format!("traffic check failed at cycle {}", now)));
            }
        }

        self.advance_barriers();
        Ok(())
    }

    fn advance_barriers(&mut self) {
        if self.lockstep && !self.requestors.iter().all(TrafficRequestor::at_barrier) {
            return;
        }
        for requestor in self.requestors.iter_mut().filter(|r| r.at_barrier()) {
            if requestor.advance_pattern(&self.engine) {
                self.logger.log_port_done(requestor.port());
            }
        }
    }

    fn finished(&self) -> bool {
        self.requestors.iter().all(TrafficRequestor::is_done)
            && self.alloc.is_idle()
            && self.backend.is_idle()
    }

    fn summarize(&mut self) -> anyhow::Result<SimSummary> {
        let now = self.cycle;
        let counter_read = Transaction::read(FUNCTIONAL_REQUEST_ID, self.counter_addr, 4);
        let response = self
            .alloc
            .access_functional(now, 0, counter_read, &mut self.requestors, &mut self.backend)
            .context("failed to read back atomic counter")?;
        if let Some(err) = self.backend.take_fault() {
            return Err(err.context("failed to read back atomic counter"));
        }
        let Some(bytes) = response.data.get(..4) else {
            bail!("atomic counter read returned {} bytes", response.data.len());
        };
        let mut word = [0u8; 4];
        word.copy_from_slice(bytes);
        let counter = u32::from_le_bytes(word);

        let successes: u64 = self
            .requestors
            .iter()
            .map(|r| r.stats().sc_successes)
            .sum();
        if successes > 0 {
            self.logger.log_counter(counter, successes);
        }
        ensure!(
            u64::from(counter) == successes,
            "atomic counter reads {} after {} successful store-conditionals",
            counter,
            successes
        );

        Ok(SimSummary {
            cycles: now,
            allocator: *self.alloc.stats(),
            backend: self.backend.stats().clone(),
            requestors: self.requestors.iter().map(|r| r.stats().clone()).collect(),
            counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::config::Config;
    use toml::{Table, Value};

    const MIXED: &str = r#"
        [sim]
        timeout = 200000

        [allocator]
        num_ports = 4
        request_latency = 1
        response_latency = 1
        enable_coalescing = true
        max_issue_per_cycle = 2

        [backend]
        latency = 4
        capacity = 4
        memory_bytes = 262144

        [traffic]
        reqs_per_pattern = 32
        logging = { print_traffic_lines = false }

        [[traffic.patterns]]
        kind = "hot_line"
        op = "read"

        [[traffic.patterns]]
        kind = "strided"
        op = "write"

        [[traffic.patterns]]
        kind = "strided"
        op = "read"
        region = "private"

        [[traffic.patterns]]
        kind = "random"
        op = "read"
        seed = 7

        [[traffic.patterns]]
        kind = "strided"
        op = "swap"
        req_bytes = 8

        [[traffic.patterns]]
        kind = "llsc"
    "#;

    fn build(toml_src: &str) -> Sim {
        let table: Table = toml::from_str(toml_src).unwrap();
        let section = |name: &str| table.get(name).cloned();
        let sim = SimConfig::from_section(section("sim").as_ref());
        let alloc = AllocatorConfig::from_section(section("allocator").as_ref());
        let backend = BackendConfig::from_section(section("backend").as_ref());
        let traffic = TrafficConfig::from_section(section("traffic").as_ref());
        Sim::new(sim, alloc, backend, traffic).unwrap()
    }

    #[test]
    fn mixed_traffic_runs_to_completion() {
        let mut sim = build(MIXED);
        let summary = sim.simulate().unwrap();

        assert_eq!(4 * 32, summary.counter);
        let alloc = &summary.allocator;
        assert_eq!(alloc.accepted(), alloc.responses_delivered());
        assert!(alloc.space_coalesced() + alloc.time_coalesced() > 0);
        assert!(alloc.locks_acquired() >= 4 * 32);
        assert!(summary.requestors.iter().all(|r| r.finished_at.is_some()));
        assert!(sim.alloc().is_idle());
    }

    #[test]
    fn summary_serializes_to_json() {
        let mut sim = build(
            r#"
            [allocator]
            num_ports = 2
            [traffic]
            reqs_per_pattern = 4
            logging = { print_traffic_lines = false }
            [[traffic.patterns]]
            kind = "strided"
            "#,
        );
        let summary = sim.simulate().unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(Some(0), json["counter"].as_u64());
        assert_eq!(2, json["requestors"].as_array().unwrap().len());
        assert_eq!(Some(8), json["allocator"]["accepted"].as_u64());
    }

    #[test]
    fn layout_larger_than_memory_is_rejected() {
        let table: Table = toml::from_str("memory_bytes = 4096").unwrap();
        let backend = BackendConfig::from_section(Some(&Value::Table(table)));
        let result = Sim::new(
            SimConfig::default(),
            AllocatorConfig::default(),
            backend,
            TrafficConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn short_timeout_is_an_error() {
        let mut sim = build(
            r#"
            [sim]
            timeout = 3
            [traffic]
            logging = { print_traffic_lines = false }
            [[traffic.patterns]]
            kind = "strided"
            "#,
        );
        let err = sim.simulate().unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }
}
