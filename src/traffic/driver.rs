use std::collections::HashMap;

use anyhow::anyhow;
use log::{debug, warn};
use serde::Serialize;

use crate::alloc::packet::{Addr, PortId, Response, Snoop, Transaction};
use crate::alloc::Allocator;
use crate::base::port::Requestor;
use crate::timeq::Cycle;
use crate::traffic::config::{TrafficAddressConfig, TrafficIssueConfig};
use crate::traffic::patterns::{CompiledPattern, PatternEngine, PatternOp, Region};

const COUNTER_BYTES: u32 = 4;

/// Initial content of the shared region, preloaded before traffic starts.
pub fn fill_byte(addr: Addr) -> u8 {
    (addr ^ (addr >> 8) ^ (addr >> 16)) as u8
}

#[derive(Debug, Clone)]
enum Expect {
    /// Exact bytes for a read, or the previous value for a swap
    Data(Vec<u8>),
    Ack,
    LoadLocked,
    StoreCond,
}

#[derive(Debug)]
struct Inflight {
    addr: Addr,
    expect: Expect,
    issued_at: Cycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    AtBarrier,
    Done,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RequestorStats {
    pub port: PortId,
    pub issued: u64,
    pub completed: u64,
    pub rejects: u64,
    pub retries: u64,
    pub snoops: u64,
    pub sc_successes: u64,
    pub sc_failures: u64,
    pub total_latency: u64,
    pub max_latency: u64,
    pub finished_at: Option<Cycle>,
}

/// Synthetic requestor that replays the configured patterns on one allocator port and checks
/// every completion against what it expects memory to hold.
///
/// Reads of the shared region must return the preload; reads and swaps of the port's private
/// region must return its own last store. A port never touches another port's private region,
/// so the expectation is fixed when the transaction is built.
#[derive(Debug)]
pub struct TrafficRequestor {
    port: PortId,
    num_ports: usize,
    address: TrafficAddressConfig,
    max_inflight: usize,
    now: Cycle,
    pattern: usize,
    req_idx: u32,
    next_tag: u64,
    phase: Phase,
    // built but refused by the allocator; resubmitted after a retry
    pending: Option<Transaction>,
    blocked: bool,
    inflight: HashMap<u64, Inflight>,
    shadow: HashMap<Addr, u8>,
    sc_value: Option<u32>,
    fault: Option<anyhow::Error>,
    stats: RequestorStats,
}

impl TrafficRequestor {
    pub fn new(
        port: PortId,
        num_ports: usize,
        address: &TrafficAddressConfig,
        issue: &TrafficIssueConfig,
        engine: &PatternEngine,
    ) -> Self {
        Self {
            port,
            num_ports,
            address: address.clone(),
            max_inflight: issue.max_inflight_per_port.max(1),
            now: 0,
            pattern: 0,
            req_idx: 0,
            next_tag: 0,
            phase: if engine.is_empty() {
                Phase::Done
            } else {
                Phase::Running
            },
            pending: None,
            blocked: false,
            inflight: HashMap::new(),
            shadow: HashMap::new(),
            sc_value: None,
            fault: None,
            stats: RequestorStats {
                port,
                ..RequestorStats::default()
            },
        }
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn stats(&self) -> &RequestorStats {
        &self.stats
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn at_barrier(&self) -> bool {
        self.phase == Phase::AtBarrier
    }

    pub fn current_pattern(&self) -> usize {
        self.pattern
    }

    pub fn take_fault(&mut self) -> Option<anyhow::Error> {
        self.fault.take()
    }

    /// Move past a finished pattern. Returns true once every pattern is done.
    pub fn advance_pattern(&mut self, engine: &PatternEngine) -> bool {
        debug_assert!(self.at_barrier());
        self.pattern += 1;
        self.req_idx = 0;
        if self.pattern >= engine.len() {
            self.phase = Phase::Done;
            self.stats.finished_at = Some(self.now);
        } else {
            self.phase = Phase::Running;
        }
        self.is_done()
    }

    /// Submit at most one transaction. Returns the index of a pattern this port just finished.
    pub fn tick(&mut self, now: Cycle, engine: &PatternEngine, alloc: &mut Allocator) -> Option<usize> {
        self.now = now;
        if self.phase != Phase::Running || self.blocked {
            return None;
        }
        let Some(pattern) = engine.pattern(self.pattern) else {
            self.phase = Phase::Done;
            return None;
        };

        if self.pending.is_none() {
            if self.req_idx >= engine.reqs_per_pattern() {
                if self.inflight.is_empty() {
                    self.phase = Phase::AtBarrier;
                    return Some(self.pattern);
                }
                return None;
            }
            self.pending = if pattern.is_atomic() {
                self.next_atomic(now)
            } else {
                self.next_access(now, engine, pattern)
            };
        }

        if let Some(txn) = self.pending.take() {
            let tag = txn.tag;
            if alloc.submit(now, self.port, txn.clone()) {
                self.stats.issued += 1;
            } else {
                debug!("port {}: tag {} refused, waiting for retry", self.port, tag);
                self.pending = Some(txn);
                self.blocked = true;
                self.stats.rejects += 1;
            }
        }
        None
    }

    fn alloc_tag(&mut self) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    fn track(&mut self, txn: Transaction, expect: Expect, now: Cycle) -> Transaction {
        self.inflight.insert(
            txn.tag,
            Inflight {
                addr: txn.addr,
                expect,
                issued_at: now,
            },
        );
        txn.at(now)
    }

    fn next_atomic(&mut self, now: Cycle) -> Option<Transaction> {
        if !self.inflight.is_empty() {
            return None;
        }
        let addr = self.address.counter_addr(self.num_ports);
        let tag = self.alloc_tag();
        let txn = match self.sc_value.take() {
            Some(value) => {
                let txn = Transaction::store_cond(tag, addr, value.to_le_bytes().to_vec());
                self.track(txn, Expect::StoreCond, now)
            }
            None => {
                let txn = Transaction::load_locked(tag, addr, COUNTER_BYTES);
                self.track(txn, Expect::LoadLocked, now)
            }
        };
        Some(txn)
    }

    fn next_access(
        &mut self,
        now: Cycle,
        engine: &PatternEngine,
        pattern: &CompiledPattern,
    ) -> Option<Transaction> {
        if self.inflight.len() >= self.max_inflight {
            return None;
        }
        let offset = engine.offset(self.pattern, self.req_idx, self.port)?;
        let addr = match pattern.region {
            Region::Shared => self.address.base + offset,
            Region::Private => self.address.private_base(self.port) + offset,
        };
        let size = pattern.req_bytes;
        let tag = self.alloc_tag();

        let txn = match pattern.op {
            PatternOp::Read => {
                let expected = self.expected(addr, size, pattern.region);
                self.track(Transaction::read(tag, addr, size), Expect::Data(expected), now)
            }
            PatternOp::Write => {
                let data = self.store_payload(tag, size);
                self.update_shadow(addr, &data);
                self.track(Transaction::write(tag, addr, data), Expect::Ack, now)
            }
            PatternOp::Swap => {
                let previous = self.expected(addr, size, Region::Private);
                let data = self.store_payload(tag, size);
                self.update_shadow(addr, &data);
                self.track(Transaction::swap(tag, addr, data), Expect::Data(previous), now)
            }
        };
        self.req_idx += 1;
        Some(txn)
    }

    fn expected(&self, addr: Addr, size: u32, region: Region) -> Vec<u8> {
        (addr..addr + size as Addr)
            .map(|a| match region {
                Region::Shared => fill_byte(a),
                Region::Private => self.shadow.get(&a).copied().unwrap_or(0),
            })
            .collect()
    }

    fn store_payload(&self, tag: u64, size: u32) -> Vec<u8> {
        (0..size)
            .map(|i| (tag as u8).wrapping_add(i as u8) ^ (self.port as u8).wrapping_mul(0x11))
            .collect()
    }

    fn update_shadow(&mut self, addr: Addr, data: &[u8]) {
        for (a, &byte) in (addr..).zip(data) {
            self.shadow.insert(a, byte);
        }
    }

    fn owns(&self, addr: Addr) -> bool {
        let base = self.address.private_base(self.port);
        (base..base + self.address.private_bytes).contains(&addr)
    }

    fn record_fault(&mut self, err: anyhow::Error) {
        warn!("port {}: {}", self.port, err);
        self.fault.get_or_insert(err);
    }
}

impl Requestor for TrafficRequestor {
    fn deliver(&mut self, response: Response) -> bool {
        let Some(entry) = self.inflight.remove(&response.tag) else {
            let err = anyhow!("port {}: completion for unknown tag {}", self.port, response.tag);
            self.record_fault(err);
            return true;
        };
        let latency = self.now.saturating_sub(entry.issued_at);
        self.stats.completed += 1;
        self.stats.total_latency += latency;
        self.stats.max_latency = self.stats.max_latency.max(latency);

        match entry.expect {
            Expect::Data(expected) => {
                if response.data != expected {
                    let err = anyhow!(
                        "port {}: {:?} @ {:#x} returned {:02x?}, expected {:02x?}",
                        self.port,
                        response.cmd,
                        entry.addr,
                        response.data,
                        expected
                    );
                    self.record_fault(err);
                }
            }
            Expect::Ack => {}
            Expect::LoadLocked => match response.data.get(..COUNTER_BYTES as usize) {
                Some(bytes) => {
                    let mut word = [0u8; 4];
                    word.copy_from_slice(bytes);
                    self.sc_value = Some(u32::from_le_bytes(word).wrapping_add(1));
                }
                None => {
                    let err = anyhow!(
                        "port {}: load-locked @ {:#x} returned {} bytes",
                        self.port,
                        entry.addr,
                        response.data.len()
                    );
                    self.record_fault(err);
                }
            },
            Expect::StoreCond => {
                if response.success {
                    self.stats.sc_successes += 1;
                    self.req_idx += 1;
                } else {
                    self.stats.sc_failures += 1;
                }
            }
        }
        true
    }

    fn notify_retry(&mut self) {
        if !self.blocked {
            self.record_fault(anyhow!("port {}: retry without a refused request", self.port));
            return;
        }
        self.blocked = false;
        self.stats.retries += 1;
    }

    fn receive_snoop(&mut self, snoop: &Snoop) {
        self.stats.snoops += 1;
        if self.owns(snoop.addr) {
            let err = anyhow!(
                "port {}: port {} stored into its private region @ {:#x}",
                self.port,
                snoop.from,
                snoop.addr
            );
            self.record_fault(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::packet::{MemCmd, SnoopKind};
    use crate::alloc::AllocatorConfig;
    use crate::traffic::config::{TrafficConfig, TrafficPatternSpec};

    fn engine(kind: &str, op: &str, reqs: u32) -> (TrafficConfig, PatternEngine) {
        let config = TrafficConfig {
            reqs_per_pattern: reqs,
            patterns: vec![TrafficPatternSpec {
                kind: kind.to_string(),
                op: op.to_string(),
                ..TrafficPatternSpec::default()
            }],
            ..TrafficConfig::default()
        };
        let engine = PatternEngine::new(&config, 2).unwrap();
        (config, engine)
    }

    fn requestor(config: &TrafficConfig, engine: &PatternEngine, port: PortId) -> TrafficRequestor {
        TrafficRequestor::new(port, 2, &config.address, &config.issue, engine)
    }

    fn alloc() -> Allocator {
        Allocator::new(AllocatorConfig {
            num_ports: 2,
            ..AllocatorConfig::default()
        })
    }

    fn respond(tag: u64, cmd: MemCmd, data: Vec<u8>, success: bool) -> Response {
        Response {
            tag,
            cmd,
            addr: 0,
            data,
            success,
        }
    }

    #[test]
    fn shared_reads_expect_preload() {
        let (config, engine) = engine("strided", "read", 1);
        let mut req = requestor(&config, &engine, 1);
        let mut alloc = alloc();
        assert_eq!(None, req.tick(0, &engine, &mut alloc));
        assert_eq!(1, alloc.port(1).len());

        let addr = config.address.base + 4;
        let data = (addr..addr + 4).map(fill_byte).collect();
        assert!(req.deliver(respond(0, MemCmd::Read, data, true)));
        assert!(req.take_fault().is_none());
        assert_eq!(Some(0), req.tick(1, &engine, &mut alloc));
        assert!(req.at_barrier());
        assert!(req.advance_pattern(&engine));
        assert_eq!(Some(1), req.stats().finished_at);
    }

    #[test]
    fn wrong_data_is_a_fault() {
        let (config, engine) = engine("strided", "read", 1);
        let mut req = requestor(&config, &engine, 0);
        let mut alloc = alloc();
        req.tick(0, &engine, &mut alloc);
        req.deliver(respond(0, MemCmd::Read, vec![0; 4], true));
        let err = req.take_fault().expect("mismatch recorded");
        assert!(err.to_string().contains("expected"));
    }

    #[test]
    fn swap_expects_previous_store() {
        let config = TrafficConfig {
            reqs_per_pattern: 1,
            patterns: vec![
                TrafficPatternSpec {
                    kind: "strided".to_string(),
                    op: "write".to_string(),
                    ..TrafficPatternSpec::default()
                },
                TrafficPatternSpec {
                    kind: "strided".to_string(),
                    op: "swap".to_string(),
                    ..TrafficPatternSpec::default()
                },
            ],
            ..TrafficConfig::default()
        };
        let engine = PatternEngine::new(&config, 1).unwrap();
        let mut req = TrafficRequestor::new(0, 1, &config.address, &config.issue, &engine);
        let mut alloc = Allocator::new(AllocatorConfig::default());

        req.tick(0, &engine, &mut alloc);
        req.deliver(respond(0, MemCmd::Write, vec![], true));
        assert_eq!(Some(0), req.tick(1, &engine, &mut alloc));
        assert!(!req.advance_pattern(&engine));

        req.tick(2, &engine, &mut alloc);
        let written = req.store_payload(0, 4);
        req.deliver(respond(1, MemCmd::Swap, written, true));
        assert!(req.take_fault().is_none());
    }

    #[test]
    fn refused_submit_waits_for_retry() {
        let (config, engine) = engine("strided", "read", 4);
        let mut req = requestor(&config, &engine, 0);
        let mut alloc = alloc();
        // request_latency 1 gives each port two slots
        req.tick(0, &engine, &mut alloc);
        req.tick(0, &engine, &mut alloc);
        req.tick(0, &engine, &mut alloc);
        assert_eq!(2, req.stats().issued);
        assert_eq!(1, req.stats().rejects);

        req.tick(1, &engine, &mut alloc);
        assert_eq!(1, req.stats().rejects, "blocked port must not resubmit");

        req.notify_retry();
        assert_eq!(1, req.stats().retries);
        req.notify_retry();
        assert!(req.take_fault().is_some());
    }

    #[test]
    fn atomic_pattern_alternates_ll_and_sc() {
        let (config, engine) = engine("llsc", "read", 1);
        let mut req = requestor(&config, &engine, 0);
        let mut alloc = alloc();

        req.tick(0, &engine, &mut alloc);
        assert_eq!(MemCmd::LoadLocked, alloc.port(0).front().unwrap().payload.cmd);
        req.deliver(respond(0, MemCmd::LoadLocked, 41u32.to_le_bytes().to_vec(), true));

        req.tick(1, &engine, &mut alloc);
        let sc = alloc.port(0).queued().last().cloned().unwrap();
        assert_eq!(MemCmd::StoreCond, sc.cmd);
        assert_eq!(42u32.to_le_bytes().to_vec(), sc.data);

        req.deliver(respond(1, MemCmd::StoreCond, vec![], false));
        assert_eq!(1, req.stats().sc_failures);
        assert_eq!(None, req.tick(2, &engine, &mut alloc), "failed sc retries the load");
        assert_eq!(0, req.stats().sc_successes);
    }

    #[test]
    fn foreign_store_into_private_region_is_flagged() {
        let (config, engine) = engine("strided", "read", 1);
        let mut req = requestor(&config, &engine, 1);
        req.receive_snoop(&Snoop {
            addr: config.address.private_base(0),
            size: 4,
            kind: SnoopKind::Upgrade,
            from: 0,
        });
        assert!(req.take_fault().is_none());
        req.receive_snoop(&Snoop {
            addr: config.address.private_base(1) + 8,
            size: 4,
            kind: SnoopKind::Upgrade,
            from: 0,
        });
        assert!(req.take_fault().is_some());
        assert_eq!(2, req.stats().snoops);
    }
}
