use std::str::FromStr;

use anyhow::{anyhow, bail, ensure, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::traffic::config::{TrafficConfig, TrafficPatternSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Read,
    Write,
    Swap,
}

impl PatternOp {
    pub fn is_store(self) -> bool {
        !matches!(self, Self::Read)
    }

    fn suffix(self) -> char {
        match self {
            Self::Read => 'r',
            Self::Write => 'w',
            Self::Swap => 'x',
        }
    }
}

impl FromStr for PatternOp {
    type Err = anyhow::Error;

    fn from_str(op: &str) -> Result<Self, Self::Err> {
        match op.trim().to_ascii_lowercase().as_str() {
            "read" | "r" | "load" => Ok(Self::Read),
            "write" | "w" | "store" => Ok(Self::Write),
            "swap" | "x" | "amoswap" => Ok(Self::Swap),
            other => Err(anyhow!("unknown op '{}' (expected read|write|swap)", other)),
        }
    }
}

/// Which part of the traffic layout a pattern addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Shared,
    Private,
}

impl Region {
    fn resolve(region: Option<&str>, op: PatternOp) -> anyhow::Result<Self> {
        let Some(region) = region else {
            return Ok(if op.is_store() { Self::Private } else { Self::Shared });
        };
        match region.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "shared" if op.is_store() => bail!("stores must target the private region"),
            "shared" => Ok(Self::Shared),
            other => bail!("unknown region '{}' (expected shared|private)", other),
        }
    }
}

#[derive(Debug, Clone)]
enum Shape {
    Strided { step_stride: u64, port_stride: u64 },
    // offsets drawn up front, port-major
    Random { offsets: Vec<u64> },
    AtomicIncrement,
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub name: String,
    pub op: PatternOp,
    pub region: Region,
    pub req_bytes: u32,
    window: u64,
    shape: Shape,
}

impl CompiledPattern {
    fn compile(
        spec: &TrafficPatternSpec,
        config: &TrafficConfig,
        ports: usize,
    ) -> anyhow::Result<Self> {
        let req_bytes = spec.req_bytes.max(1);
        ensure!(
            req_bytes.is_power_of_two(),
            "req_bytes {} is not a power of two",
            req_bytes
        );
        let op: PatternOp = spec.op.parse()?;
        let region = Region::resolve(spec.region.as_deref(), op)?;
        let region_bytes = match region {
            Region::Shared => config.address.shared_bytes,
            Region::Private => config.address.private_bytes,
        };

        let kind = spec.kind.trim().to_ascii_lowercase();
        let default_window = if kind == "hot_line" { 64 } else { region_bytes };
        let window = spec
            .within_bytes
            .unwrap_or(default_window)
            .min(region_bytes)
            .max(req_bytes as u64);

        let shape = match kind.as_str() {
            "strided" => Shape::Strided {
                step_stride: spec.step_stride.max(1) as u64,
                port_stride: spec.port_stride as u64,
            },
            "hot_line" => Shape::Strided {
                step_stride: 1,
                port_stride: 1,
            },
            "random" => {
                let lo = spec.random_min as u64;
                let hi = match spec.random_max {
                    0 => window / req_bytes as u64,
                    max => max as u64,
                }
                .max(lo + 1);
                let draws = ports * config.reqs_per_pattern.max(1) as usize;
                let mut rng = StdRng::seed_from_u64(spec.seed);
                let offsets = (0..draws)
                    .map(|_| rng.gen_range(lo..hi) * req_bytes as u64)
                    .collect();
                Shape::Random { offsets }
            }
            "llsc" | "atomic" => Shape::AtomicIncrement,
            other => bail!(
                "unknown pattern kind '{}' (expected strided|hot_line|random|llsc)",
                other
            ),
        };

        let name = if spec.name.is_empty() {
            default_name(&kind, &shape, spec.seed, req_bytes, op)
        } else {
            spec.name.clone()
        };

        Ok(Self {
            name,
            op,
            region,
            req_bytes,
            window,
            shape,
        })
    }

    /// LL/SC increments of the shared counter rather than addressed traffic.
    pub fn is_atomic(&self) -> bool {
        matches!(self.shape, Shape::AtomicIncrement)
    }

    fn raw_offset(&self, req_idx: u32, port: usize, ports: usize, reqs: usize) -> u64 {
        match &self.shape {
            Shape::Strided {
                step_stride,
                port_stride,
            } => {
                let slot = req_idx as u64 * step_stride * ports as u64 + port as u64;
                slot * port_stride * self.req_bytes as u64
            }
            Shape::Random { offsets } => offsets
                .get(port * reqs + req_idx as usize)
                .copied()
                .unwrap_or(0),
            Shape::AtomicIncrement => 0,
        }
    }
}

fn default_name(kind: &str, shape: &Shape, seed: u64, req_bytes: u32, op: PatternOp) -> String {
    let base = match shape {
        Shape::AtomicIncrement => return "llsc_increment".to_string(),
        Shape::Strided { .. } if kind == "hot_line" => "hot_line".to_string(),
        Shape::Strided {
            step_stride,
            port_stride,
        } => format!("strided({}, {})", step_stride, port_stride),
        Shape::Random { .. } => format!("random({})", seed),
    };
    format!("{}@{}_{}", base, req_bytes, op.suffix())
}

/// Compiled traffic patterns shared by every port's generator.
#[derive(Debug, Clone, Default)]
pub struct PatternEngine {
    patterns: Vec<CompiledPattern>,
    ports: usize,
    reqs_per_pattern: usize,
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig, ports: usize) -> anyhow::Result<Self> {
        let ports = ports.max(1);
        let patterns = config
            .patterns
            .iter()
            .enumerate()
            .map(|(idx, spec)| {
                CompiledPattern::compile(spec, config, ports)
                    .with_context(|| format!("invalid traffic pattern {}", idx))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            ports,
            reqs_per_pattern: config.reqs_per_pattern.max(1) as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn reqs_per_pattern(&self) -> u32 {
        self.reqs_per_pattern as u32
    }

    pub fn pattern(&self, idx: usize) -> Option<&CompiledPattern> {
        self.patterns.get(idx)
    }

    pub fn pattern_name(&self, idx: usize) -> Option<&str> {
        self.pattern(idx).map(|p| p.name.as_str())
    }

    /// Byte offset of request `req_idx` from `port` within the pattern's region, naturally
    /// aligned so no access straddles a line.
    pub fn offset(&self, pattern_idx: usize, req_idx: u32, port: usize) -> Option<u64> {
        let pattern = self.pattern(pattern_idx)?;
        let raw = pattern.raw_offset(req_idx, port, self.ports, self.reqs_per_pattern);
        Some((raw % pattern.window) & !(pattern.req_bytes as u64 - 1))
    }
}
