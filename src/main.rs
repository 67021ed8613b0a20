use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use cachealloc::alloc::AllocatorConfig;
use cachealloc::sim::backend::BackendConfig;
use cachealloc::sim::config::{Config, SimConfig};
use cachealloc::sim::top::Sim;
use cachealloc::traffic::config::TrafficConfig;
use clap::Parser;
use toml::Table;

#[derive(Parser)]
#[command(version, about)]
struct CacheAllocArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override number of requestor ports")]
    num_ports: Option<usize>,
    #[arg(long, help = "Override same-line read coalescing")]
    coalescing: Option<bool>,
    #[arg(long, help = "Override backend latency in cycles")]
    backend_latency: Option<u64>,
    #[arg(long, help = "Enable log at level (0:warn, 1:info, 2:debug)")]
    log: Option<u64>,
    #[arg(long, help = "Override simulation timeout in cycles")]
    timeout: Option<u64>,
    #[arg(long, help = "Write the run summary as JSON to this path")]
    stats_json: Option<PathBuf>,
}

fn init_logging(level: u64) {
    let default = match level {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

pub fn main() -> anyhow::Result<()> {
    let argv = CacheAllocArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;

    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;
    let mut sim_config = SimConfig::try_from_section(config_table.get("sim"))?;
    let mut alloc_config = AllocatorConfig::try_from_section(config_table.get("allocator"))?;
    let mut backend_config = BackendConfig::try_from_section(config_table.get("backend"))?;
    let traffic_config = TrafficConfig::try_from_section(config_table.get("traffic"))?;

    // override toml configs with argv
    sim_config.log_level = argv.log.unwrap_or(sim_config.log_level);
    sim_config.timeout = argv.timeout.unwrap_or(sim_config.timeout);
    sim_config.stats_json = argv.stats_json.or(sim_config.stats_json);
    alloc_config.num_ports = argv.num_ports.unwrap_or(alloc_config.num_ports);
    alloc_config.enable_coalescing = argv.coalescing.unwrap_or(alloc_config.enable_coalescing);
    backend_config.latency = argv.backend_latency.unwrap_or(backend_config.latency);

    init_logging(sim_config.log_level);

    let stats_path = sim_config.stats_json.clone();
    let mut sim = Sim::new(sim_config, alloc_config, backend_config, traffic_config)?;
    let summary = sim.simulate()?;

    let json = serde_json::to_string_pretty(&summary).context("cannot serialize summary")?;
    match stats_path {
        Some(path) => fs::write(&path, json)
            .with_context(|| format!("failed to write stats to {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}
