use std::path::PathBuf;

use clap::Parser;
use dtpc_core::Eid;
use dtpc_node::config::EngineConfig;
use dtpc_node::profile::Profile;
use dtpc_sim::scenarios::{run_transfer, LossScenario, TransferParams, SENDER_NODE};
use tracing::error;

/// Runs a DTPC transfer between two engines over a lossy virtual link.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of items to send
    #[arg(long, default_value_t = 100)]
    items: usize,
    /// Bytes per item, including the 8-byte index
    #[arg(long, default_value_t = 64)]
    item_len: usize,
    #[arg(long, default_value_t = 10)]
    loss_percent: u8,
    #[arg(long, default_value_t = 10)]
    reorder_percent: u8,
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Retransmissions per ADU; 0 disables the transport service
    #[arg(long, default_value_t = 3)]
    max_rtx: u32,
    /// ADU payload size that triggers a close
    #[arg(long, default_value_t = 1024)]
    size_limit: u64,
    /// Seconds an ADU stays open; 0 disables aggregation
    #[arg(long, default_value_t = 5)]
    time_limit: u64,
    /// ADU lifespan in seconds
    #[arg(long, default_value_t = 600)]
    lifespan: u64,
    /// Virtual seconds to run before giving up
    #[arg(long, default_value_t = 3_600)]
    max_seconds: u64,
    /// TOML engine config; its first profile replaces the flag-built one
    #[arg(long, short, env = "DTPC_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn profile(&self) -> Profile {
        Profile {
            id: 1,
            max_rtx: self.max_rtx,
            aggr_size_limit: self.size_limit,
            aggr_time_limit: self.time_limit,
            lifespan: self.lifespan,
            class_of_service: 1,
            ancillary: Default::default(),
            custody: Default::default(),
            srr_flags: Default::default(),
            report_to: Eid::ipn(SENDER_NODE, 0),
        }
    }
}

fn main() {
    let filter = std::env::var("DTPC_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!("config load failed: {err}");
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };
    let profile = config
        .profiles
        .first()
        .cloned()
        .unwrap_or_else(|| cli.profile());

    let params = TransferParams {
        items: cli.items,
        item_len: cli.item_len,
        link: LossScenario {
            loss_percent: cli.loss_percent,
            reorder_percent: cli.reorder_percent,
            seed: cli.seed,
        },
        max_seconds: cli.max_seconds,
        profile,
        config,
    };

    let report = match run_transfer(&params) {
        Ok(report) => report,
        Err(err) => {
            error!("simulation failed: {err}");
            std::process::exit(1);
        }
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!("report encoding failed: {err}");
            std::process::exit(1);
        }
    }
}
