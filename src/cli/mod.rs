//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "starcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "check-config", about = "Validate a configuration file")]
    CheckConfig(CheckConfigArgs),

    #[command(name = "simulate", about = "Run a concurrent workload against in-memory stores")]
    Simulate(SimulateArgs),
}

#[derive(Parser, Debug)]
pub struct CheckConfigArgs {
    #[arg(help = "Path to the TOML configuration file")]
    pub path: PathBuf,
}

#[derive(Parser, Debug)]
pub struct SimulateArgs {
    #[arg(short, long, help = "Path to the TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 8, help = "Number of simulated players")]
    pub players: usize,

    #[arg(short, long, default_value_t = 20, help = "Rounds played by each player")]
    pub rounds: usize,

    #[arg(long, help = "Override the flush interval of every cache (ms)")]
    pub interval_ms: Option<u64>,

    #[arg(long, help = "Print metrics in Prometheus format")]
    pub prometheus: bool,
}

mod check;
mod simulate;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing(if cli.verbose {
        "starcache=debug"
    } else {
        "starcache=info"
    });

    match &cli.command {
        Commands::CheckConfig(args) => check::execute(args),
        Commands::Simulate(args) => simulate::execute(args).await,
    }
}
