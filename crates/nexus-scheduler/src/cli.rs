use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "nexus-scheduler", version, about = "Nexus central scheduler daemon")]
pub struct Cli {
    /// Control RPC port
    #[arg(long, default_value_t = 10001)]
    pub port: u16,

    /// Model root directory holding the profile database
    #[arg(long)]
    pub model_root: PathBuf,

    /// Static workload config file
    #[arg(long)]
    pub workload: Option<PathBuf>,

    /// Liveness timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout_sec: u64,

    /// Planner/liveness sweep interval in seconds
    #[arg(long, default_value_t = 2)]
    pub tick_sec: u64,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,
}
