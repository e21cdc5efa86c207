use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "nexus-backend", version, about = "Nexus backend GPU worker daemon")]
pub struct Cli {
    /// Control RPC port
    #[arg(long, default_value_t = 8001)]
    pub port: u16,

    /// Node id, unique across the cluster
    #[arg(long)]
    pub node_id: u32,

    /// Scheduler control RPC address
    #[arg(long, default_value = "http://127.0.0.1:10001")]
    pub scheduler_addr: String,

    /// Address other nodes reach this server at
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Model root directory holding the profile database
    #[arg(long)]
    pub model_root: PathBuf,

    /// GPU device id
    #[arg(long, default_value_t = 0)]
    pub gpu: u32,

    /// GPU device name used for profile lookups
    #[arg(long, default_value = "generic")]
    pub gpu_device: String,

    /// GPU memory reported to the scheduler, in bytes
    #[arg(long, default_value_t = 8 << 30)]
    pub gpu_memory: u64,

    /// Postprocess worker count
    #[arg(long, default_value_t = 4)]
    pub workers: u32,

    /// Identity kernel element count (stand-in for framework kernels)
    #[arg(long, default_value_t = 3 * 224 * 224)]
    pub kernel_elems: usize,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log: String,
}
