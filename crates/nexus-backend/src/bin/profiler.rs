use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use nexus_core::{GpuDevice, ModelSession};
use nexus_runtime::{profile_kernel, IdentityKernel, ProfilerOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nexus-profiler", version, about = "Profiles a model kernel across batch sizes")]
struct Cli {
    /// GPU device id
    #[arg(long, default_value_t = 0)]
    gpu: u32,

    /// GPU device name recorded in the profile
    #[arg(long, default_value = "generic")]
    gpu_device: String,

    /// Framework name
    #[arg(long)]
    framework: String,

    /// Model name
    #[arg(long)]
    model: String,

    /// Model version
    #[arg(long, default_value_t = 1)]
    model_version: u32,

    /// Model root directory; profiles land under <model_root>/profiles/
    #[arg(long)]
    model_root: PathBuf,

    /// Directory of sample inputs fed to preprocess
    #[arg(long)]
    image_dir: PathBuf,

    /// Minimum batch size
    #[arg(long, default_value_t = 1)]
    min_batch: u32,

    /// Maximum batch size
    #[arg(long, default_value_t = 256)]
    max_batch: u32,

    /// Output file; defaults to the model-root profile path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Image height for resizable models
    #[arg(long, default_value_t = 0)]
    height: u32,

    /// Image width for resizable models
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Timed passes per batch size
    #[arg(long, default_value_t = 10)]
    repeat: u32,

    /// Identity kernel element count when no image size is given
    #[arg(long, default_value_t = 3 * 224 * 224)]
    kernel_elems: usize,

    /// Log level (RUST_LOG)
    #[arg(long, default_value = "info")]
    log: String,
}

const MAX_INPUTS: usize = 1000;

fn main() -> Result<()> {
    let cli = Cli::parse();

    std::env::set_var("RUST_LOG", &cli.log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    ensure!(
        (cli.height > 0) == (cli.width > 0),
        "height and width must be set together"
    );

    let session = ModelSession {
        framework: cli.framework.clone(),
        model_name: cli.model.clone(),
        version: cli.model_version,
        latency_sla: 0,
        image_height: (cli.height > 0).then_some(cli.height),
        image_width: (cli.width > 0).then_some(cli.width),
    };
    tracing::info!(profile = %session.profile_id(), "profiling model");

    let elems = if cli.height > 0 {
        (3 * cli.height * cli.width) as usize
    } else {
        cli.kernel_elems
    };
    let mut kernel = IdentityKernel::new(session.clone(), elems);

    let want = (cli.max_batch as usize).saturating_mul(cli.repeat as usize + 1);
    let raw_inputs = read_inputs(&cli.image_dir, want.min(MAX_INPUTS))?;
    tracing::info!(inputs = raw_inputs.len(), "profiling inputs loaded");

    let gpu = GpuDevice {
        gpu_id: cli.gpu,
        device_name: cli.gpu_device.clone(),
        total_memory: 0,
        free_memory: 0,
    };
    let opts = ProfilerOptions {
        min_batch: cli.min_batch,
        max_batch: cli.max_batch,
        repeat: cli.repeat,
    };
    let profile = profile_kernel(&mut kernel, &cli.gpu_device, &raw_inputs, &opts, &|| {
        gpu.free_memory
    })?;

    let path = cli.output.unwrap_or_else(|| {
        cli.model_root
            .join("profiles")
            .join(format!("{}.yaml", profile.profile_id.replace([':', '/'], "_")))
    });
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = serde_yaml::to_string(&profile)?;
    std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "profile written");
    Ok(())
}

fn read_inputs(dir: &Path, cap: usize) -> Result<Vec<Vec<u8>>> {
    let mut inputs = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        if inputs.len() >= cap {
            break;
        }
        let path = entry?.path();
        if path.is_file() {
            inputs.push(std::fs::read(&path)?);
        }
    }
    ensure!(!inputs.is_empty(), "no input files in {}", dir.display());
    Ok(inputs)
}
