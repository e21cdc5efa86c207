mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nexus_core::ModelDatabase;
use nexus_proto::ctrl::v1::scheduler_ctrl_server::SchedulerCtrlServer;
use nexus_scheduler::{Scheduler, SchedulerCtrlSvc};
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::env::set_var("RUST_LOG", &cli.log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let model_db = Arc::new(
        ModelDatabase::init(&cli.model_root)
            .with_context(|| format!("failed to load model root {}", cli.model_root.display()))?,
    );
    tracing::info!(profiles = model_db.len(), "model database loaded");

    let scheduler = Arc::new(Scheduler::new(model_db, Duration::from_secs(cli.timeout_sec)));
    if let Some(workload) = &cli.workload {
        scheduler.load_workload_file(workload).await?;
    }

    tokio::spawn(scheduler.clone().run(Duration::from_secs(cli.tick_sec)));

    let addr = format!("0.0.0.0:{}", cli.port).parse()?;
    let svc = SchedulerCtrlSvc {
        scheduler,
        beacon_interval_sec: cli.timeout_sec as u32,
    };

    tracing::info!(%addr, "nexus scheduler listening");
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(nexus_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .map_err(|e| anyhow::anyhow!("reflection build failed: {e}"))?;

    tonic::transport::Server::builder()
        .add_service(SchedulerCtrlServer::new(svc))
        .add_service(reflection)
        .serve(addr)
        .await?;

    Ok(())
}
