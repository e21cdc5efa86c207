mod cli;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use nexus_backend::{BackendCtrlSvc, ModelRegistry};
use nexus_core::{DeviceManager, GpuDevice, ModelDatabase, TaskQueue};
use nexus_proto::ctrl::v1 as pb;
use nexus_proto::ctrl::v1::backend_ctrl_server::BackendCtrlServer;
use nexus_proto::ctrl::v1::scheduler_ctrl_client::SchedulerCtrlClient;
use nexus_runtime::{IdentityKernelFactory, PostprocessWorker};
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

    let devices = DeviceManager::new(vec![GpuDevice {
        gpu_id: cli.gpu,
        device_name: cli.gpu_device.clone(),
        total_memory: cli.gpu_memory,
        free_memory: cli.gpu_memory,
    }]);
    let gpu = devices
        .gpu(cli.gpu)
        .with_context(|| format!("unknown gpu id {}", cli.gpu))?
        .clone();

    let done_queue = Arc::new(TaskQueue::new());
    let registry = Arc::new(ModelRegistry::new(
        gpu,
        model_db,
        Arc::new(IdentityKernelFactory {
            elems: cli.kernel_elems,
        }),
        done_queue.clone(),
    ));

    let running = Arc::new(AtomicBool::new(true));
    for id in 0..cli.workers {
        let worker = PostprocessWorker {
            id,
            queue: done_queue.clone(),
            running: running.clone(),
        };
        tokio::spawn(worker.run());
    }

    let server_address = format!("{}:{}", cli.host, cli.port);
    let rpc_address = format!("http://{}:{}", cli.host, cli.port);

    let mut scheduler = SchedulerCtrlClient::connect(cli.scheduler_addr.clone())
        .await
        .with_context(|| format!("failed to reach scheduler at {}", cli.scheduler_addr))?;
    let reply = scheduler
        .register(pb::RegisterRequest {
            node_type: pb::NodeType::BackendNode as i32,
            node_id: cli.node_id,
            server_address,
            rpc_address,
            gpu_device_name: cli.gpu_device.clone(),
            gpu_available_memory: cli.gpu_memory,
        })
        .await
        .context("register rpc failed")?
        .into_inner();
    ensure!(
        reply.status() == pb::CtrlStatus::CtrlOk,
        "scheduler rejected registration: {:?}",
        reply.status()
    );
    tracing::info!(
        node_id = cli.node_id,
        beacon_sec = reply.beacon_interval_sec,
        "registered with scheduler"
    );

    let addr = format!("0.0.0.0:{}", cli.port).parse()?;
    let svc = BackendCtrlSvc { registry };

    tracing::info!(%addr, "nexus backend listening");
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(nexus_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .map_err(|e| anyhow::anyhow!("reflection build failed: {e}"))?;

    tonic::transport::Server::builder()
        .add_service(BackendCtrlServer::new(svc))
        .add_service(reflection)
        .serve(addr)
        .await?;

    Ok(())
}
