use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nexus_core::{CtrlStatus, ForwardEntry, ModelDatabase, ModelProfile, ModelSession};
use nexus_proto::ctrl::v1 as pb;
use nexus_proto::ctrl::v1::backend_ctrl_server::{BackendCtrl, BackendCtrlServer};
use nexus_proto::ctrl::v1::frontend_ctrl_server::{FrontendCtrl, FrontendCtrlServer};
use nexus_scheduler::{BackendClient, SchedError, Scheduler};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

const GPU: &str = "TITAN X (Pascal)";

#[derive(Default)]
struct MockBackendState {
    update_calls: AtomicUsize,
    check_calls: AtomicUsize,
    tables: Mutex<Vec<pb::ModelTableConfig>>,
}

struct MockBackendSvc(Arc<MockBackendState>);

fn ok_reply() -> Response<pb::RpcReply> {
    Response::new(pb::RpcReply {
        status: pb::CtrlStatus::CtrlOk as i32,
    })
}

#[tonic::async_trait]
impl BackendCtrl for MockBackendSvc {
    async fn update_model_table(
        &self,
        req: Request<pb::ModelTableConfig>,
    ) -> Result<Response<pb::RpcReply>, Status> {
        self.0.update_calls.fetch_add(1, Ordering::SeqCst);
        self.0.tables.lock().unwrap().push(req.into_inner());
        Ok(ok_reply())
    }

    async fn check_alive(
        &self,
        _req: Request<pb::CheckAliveRequest>,
    ) -> Result<Response<pb::RpcReply>, Status> {
        self.0.check_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ok_reply())
    }
}

#[derive(Default)]
struct MockFrontendState {
    pool_updates: Mutex<Vec<pb::BackendPoolUpdate>>,
}

struct MockFrontendSvc(Arc<MockFrontendState>);

#[tonic::async_trait]
impl FrontendCtrl for MockFrontendSvc {
    async fn check_alive(
        &self,
        _req: Request<pb::CheckAliveRequest>,
    ) -> Result<Response<pb::RpcReply>, Status> {
        Ok(ok_reply())
    }

    async fn update_backend_pool(
        &self,
        req: Request<pb::BackendPoolUpdate>,
    ) -> Result<Response<pb::RpcReply>, Status> {
        self.0.pool_updates.lock().unwrap().push(req.into_inner());
        Ok(ok_reply())
    }
}

async fn serve_mock_backend(state: Arc<MockBackendState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(BackendCtrlServer::new(MockBackendSvc(state)))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

async fn serve_mock_frontend(state: Arc<MockFrontendState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(FrontendCtrlServer::new(MockFrontendSvc(state)))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

fn resnet_profile() -> ModelProfile {
    ModelProfile {
        profile_id: "tensorflow:resnet50:1".to_string(),
        gpu_device: GPU.to_string(),
        forward: (1..=8)
            .map(|batch| ForwardEntry {
                batch,
                latency_us: 4000.0 + batch as f32 * 2000.0,
                std_us: 0.0,
                memory_bytes: batch as u64 * (256 << 20),
            })
            .collect(),
        preprocess_us: 1000.0,
        postprocess_us: 1000.0,
    }
}

fn session() -> ModelSession {
    ModelSession {
        framework: "tensorflow".to_string(),
        model_name: "resnet50".to_string(),
        version: 1,
        latency_sla: 50,
        image_height: None,
        image_width: None,
    }
}

fn model_db() -> Arc<ModelDatabase> {
    let mut db = ModelDatabase::empty();
    db.insert(resnet_profile());
    Arc::new(db)
}

fn client(rpc_address: String, timeout: Duration) -> BackendClient {
    BackendClient::new(
        1,
        "127.0.0.1:7001".to_string(),
        rpc_address,
        GPU.to_string(),
        12 << 30,
        timeout,
        model_db(),
    )
    .unwrap()
}

#[tokio::test]
async fn dirty_flag_cleared_only_after_ok_reply() {
    let state = Arc::new(MockBackendState::default());
    let addr = serve_mock_backend(state.clone()).await;
    let client = client(format!("http://{addr}"), Duration::from_secs(10));

    assert!(!client.is_dirty().await);
    client.load_model_static(&session(), 4).await.unwrap();
    assert!(client.is_dirty().await);

    assert_eq!(client.update_model_table().await, CtrlStatus::Ok);
    assert!(!client.is_dirty().await);
    assert_eq!(state.update_calls.load(Ordering::SeqCst), 1);
    let tables = state.tables.lock().unwrap();
    assert_eq!(tables[0].model_instance_config.len(), 1);
    assert_eq!(tables[0].model_instance_config[0].batch, 4);
    drop(tables);

    // No intervening change: the second push is a no-op.
    assert_eq!(client.update_model_table().await, CtrlStatus::Ok);
    assert_eq!(state.update_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_failure_leaves_dirty_set() {
    let client = client("http://127.0.0.1:1".to_string(), Duration::from_secs(10));
    client.load_model_static(&session(), 4).await.unwrap();

    assert_eq!(
        client.update_model_table().await,
        CtrlStatus::ServerUnreachable
    );
    assert!(client.is_dirty().await);
}

#[tokio::test]
async fn recent_interaction_short_circuits_liveness() {
    let state = Arc::new(MockBackendState::default());
    let addr = serve_mock_backend(state.clone()).await;
    // Registered just now, timeout 10s: no RPC should go out.
    let client = client(format!("http://{addr}"), Duration::from_secs(10));

    assert!(client.is_alive().await);
    assert_eq!(state.check_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_liveness_issues_check_alive() {
    let state = Arc::new(MockBackendState::default());
    let addr = serve_mock_backend(state.clone()).await;
    let client = client(format!("http://{addr}"), Duration::ZERO);

    assert!(client.is_alive().await);
    assert_eq!(state.check_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_node_is_dead() {
    let client = client("http://127.0.0.1:1".to_string(), Duration::ZERO);
    assert!(!client.is_alive().await);
}

#[tokio::test]
async fn register_load_and_push_pool_end_to_end() {
    let backend_state = Arc::new(MockBackendState::default());
    let backend_addr = serve_mock_backend(backend_state.clone()).await;
    let frontend_state = Arc::new(MockFrontendState::default());
    let frontend_addr = serve_mock_frontend(frontend_state.clone()).await;

    let scheduler = Arc::new(Scheduler::new(model_db(), Duration::from_secs(10)));
    scheduler
        .register_backend(
            1,
            "127.0.0.1:7001".to_string(),
            format!("http://{backend_addr}"),
            GPU.to_string(),
            12 << 30,
        )
        .await
        .unwrap();
    scheduler
        .register_frontend(
            2,
            "127.0.0.1:9001".to_string(),
            format!("http://{frontend_addr}"),
        )
        .await
        .unwrap();
    scheduler
        .subscribe_model(2, session().session_id())
        .await
        .unwrap();

    let workload = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        workload.path(),
        "- framework: tensorflow\n  model_name: resnet50\n  version: 1\n  latency_sla: 50\n  batch: 8\n",
    )
    .unwrap();
    scheduler.load_workload_file(workload.path()).await.unwrap();

    scheduler.tick().await;

    assert_eq!(backend_state.update_calls.load(Ordering::SeqCst), 1);
    let tables = backend_state.tables.lock().unwrap();
    assert_eq!(tables[0].model_instance_config[0].batch, 8);
    drop(tables);

    let updates = frontend_state.pool_updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].model_session_id, session().session_id());
    assert_eq!(updates[0].backends.len(), 1);
    assert_eq!(updates[0].backends[0].node_id, 1);

    // Duplicate node ids are rejected.
    let err = scheduler
        .register_backend(
            1,
            "127.0.0.1:7002".to_string(),
            format!("http://{backend_addr}"),
            GPU.to_string(),
            12 << 30,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::NodeExists(1)));
}

#[tokio::test]
async fn dead_backend_is_evicted_on_tick() {
    // Zero timeout forces a CheckAlive RPC, which has nowhere to go.
    let scheduler = Scheduler::new(model_db(), Duration::ZERO);
    scheduler
        .register_backend(
            1,
            "127.0.0.1:7001".to_string(),
            "http://127.0.0.1:1".to_string(),
            GPU.to_string(),
            12 << 30,
        )
        .await
        .unwrap();
    assert_eq!(scheduler.num_backends().await, 1);

    scheduler.tick().await;
    assert_eq!(scheduler.num_backends().await, 0);
}

#[tokio::test]
async fn update_stats_requires_registration() {
    let scheduler = Scheduler::new(model_db(), Duration::from_secs(10));
    let stats = pb::BackendStats {
        node_id: 9,
        model_rps: vec![],
    };
    assert!(matches!(
        scheduler.update_stats(&stats).await,
        Err(SchedError::NodeNotFound(9))
    ));
}
