use std::collections::HashSet;
use std::time::{Duration, Instant};

use nexus_core::CtrlStatus;
use nexus_proto::ctrl::v1 as pb;
use nexus_proto::ctrl::v1::frontend_ctrl_client::FrontendCtrlClient;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use crate::error::SchedError;

#[derive(Debug)]
struct FrontendState {
    last_alive: Instant,
    subscribed: HashSet<String>,
}

/// Scheduler-side record of one frontend. The subscription set decides
/// which backend-pool updates get pushed to it.
pub struct FrontendClient {
    node_id: u32,
    server_address: String,
    rpc_address: String,
    timeout: Duration,
    stub: FrontendCtrlClient<Channel>,
    state: Mutex<FrontendState>,
}

impl FrontendClient {
    pub fn new(
        node_id: u32,
        server_address: String,
        rpc_address: String,
        timeout: Duration,
    ) -> Result<Self, SchedError> {
        let endpoint = Endpoint::from_shared(rpc_address.clone())
            .map_err(|source| SchedError::InvalidRpcAddress {
                addr: rpc_address.clone(),
                source,
            })?
            .connect_lazy();
        Ok(Self {
            node_id,
            server_address,
            rpc_address,
            timeout,
            stub: FrontendCtrlClient::new(endpoint),
            state: Mutex::new(FrontendState {
                last_alive: Instant::now(),
                subscribed: HashSet::new(),
            }),
        })
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn rpc_address(&self) -> &str {
        &self.rpc_address
    }

    pub async fn subscribe_model(&self, model_session_id: String) {
        debug!(node_id = self.node_id, session = %model_session_id, "frontend subscribes");
        self.state.lock().await.subscribed.insert(model_session_id);
    }

    pub async fn subscribed_models(&self) -> HashSet<String> {
        self.state.lock().await.subscribed.clone()
    }

    pub async fn is_alive(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.last_alive.elapsed() < self.timeout {
            return true;
        }
        let request = pb::CheckAliveRequest {
            node_type: pb::NodeType::FrontendNode as i32,
            node_id: self.node_id,
        };
        let mut stub = self.stub.clone();
        match stub.check_alive(request).await {
            Err(status) => {
                warn!(node_id = self.node_id, code = %status.code(), "check_alive rpc failed");
                false
            }
            Ok(_) => {
                st.last_alive = Instant::now();
                true
            }
        }
    }

    /// Pushes the serving pool for one subscribed session.
    pub async fn update_backend_pool(&self, update: pb::BackendPoolUpdate) -> CtrlStatus {
        let mut stub = self.stub.clone();
        match stub.update_backend_pool(update).await {
            Err(status) => {
                warn!(
                    node_id = self.node_id,
                    code = %status.code(),
                    "update_backend_pool rpc failed"
                );
                CtrlStatus::ServerUnreachable
            }
            Ok(reply) => {
                self.state.lock().await.last_alive = Instant::now();
                CtrlStatus::from(reply.into_inner().status())
            }
        }
    }
}
