use std::sync::Arc;
use std::time::{Duration, Instant};

use nexus_core::{CtrlStatus, ModelDatabase, ModelInstanceConfig, ModelSession};
use nexus_proto::ctrl::v1 as pb;
use nexus_proto::ctrl::v1::backend_ctrl_client::BackendCtrlClient;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{info, warn};

use crate::error::SchedError;

#[derive(Debug)]
struct BackendState {
    exec_cycle_us: f64,
    duty_cycle_us: f64,
    model_table: Vec<ModelInstanceConfig>,
    dirty_model_table: bool,
    last_alive: Instant,
}

/// Scheduler-side record of one backend, paired with its control stub.
/// Lives from registration until the liveness sweep evicts it.
#[derive(Debug)]
pub struct BackendClient {
    node_id: u32,
    server_address: String,
    rpc_address: String,
    gpu_device: String,
    gpu_available_memory: u64,
    timeout: Duration,
    model_db: Arc<ModelDatabase>,
    stub: BackendCtrlClient<Channel>,
    state: Mutex<BackendState>,
}

impl BackendClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: u32,
        server_address: String,
        rpc_address: String,
        gpu_device: String,
        gpu_available_memory: u64,
        timeout: Duration,
        model_db: Arc<ModelDatabase>,
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
            gpu_device,
            gpu_available_memory,
            timeout,
            model_db,
            stub: BackendCtrlClient::new(endpoint),
            state: Mutex::new(BackendState {
                exec_cycle_us: 0.0,
                duty_cycle_us: 0.0,
                model_table: Vec::new(),
                dirty_model_table: false,
                last_alive: Instant::now(),
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

    pub fn gpu_device(&self) -> &str {
        &self.gpu_device
    }

    pub fn gpu_available_memory(&self) -> u64 {
        self.gpu_available_memory
    }

    /// Derives the admissible plan for placing `session` with `workload`
    /// offered req/s on this backend, plus the resulting GPU occupancy.
    /// Unservable combinations come back with `batch = 0`.
    pub async fn prepare_load_model(
        &self,
        session: &ModelSession,
        workload: f64,
    ) -> (ModelInstanceConfig, f64) {
        let mut config = ModelInstanceConfig::unservable(session.clone());
        let Some(profile) = self
            .model_db
            .get_profile(&self.gpu_device, &session.profile_id())
        else {
            return (config, 0.0);
        };

        let sla_us = session.sla_us();
        let (max_batch, max_throughput) = profile.max_throughput(session.latency_sla);
        if max_batch == 0 {
            return (config, 0.0);
        }

        let st = self.state.lock().await;
        if st.exec_cycle_us > 0.0 {
            // Dynamic multi-model co-load is undecided; refuse and leave
            // co-location to the static loader.
            return (config, 0.0);
        }

        if workload == 0.0 || max_throughput <= workload {
            // Saturating workload: adopt the max-throughput plan.
            let (Ok(fwd), Ok(memory)) = (
                profile.forward_latency(max_batch),
                profile.memory_usage(max_batch),
            ) else {
                return (config, 0.0);
            };
            config.batch = max_batch;
            config.max_batch = max_batch;
            config.forward_latency_us = fwd as f64;
            config.memory_usage_bytes = memory;
            config.throughput = max_throughput;
            config.workload = max_throughput;
            (config, 1.0)
        } else {
            // Residue workload: largest batch whose minimum duty cycle still
            // fits the SLA.
            let preprocess = profile.preprocess_latency() as f64;
            let postprocess = profile.postprocess_latency() as f64;
            let mut batch = 1u32;
            while batch <= max_batch {
                let Ok(fwd) = profile.forward_latency(batch) else {
                    break;
                };
                // batch = ceil(workload * duty_cycle), so
                // duty_cycle >= (batch - 1) / workload
                let min_duty_cycle = (batch - 1) as f64 * 1e6 / workload;
                if min_duty_cycle + fwd as f64 + preprocess + postprocess > sla_us {
                    break;
                }
                batch += 1;
            }
            batch -= 1;
            if batch == 0 {
                // Even batch 1 misses the SLA at this workload.
                return (config, 0.0);
            }
            let (Ok(fwd), Ok(memory)) = (
                profile.forward_latency(batch),
                profile.memory_usage(batch),
            ) else {
                return (config, 0.0);
            };
            let fwd = fwd as f64;
            let duty_cycle = sla_us - fwd - preprocess - postprocess;
            config.batch = batch;
            config.max_batch = max_batch;
            config.forward_latency_us = fwd;
            config.memory_usage_bytes = memory;
            config.throughput = batch as f64 * 1e6 / duty_cycle;
            config.workload = workload;
            (config, fwd / duty_cycle)
        }
    }

    /// Commits a planned config to this backend's table. Only one
    /// dynamically planned model per backend is allowed.
    pub async fn load_model(&self, config: &ModelInstanceConfig) -> Result<(), SchedError> {
        let mut st = self.state.lock().await;
        if st.exec_cycle_us > 0.0 {
            return Err(SchedError::BackendNotIdle(self.node_id));
        }
        st.exec_cycle_us = config.forward_latency_us;
        st.duty_cycle_us = config.model_session.sla_us() - st.exec_cycle_us;
        st.model_table.push(config.clone());
        st.dirty_model_table = true;
        info!(
            node_id = self.node_id,
            session = %config.model_session,
            batch = config.batch,
            exec_cycle_us = st.exec_cycle_us,
            duty_cycle_us = st.duty_cycle_us,
            "backend loads model"
        );
        Ok(())
    }

    /// Static loader: adopts the workload file's declared batch, extends the
    /// additive duty cycle, and refreshes every config's throughput.
    pub async fn load_model_static(
        &self,
        session: &ModelSession,
        batch: u32,
    ) -> Result<(), SchedError> {
        let profile = self
            .model_db
            .get_profile(&self.gpu_device, &session.profile_id())
            .ok_or_else(|| SchedError::ProfileMissing {
                gpu_device: self.gpu_device.clone(),
                profile_id: session.profile_id(),
            })?;
        let max_batch = batch;
        let memory = profile.memory_usage(max_batch)?;
        let fwd = profile.forward_latency(batch)? as f64;

        let mut st = self.state.lock().await;
        st.model_table.push(ModelInstanceConfig {
            model_session: session.clone(),
            batch,
            max_batch,
            forward_latency_us: fwd,
            memory_usage_bytes: memory,
            throughput: 0.0,
            workload: 0.0,
        });
        st.exec_cycle_us += fwd;
        st.duty_cycle_us += fwd;
        let duty_cycle_us = st.duty_cycle_us;
        for cfg in &mut st.model_table {
            cfg.throughput = cfg.batch as f64 * 1e6 / duty_cycle_us;
            cfg.workload = cfg.throughput;
        }
        st.dirty_model_table = true;
        info!(
            node_id = self.node_id,
            session = %session,
            batch,
            exec_cycle_us = st.exec_cycle_us,
            duty_cycle_us = st.duty_cycle_us,
            "backend loads model from workload file"
        );
        Ok(())
    }

    /// Pushes the model table if dirty. A transport failure leaves the
    /// dirty flag set so the next sweep retries.
    pub async fn update_model_table(&self) -> CtrlStatus {
        let mut st = self.state.lock().await;
        if !st.dirty_model_table {
            return CtrlStatus::Ok;
        }
        let request = pb::ModelTableConfig {
            model_instance_config: st
                .model_table
                .iter()
                .map(pb::ModelInstanceConfig::from)
                .collect(),
        };
        let mut stub = self.stub.clone();
        match stub.update_model_table(request).await {
            Err(status) => {
                warn!(
                    node_id = self.node_id,
                    code = %status.code(),
                    "update_model_table rpc failed"
                );
                CtrlStatus::ServerUnreachable
            }
            Ok(reply) => {
                st.last_alive = Instant::now();
                let status = CtrlStatus::from(reply.into_inner().status());
                if status.is_ok() {
                    st.dirty_model_table = false;
                }
                status
            }
        }
    }

    /// A recent interaction short-circuits; otherwise issue CheckAlive.
    pub async fn is_alive(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.last_alive.elapsed() < self.timeout {
            return true;
        }
        let request = pb::CheckAliveRequest {
            node_type: pb::NodeType::BackendNode as i32,
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

    /// Load feedback is reserved; receipt only refreshes liveness.
    pub async fn update_stats(&self, _stats: &pb::BackendStats) {
        self.state.lock().await.last_alive = Instant::now();
    }

    pub async fn is_idle(&self) -> bool {
        self.state.lock().await.exec_cycle_us == 0.0
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty_model_table
    }

    pub async fn exec_cycle_us(&self) -> f64 {
        self.state.lock().await.exec_cycle_us
    }

    pub async fn duty_cycle_us(&self) -> f64 {
        self.state.lock().await.duty_cycle_us
    }

    pub async fn model_table(&self) -> Vec<ModelInstanceConfig> {
        self.state.lock().await.model_table.clone()
    }
}
