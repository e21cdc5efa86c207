use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nexus_core::ModelDatabase;
use nexus_proto::ctrl::v1 as pb;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend_client::BackendClient;
use crate::error::SchedError;
use crate::frontend_client::FrontendClient;
use crate::workload::{load_workload_file, WorkloadEntry};

/// Central scheduler: tracks the node pool, assigns declared workloads,
/// distributes model tables, and sweeps liveness.
pub struct Scheduler {
    model_db: Arc<ModelDatabase>,
    timeout: Duration,
    backends: Mutex<HashMap<u32, Arc<BackendClient>>>,
    frontends: Mutex<HashMap<u32, Arc<FrontendClient>>>,
    pending_workloads: Mutex<Vec<WorkloadEntry>>,
}

impl Scheduler {
    pub fn new(model_db: Arc<ModelDatabase>, timeout: Duration) -> Self {
        Self {
            model_db,
            timeout,
            backends: Mutex::new(HashMap::new()),
            frontends: Mutex::new(HashMap::new()),
            pending_workloads: Mutex::new(Vec::new()),
        }
    }

    pub async fn register_backend(
        &self,
        node_id: u32,
        server_address: String,
        rpc_address: String,
        gpu_device: String,
        gpu_available_memory: u64,
    ) -> Result<Arc<BackendClient>, SchedError> {
        let client = {
            let mut backends = self.backends.lock().await;
            if backends.contains_key(&node_id) {
                return Err(SchedError::NodeExists(node_id));
            }
            let client = Arc::new(BackendClient::new(
                node_id,
                server_address,
                rpc_address,
                gpu_device,
                gpu_available_memory,
                self.timeout,
                self.model_db.clone(),
            )?);
            backends.insert(node_id, client.clone());
            client
        };
        info!(node_id, gpu = %client.gpu_device(), "backend registered");
        self.assign_pending().await;
        Ok(client)
    }

    pub async fn register_frontend(
        &self,
        node_id: u32,
        server_address: String,
        rpc_address: String,
    ) -> Result<Arc<FrontendClient>, SchedError> {
        let mut frontends = self.frontends.lock().await;
        if frontends.contains_key(&node_id) {
            return Err(SchedError::NodeExists(node_id));
        }
        let client = Arc::new(FrontendClient::new(
            node_id,
            server_address,
            rpc_address,
            self.timeout,
        )?);
        frontends.insert(node_id, client.clone());
        info!(node_id, "frontend registered");
        Ok(client)
    }

    pub async fn backend(&self, node_id: u32) -> Option<Arc<BackendClient>> {
        self.backends.lock().await.get(&node_id).cloned()
    }

    pub async fn frontend(&self, node_id: u32) -> Option<Arc<FrontendClient>> {
        self.frontends.lock().await.get(&node_id).cloned()
    }

    pub async fn num_backends(&self) -> usize {
        self.backends.lock().await.len()
    }

    pub async fn subscribe_model(
        &self,
        node_id: u32,
        model_session_id: String,
    ) -> Result<(), SchedError> {
        let frontend = self
            .frontend(node_id)
            .await
            .ok_or(SchedError::NodeNotFound(node_id))?;
        frontend.subscribe_model(model_session_id).await;
        Ok(())
    }

    pub async fn update_stats(&self, stats: &pb::BackendStats) -> Result<(), SchedError> {
        let backend = self
            .backend(stats.node_id)
            .await
            .ok_or(SchedError::NodeNotFound(stats.node_id))?;
        backend.update_stats(stats).await;
        Ok(())
    }

    /// Queues the workload file's entries; assignment happens as backends
    /// register and on every sweep.
    pub async fn load_workload_file(&self, path: &Path) -> Result<()> {
        let entries = load_workload_file(path)?;
        info!(
            entries = entries.len(),
            file = %path.display(),
            "static workload loaded"
        );
        self.pending_workloads.lock().await.extend(entries);
        self.assign_pending().await;
        Ok(())
    }

    /// Places each pending workload entry, preferring idle backends and
    /// falling back to additive co-load on an occupied one.
    async fn assign_pending(&self) {
        let mut pending = self.pending_workloads.lock().await;
        if pending.is_empty() {
            return;
        }
        let backends: Vec<_> = self.backends.lock().await.values().cloned().collect();
        if backends.is_empty() {
            return;
        }

        let mut candidates = Vec::with_capacity(backends.len());
        for backend in &backends {
            if backend.is_idle().await {
                candidates.insert(0, backend.clone());
            } else {
                candidates.push(backend.clone());
            }
        }

        let mut remaining = Vec::new();
        'entries: for entry in pending.drain(..) {
            let session = entry.session();
            for backend in &candidates {
                match backend.load_model_static(&session, entry.batch).await {
                    Ok(()) => continue 'entries,
                    Err(SchedError::ProfileMissing { .. }) => continue,
                    Err(err) => {
                        warn!(session = %session, error = %err, "static load failed");
                        continue;
                    }
                }
            }
            warn!(session = %session, "no backend can serve workload entry yet");
            remaining.push(entry);
        }
        *pending = remaining;
    }

    /// One planner/liveness pass: evict dead nodes, retry dirty model
    /// tables, push refreshed pools to subscribed frontends.
    pub async fn tick(&self) {
        self.assign_pending().await;

        let backends: Vec<_> = self.backends.lock().await.values().cloned().collect();
        let mut tables_pushed = false;
        for backend in backends {
            if !backend.is_alive().await {
                warn!(node_id = backend.node_id(), "backend is dead, evicting");
                self.backends.lock().await.remove(&backend.node_id());
                continue;
            }
            if backend.is_dirty().await {
                let status = backend.update_model_table().await;
                if status.is_ok() {
                    tables_pushed = true;
                } else {
                    warn!(node_id = backend.node_id(), ?status, "model table push failed");
                }
            }
        }

        let frontends: Vec<_> = self.frontends.lock().await.values().cloned().collect();
        for frontend in frontends {
            if !frontend.is_alive().await {
                warn!(node_id = frontend.node_id(), "frontend is dead, evicting");
                self.frontends.lock().await.remove(&frontend.node_id());
            }
        }

        if tables_pushed {
            self.push_backend_pools().await;
        }
    }

    /// Recomputes the serving pool per session and pushes each pool to the
    /// frontends subscribed to that session.
    async fn push_backend_pools(&self) {
        let backends: Vec<_> = self.backends.lock().await.values().cloned().collect();
        let mut pools: HashMap<String, pb::BackendPoolUpdate> = HashMap::new();
        for backend in &backends {
            for config in backend.model_table().await {
                let session_id = config.model_session.session_id();
                let pool = pools
                    .entry(session_id.clone())
                    .or_insert_with(|| pb::BackendPoolUpdate {
                        model_session_id: session_id,
                        backends: Vec::new(),
                        throughput: 0.0,
                    });
                pool.backends.push(pb::BackendInfo {
                    node_id: backend.node_id(),
                    server_address: backend.server_address().to_string(),
                });
                pool.throughput += config.throughput;
            }
        }

        let frontends: Vec<_> = self.frontends.lock().await.values().cloned().collect();
        for frontend in frontends {
            for session_id in frontend.subscribed_models().await {
                let Some(pool) = pools.get(&session_id) else {
                    continue;
                };
                let status = frontend.update_backend_pool(pool.clone()).await;
                if !status.is_ok() {
                    warn!(
                        node_id = frontend.node_id(),
                        session = %session_id,
                        "backend pool push failed"
                    );
                }
            }
        }
    }

    /// Periodic sweep driver.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            self.tick().await;
        }
    }
}
