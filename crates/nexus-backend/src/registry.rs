use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use nexus_core::{GpuDevice, ModelDatabase, ModelInstanceConfig, Stage, Task, TaskQueue, TaskReply, Tensor};
use nexus_runtime::{ExecError, KernelFactory, ModelExecutor};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("model {0} is not loaded")]
    ModelNotFound(String),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

struct ModelHandle {
    executor: Arc<ModelExecutor>,
    config: ModelInstanceConfig,
    duty_cycle: Duration,
    driver: JoinHandle<()>,
}

/// The backend's loaded-model table: one executor plus duty-cycle driver
/// per instance the scheduler planned onto this node.
pub struct ModelRegistry {
    gpu: GpuDevice,
    model_db: Arc<ModelDatabase>,
    factory: Arc<dyn KernelFactory>,
    done_queue: Arc<TaskQueue<Arc<Task>>>,
    models: Mutex<HashMap<String, ModelHandle>>,
    next_tid: AtomicU64,
}

impl ModelRegistry {
    pub fn new(
        gpu: GpuDevice,
        model_db: Arc<ModelDatabase>,
        factory: Arc<dyn KernelFactory>,
        done_queue: Arc<TaskQueue<Arc<Task>>>,
    ) -> Self {
        Self {
            gpu,
            model_db,
            factory,
            done_queue,
            models: Mutex::new(HashMap::new()),
            next_tid: AtomicU64::new(0),
        }
    }

    pub fn gpu(&self) -> &GpuDevice {
        &self.gpu
    }

    pub fn done_queue(&self) -> Arc<TaskQueue<Arc<Task>>> {
        self.done_queue.clone()
    }

    /// Applies a pushed model table: spin up executors for new configs,
    /// retarget changed ones, drop executors whose session left the table.
    pub fn apply_model_table(&self, table: Vec<ModelInstanceConfig>) -> Result<()> {
        let exec_cycle_us: f64 = table.iter().map(|c| c.forward_latency_us).sum();
        let mut models = self.models.lock().unwrap();
        let mut keep = HashSet::new();

        for config in table {
            if !config.is_servable() {
                warn!(session = %config.model_session, "skipping unservable config");
                continue;
            }
            let session_id = config.model_session.session_id();
            keep.insert(session_id.clone());
            let duty_cycle_us = (config.model_session.sla_us() - exec_cycle_us).max(1000.0);
            let duty_cycle = Duration::from_micros(duty_cycle_us as u64);

            if let Some(handle) = models.get_mut(&session_id) {
                if handle.config == config && handle.duty_cycle == duty_cycle {
                    continue;
                }
                handle.executor.set_plan_batch(config.batch);
                handle.driver.abort();
                handle.driver = spawn_driver(handle.executor.clone(), duty_cycle);
                handle.config = config;
                handle.duty_cycle = duty_cycle;
                info!(session = %session_id, "model replanned");
                continue;
            }

            let profile = self
                .model_db
                .get_profile(&self.gpu.device_name, &config.model_session.profile_id());
            let kernel = self.factory.create(&config.model_session, &self.gpu)?;
            let executor = Arc::new(ModelExecutor::new(
                &config,
                kernel,
                profile,
                self.done_queue.clone(),
            ));
            let driver = spawn_driver(executor.clone(), duty_cycle);
            info!(
                session = %config.model_session,
                batch = config.batch,
                duty_cycle_us,
                "model loaded"
            );
            models.insert(
                session_id,
                ModelHandle {
                    executor,
                    config,
                    duty_cycle,
                    driver,
                },
            );
        }

        models.retain(|session_id, handle| {
            if keep.contains(session_id) {
                return true;
            }
            info!(session = %session_id, "model unloaded");
            handle.driver.abort();
            false
        });
        Ok(())
    }

    /// Ingress for the data plane: builds a task and hands it to the
    /// session's executor. The reply arrives once postprocess finishes.
    pub fn submit(
        &self,
        model_session_id: &str,
        arrays: Vec<Tensor>,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<TaskReply>, SubmitError> {
        let models = self.models.lock().unwrap();
        let handle = models
            .get(model_session_id)
            .ok_or_else(|| SubmitError::ModelNotFound(model_session_id.to_string()))?;
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let (task, rx) = Task::new(tid, deadline, arrays);
        task.record("preprocess");
        task.set_stage(Stage::Execute);
        handle.executor.add_task(Arc::new(task))?;
        Ok(rx)
    }

    pub fn executor(&self, model_session_id: &str) -> Option<Arc<ModelExecutor>> {
        self.models
            .lock()
            .unwrap()
            .get(model_session_id)
            .map(|h| h.executor.clone())
    }

    pub fn loaded_sessions(&self) -> Vec<String> {
        self.models.lock().unwrap().keys().cloned().collect()
    }

    pub fn num_models(&self) -> usize {
        self.models.lock().unwrap().len()
    }
}

fn spawn_driver(executor: Arc<ModelExecutor>, duty_cycle: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(duty_cycle.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            tokio::task::block_in_place(|| executor.execute());
        }
    })
}
