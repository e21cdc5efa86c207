use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nexus_core::{
    CtrlStatus, DropReason, ModelInstanceConfig, ModelProfile, Output, Stage, Task, TaskId,
    TaskInput, TaskQueue,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::batch::BatchTask;
use crate::batch::InputBuffer;
use crate::kernel::ModelKernel;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("task {0} is already being processed")]
    DuplicateTask(TaskId),
}

struct QueuedInput(TaskInput);

impl PartialEq for QueuedInput {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedInput {}

impl PartialOrd for QueuedInput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedInput {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ascending (deadline, task id, input index); ties stay deterministic.
        (self.0.deadline, self.0.tid, self.0.index).cmp(&(
            other.0.deadline,
            other.0.tid,
            other.0.index,
        ))
    }
}

struct ExecState {
    input_queue: BinaryHeap<Reverse<QueuedInput>>,
    processing_tasks: HashMap<TaskId, Arc<Task>>,
}

struct ExecResources {
    kernel: Box<dyn ModelKernel>,
    input: InputBuffer,
}

/// Batching executor for one loaded (backend, model) pair. Aggregates
/// pending inputs into forward passes in earliest-deadline-first order,
/// dropping inputs that cannot meet their SLA even in the best case.
pub struct ModelExecutor {
    session_id: String,
    max_batch: u32,
    plan_batch: AtomicU32,
    profile: Option<Arc<ModelProfile>>,
    state: Mutex<ExecState>,
    resources: Mutex<ExecResources>,
    batch_id: AtomicU64,
    done_queue: Arc<TaskQueue<Arc<Task>>>,
}

impl ModelExecutor {
    pub fn new(
        config: &ModelInstanceConfig,
        kernel: Box<dyn ModelKernel>,
        profile: Option<Arc<ModelProfile>>,
        done_queue: Arc<TaskQueue<Arc<Task>>>,
    ) -> Self {
        let max_batch = config.max_batch.max(1);
        let input = InputBuffer::new(max_batch as usize, kernel.input_slot_bytes());
        Self {
            session_id: config.model_session.session_id(),
            max_batch,
            plan_batch: AtomicU32::new(config.batch.clamp(1, max_batch)),
            profile,
            state: Mutex::new(ExecState {
                input_queue: BinaryHeap::new(),
                processing_tasks: HashMap::new(),
            }),
            resources: Mutex::new(ExecResources { kernel, input }),
            batch_id: AtomicU64::new(0),
            done_queue,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn max_batch(&self) -> u32 {
        self.max_batch
    }

    /// Adopts a replanned batch size without recreating the executor.
    pub fn set_plan_batch(&self, batch: u32) {
        self.plan_batch
            .store(batch.clamp(1, self.max_batch), AtomicOrdering::Relaxed);
    }

    pub fn pending_inputs(&self) -> usize {
        self.state.lock().unwrap().input_queue.len()
    }

    pub fn num_processing(&self) -> usize {
        self.state.lock().unwrap().processing_tasks.len()
    }

    /// Registers a task and queues each of its inputs for batching.
    pub fn add_task(&self, task: Arc<Task>) -> Result<(), ExecError> {
        let mut st = self.state.lock().unwrap();
        if st.processing_tasks.contains_key(&task.tid) {
            return Err(ExecError::DuplicateTask(task.tid));
        }
        for input in &task.inputs {
            st.input_queue.push(Reverse(QueuedInput(input.clone())));
        }
        st.processing_tasks.insert(task.tid, task);
        Ok(())
    }

    /// Forms one batch and runs one forward pass, attaching every per-item
    /// output before returning. An empty batch after filtering is a no-op;
    /// a forward error fails every task in the batch but leaves the
    /// executor live.
    pub fn execute(&self) {
        let batch_id = self.batch_id.fetch_add(1, AtomicOrdering::Relaxed);
        let mut res = self.resources.lock().unwrap();
        let buffer = std::mem::take(&mut res.input);
        let mut batch = BatchTask::new(batch_id, buffer);

        let formed_at = Instant::now();
        self.collect_batch_input(&mut batch);
        if batch.batch_size() == 0 {
            res.input = batch.reclaim_input();
            return;
        }

        // Output sizes are recomputed every pass; prefix-style models can
        // resize between invocations.
        let specs = res.kernel.output_specs();
        batch.allocate_outputs(&specs);

        let forward_start = Instant::now();
        match res.kernel.forward(&mut batch) {
            Ok(()) => {
                debug!(
                    session = %self.session_id,
                    batch_id,
                    batch_size = batch.batch_size(),
                    stage_us = (forward_start - formed_at).as_micros() as u64,
                    forward_us = forward_start.elapsed().as_micros() as u64,
                    "forward complete"
                );
                for i in 0..batch.entries().len() {
                    let outputs = batch.item_outputs(i);
                    let entry = &batch.entries()[i];
                    if entry.task.add_output(entry.input_index, Output::Real(outputs)) {
                        self.remove_task(&entry.task);
                    }
                }
            }
            Err(err) => {
                warn!(
                    session = %self.session_id,
                    batch_id,
                    batch_size = batch.batch_size(),
                    error = %err,
                    "forward failed, failing batch"
                );
                for entry in batch.entries() {
                    entry.task.set_status(CtrlStatus::ForwardFailure);
                    if entry
                        .task
                        .add_virtual_output(entry.input_index, DropReason::TaskFailed)
                    {
                        self.remove_task(&entry.task);
                    }
                }
            }
        }
        res.input = batch.reclaim_input();
    }

    fn collect_batch_input(&self, batch: &mut BatchTask) {
        let mut completed = Vec::new();
        {
            let mut st = self.state.lock().unwrap();
            let planned = self.plan_batch.load(AtomicOrdering::Relaxed);
            let batch_size = (st.input_queue.len() as u32).min(planned);
            if batch_size == 0 {
                return;
            }
            // Predicted wall-clock finish of a batch of this size started
            // now; inputs due earlier cannot be served in time.
            let finish = self.profile.as_ref().and_then(|p| {
                p.forward_latency(batch_size)
                    .ok()
                    .map(|lat| Instant::now() + Duration::from_micros(lat as u64))
            });
            while batch.batch_size() < batch_size {
                let Some(Reverse(QueuedInput(input))) = st.input_queue.pop() else {
                    break;
                };
                let Some(task) = st.processing_tasks.get(&input.tid).cloned() else {
                    continue;
                };
                task.record("exec");
                let dropped = if !task.status().is_ok() {
                    Some(DropReason::TaskFailed)
                } else if finish.is_some_and(|f| input.deadline < f) {
                    Some(DropReason::DeadlineExceeded)
                } else {
                    None
                };
                match dropped {
                    Some(reason) => {
                        if task.add_virtual_output(input.index, reason) {
                            completed.push(task);
                        }
                    }
                    None => batch.append_input(&input, task),
                }
            }
        }
        for task in completed {
            self.remove_task(&task);
        }
    }

    /// Moves a completed task off the processing table into the shared
    /// postprocess queue. Idempotent.
    pub fn remove_task(&self, task: &Arc<Task>) {
        {
            let mut st = self.state.lock().unwrap();
            if st.processing_tasks.remove(&task.tid).is_none() {
                return;
            }
        }
        task.set_stage(Stage::Postprocess);
        self.done_queue.push(task.clone());
    }
}
