use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::CtrlStatus;
use crate::tensor::Tensor;

pub type TaskId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Preprocess,
    Execute,
    Postprocess,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    DeadlineExceeded,
    TaskFailed,
}

/// Every input of a task yields exactly one output. A virtual output stands
/// in for an input that was dropped, so completion accounting stays exact.
#[derive(Clone, Debug)]
pub enum Output {
    /// One tensor per model output array.
    Real(Vec<Tensor>),
    Virtual(DropReason),
}

impl Output {
    pub fn is_virtual(&self) -> bool {
        matches!(self, Output::Virtual(_))
    }
}

/// One preprocessed input of a task, queued for batching. Carries its own
/// copy of the deadline so the executor can order inputs without touching
/// task state.
#[derive(Clone, Debug)]
pub struct TaskInput {
    pub tid: TaskId,
    pub index: u32,
    pub deadline: Instant,
    pub array: Tensor,
}

#[derive(Debug)]
pub struct TaskReply {
    pub tid: TaskId,
    pub status: CtrlStatus,
    pub outputs: Vec<Output>,
    pub latency_us: u64,
}

#[derive(Debug)]
struct TaskState {
    status: CtrlStatus,
    stage: Stage,
    outputs: Vec<Option<Output>>,
    filled: usize,
    marks: Vec<(&'static str, Instant)>,
    resp_tx: Option<oneshot::Sender<TaskReply>>,
}

/// A single request in flight on a backend. Owned by the executor's
/// processing table until all outputs are attached, then handed to the
/// postprocess queue by transfer.
#[derive(Debug)]
pub struct Task {
    pub tid: TaskId,
    pub deadline: Instant,
    pub inputs: Vec<TaskInput>,
    created_at: Instant,
    state: Mutex<TaskState>,
}

impl Task {
    pub fn new(
        tid: TaskId,
        deadline: Instant,
        arrays: Vec<Tensor>,
    ) -> (Self, oneshot::Receiver<TaskReply>) {
        let (tx, rx) = oneshot::channel();
        let inputs = arrays
            .into_iter()
            .enumerate()
            .map(|(index, array)| TaskInput {
                tid,
                index: index as u32,
                deadline,
                array,
            })
            .collect::<Vec<_>>();
        let task = Self {
            tid,
            deadline,
            created_at: Instant::now(),
            state: Mutex::new(TaskState {
                status: CtrlStatus::Ok,
                stage: Stage::Preprocess,
                outputs: (0..inputs.len()).map(|_| None).collect(),
                filled: 0,
                marks: Vec::new(),
                resp_tx: Some(tx),
            }),
            inputs,
        };
        (task, rx)
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn status(&self) -> CtrlStatus {
        self.state.lock().unwrap().status
    }

    pub fn set_status(&self, status: CtrlStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn stage(&self) -> Stage {
        self.state.lock().unwrap().stage
    }

    pub fn set_stage(&self, stage: Stage) {
        let mut st = self.state.lock().unwrap();
        st.stage = stage;
    }

    /// Records a stage-transition timestamp.
    pub fn record(&self, label: &'static str) {
        let mut st = self.state.lock().unwrap();
        st.marks.push((label, Instant::now()));
    }

    pub fn marks(&self) -> Vec<(&'static str, Instant)> {
        self.state.lock().unwrap().marks.clone()
    }

    /// Attaches the output for one input index. Returns true when this was
    /// the last missing output. A second attach at the same index is
    /// ignored.
    pub fn add_output(&self, index: u32, output: Output) -> bool {
        let mut st = self.state.lock().unwrap();
        let Some(slot) = st.outputs.get_mut(index as usize) else {
            return st.filled == st.outputs.len();
        };
        if slot.is_none() {
            *slot = Some(output);
            st.filled += 1;
        }
        st.filled == st.outputs.len()
    }

    pub fn add_virtual_output(&self, index: u32, reason: DropReason) -> bool {
        self.add_output(index, Output::Virtual(reason))
    }

    pub fn is_complete(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.filled == st.outputs.len()
    }

    /// Builds the reply and sends it to the submitter. Later calls are
    /// no-ops; a dropped receiver is fine.
    pub fn finish(&self) {
        let mut st = self.state.lock().unwrap();
        let Some(tx) = st.resp_tx.take() else {
            return;
        };
        st.stage = Stage::Done;
        let outputs = st
            .outputs
            .iter_mut()
            .map(|slot| slot.take().unwrap_or(Output::Virtual(DropReason::TaskFailed)))
            .collect();
        let reply = TaskReply {
            tid: self.tid,
            status: st.status,
            outputs,
            latency_us: self.created_at.elapsed().as_micros() as u64,
        };
        let _ = tx.send(reply);
    }
}
