use std::sync::Arc;

use bytes::Bytes;
use nexus_core::{Task, TaskInput, Tensor};

use crate::kernel::OutputSpec;

/// Staging buffer for batched inputs. Allocated once per executor at
/// `max_batch` capacity and reused across batches; ownership moves into the
/// current [`BatchTask`] for the duration of one forward pass.
#[derive(Default)]
pub struct InputBuffer {
    data: Vec<u8>,
    slot_bytes: usize,
    slots: usize,
}

impl InputBuffer {
    pub fn new(slots: usize, slot_bytes: usize) -> Self {
        Self {
            data: vec![0; slots * slot_bytes],
            slot_bytes,
            slots,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    fn stage(&mut self, slot: usize, bytes: &[u8]) {
        let start = slot * self.slot_bytes;
        let dst = &mut self.data[start..start + self.slot_bytes];
        let n = bytes.len().min(self.slot_bytes);
        dst[..n].copy_from_slice(&bytes[..n]);
        dst[n..].fill(0);
    }

    fn slot(&self, slot: usize) -> &[u8] {
        let start = slot * self.slot_bytes;
        &self.data[start..start + self.slot_bytes]
    }

    fn staged(&self, n: usize) -> &[u8] {
        &self.data[..n * self.slot_bytes]
    }
}

pub struct BatchEntry {
    pub task: Arc<Task>,
    pub input_index: u32,
}

/// One output array covering the whole batch, filled by the kernel forward.
pub struct OutputArray {
    pub spec: OutputSpec,
    pub data: Vec<u8>,
}

impl OutputArray {
    /// Per-item slice as its own tensor.
    pub fn item(&self, i: usize) -> Tensor {
        let stride = self.spec.item_bytes();
        let start = i * stride;
        Tensor::from_bytes(
            self.spec.dtype,
            self.spec.shape.clone(),
            Bytes::copy_from_slice(&self.data[start..start + stride]),
        )
    }
}

/// Transient aggregation for one forward pass.
pub struct BatchTask {
    batch_id: u64,
    input: InputBuffer,
    entries: Vec<BatchEntry>,
    outputs: Vec<OutputArray>,
}

impl BatchTask {
    pub fn new(batch_id: u64, input: InputBuffer) -> Self {
        Self {
            batch_id,
            input,
            entries: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn batch_size(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn max_batch(&self) -> u32 {
        self.input.slots() as u32
    }

    /// Stages one input into the next slot. Full batches ignore the append.
    pub fn append_input(&mut self, input: &TaskInput, task: Arc<Task>) {
        if self.entries.len() >= self.input.slots() {
            return;
        }
        self.input.stage(self.entries.len(), &input.array.data);
        self.entries.push(BatchEntry {
            task,
            input_index: input.index,
        });
    }

    /// Sizes output arrays for the current batch from the kernel's
    /// per-item output shapes.
    pub fn allocate_outputs(&mut self, specs: &[OutputSpec]) {
        let n = self.entries.len();
        self.outputs = specs
            .iter()
            .map(|spec| OutputArray {
                data: vec![0; spec.item_bytes() * n],
                spec: spec.clone(),
            })
            .collect();
    }

    /// Contiguous staged input covering `batch_size` slots.
    pub fn inputs(&self) -> &[u8] {
        self.input.staged(self.entries.len())
    }

    pub fn input_slot(&self, i: usize) -> &[u8] {
        self.input.slot(i)
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn outputs(&self) -> &[OutputArray] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut [OutputArray] {
        &mut self.outputs
    }

    /// Output bundle for item `i`, one tensor per output array.
    pub fn item_outputs(&self, i: usize) -> Vec<Tensor> {
        self.outputs.iter().map(|a| a.item(i)).collect()
    }

    /// Hands the staging buffer back to the executor.
    pub fn reclaim_input(self) -> InputBuffer {
        self.input
    }
}
