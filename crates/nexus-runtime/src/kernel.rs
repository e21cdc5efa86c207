use anyhow::Result;
use bytes::Bytes;
use nexus_core::{DType, GpuDevice, ModelSession, Shape, Tensor};

use crate::batch::BatchTask;

#[derive(Clone, Debug)]
pub struct OutputSpec {
    pub name: String,
    pub dtype: DType,
    /// Per-item shape; the batch dimension is added by the executor.
    pub shape: Shape,
}

impl OutputSpec {
    pub fn item_bytes(&self) -> usize {
        self.shape.numel() * self.dtype.byte_size()
    }
}

/// Forward interface onto one loaded (GPU, model) instance.
/// Kept synchronous; executor drivers call it through `block_in_place`.
pub trait ModelKernel: Send {
    fn session(&self) -> &ModelSession;

    /// Bytes one staged input occupies in the batch input buffer.
    fn input_slot_bytes(&self) -> usize;

    /// Queried before every batch; prefix-style models may resize their
    /// outputs between invocations.
    fn output_specs(&self) -> Vec<OutputSpec>;

    fn forward(&mut self, batch: &mut BatchTask) -> Result<()>;

    /// Decodes one raw request payload into the staged input layout.
    fn preprocess(&self, raw: &[u8]) -> Result<Tensor> {
        Ok(Tensor::from_bytes(
            DType::U8,
            Shape::from_slice(&[raw.len()]),
            Bytes::copy_from_slice(raw),
        ))
    }

    /// Consumes one per-item output bundle; profiling measures this.
    fn postprocess(&self, _outputs: &[Tensor]) -> Result<()> {
        Ok(())
    }
}

/// Builds kernels for the sessions named by a pushed model table.
pub trait KernelFactory: Send + Sync {
    fn create(&self, session: &ModelSession, gpu: &GpuDevice) -> Result<Box<dyn ModelKernel>>;
}
