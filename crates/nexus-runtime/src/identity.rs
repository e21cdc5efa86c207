use anyhow::Result;
use nexus_core::{DType, GpuDevice, ModelSession, Shape, Tensor};

use crate::batch::BatchTask;
use crate::kernel::{KernelFactory, ModelKernel, OutputSpec};

/// Reference kernel: echoes each staged input slot as its single output.
/// Stands in for framework-backed kernels in tests and the profiler;
/// real deployments implement [`ModelKernel`] over their framework.
pub struct IdentityKernel {
    session: ModelSession,
    elems: usize,
}

impl IdentityKernel {
    pub fn new(session: ModelSession, elems: usize) -> Self {
        Self { session, elems }
    }
}

impl ModelKernel for IdentityKernel {
    fn session(&self) -> &ModelSession {
        &self.session
    }

    fn input_slot_bytes(&self) -> usize {
        self.elems * DType::F32.byte_size()
    }

    fn output_specs(&self) -> Vec<OutputSpec> {
        vec![OutputSpec {
            name: "output".to_string(),
            dtype: DType::F32,
            shape: Shape::from_slice(&[self.elems]),
        }]
    }

    fn forward(&mut self, batch: &mut BatchTask) -> Result<()> {
        let stride = self.input_slot_bytes();
        for i in 0..batch.batch_size() as usize {
            let src = batch.input_slot(i).to_vec();
            let out = &mut batch.outputs_mut()[0];
            out.data[i * stride..(i + 1) * stride].copy_from_slice(&src);
        }
        Ok(())
    }

    fn preprocess(&self, raw: &[u8]) -> Result<Tensor> {
        let mut values = vec![0f32; self.elems];
        for (v, b) in values.iter_mut().zip(raw.iter()) {
            *v = *b as f32 / 255.0;
        }
        Ok(Tensor::from_f32(Shape::from_slice(&[self.elems]), &values))
    }
}

pub struct IdentityKernelFactory {
    pub elems: usize,
}

impl KernelFactory for IdentityKernelFactory {
    fn create(&self, session: &ModelSession, _gpu: &GpuDevice) -> Result<Box<dyn ModelKernel>> {
        Ok(Box::new(IdentityKernel::new(session.clone(), self.elems)))
    }
}
