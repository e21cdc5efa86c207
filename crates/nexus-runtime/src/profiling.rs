use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use nexus_core::{ForwardEntry, ModelProfile, Task, Tensor};

use crate::batch::{BatchTask, InputBuffer};
use crate::kernel::ModelKernel;

/// Mean and sample standard deviation of latency samples, in microseconds.
pub fn latency_stats(samples: &[u64]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mean = samples.iter().sum::<u64>() as f32 / samples.len() as f32;
    if samples.len() < 2 {
        return (mean, 0.0);
    }
    let var = samples
        .iter()
        .map(|&s| {
            let d = s as f32 - mean;
            d * d
        })
        .sum::<f32>()
        / (samples.len() - 1) as f32;
    (mean, var.sqrt())
}

pub struct ProfilerOptions {
    pub min_batch: u32,
    pub max_batch: u32,
    pub repeat: u32,
}

const MAX_POSTPROCESS_SAMPLES: usize = 2000;

/// Measures a kernel the way backends will run it: preprocess each raw
/// payload once, then one warm-up plus `repeat` timed forwards per batch
/// size, reading memory deltas between passes. Produces the profile the
/// scheduler plans with.
pub fn profile_kernel(
    kernel: &mut dyn ModelKernel,
    gpu_device: &str,
    raw_inputs: &[Vec<u8>],
    opts: &ProfilerOptions,
    free_memory: &dyn Fn() -> u64,
) -> Result<ModelProfile> {
    ensure!(!raw_inputs.is_empty(), "no profiling inputs");
    ensure!(
        opts.min_batch >= 1 && opts.min_batch <= opts.max_batch,
        "invalid batch range {}..={}",
        opts.min_batch,
        opts.max_batch
    );

    let profile_id = kernel.session().profile_id();
    let origin_free = free_memory();

    // Preprocess latency over the input set; the first sample is warm-up.
    let mut preprocess_lats = Vec::new();
    let mut arrays = Vec::with_capacity(raw_inputs.len());
    for (i, raw) in raw_inputs.iter().enumerate() {
        let start = Instant::now();
        arrays.push(kernel.preprocess(raw)?);
        if i > 0 {
            preprocess_lats.push(start.elapsed().as_micros() as u64);
        }
    }

    let mut forward = Vec::new();
    let mut postprocess_lats = Vec::new();
    for batch in opts.min_batch..=opts.max_batch {
        let (_tasks, mut batch_task) = stage_batch(kernel, &arrays, batch);

        run_forward(kernel, &mut batch_task)?;
        let mut lats = Vec::with_capacity(opts.repeat as usize);
        for _ in 0..opts.repeat {
            let start = Instant::now();
            run_forward(kernel, &mut batch_task)?;
            lats.push(start.elapsed().as_micros() as u64);
        }
        let memory_bytes = origin_free.saturating_sub(free_memory());

        for i in 0..batch as usize {
            if postprocess_lats.len() >= MAX_POSTPROCESS_SAMPLES {
                break;
            }
            let outputs = batch_task.item_outputs(i);
            let start = Instant::now();
            kernel.postprocess(&outputs)?;
            postprocess_lats.push(start.elapsed().as_micros() as u64);
        }

        let (latency_us, std_us) = latency_stats(&lats);
        forward.push(ForwardEntry {
            batch,
            latency_us,
            std_us,
            memory_bytes,
        });
    }

    let (preprocess_us, _) = latency_stats(&preprocess_lats);
    let (postprocess_us, _) = latency_stats(&postprocess_lats);
    Ok(ModelProfile {
        profile_id,
        gpu_device: gpu_device.to_string(),
        forward,
        preprocess_us,
        postprocess_us,
    })
}

fn stage_batch(
    kernel: &dyn ModelKernel,
    arrays: &[Tensor],
    batch: u32,
) -> (Vec<Arc<Task>>, BatchTask) {
    let buffer = InputBuffer::new(batch as usize, kernel.input_slot_bytes());
    let mut batch_task = BatchTask::new(0, buffer);
    let deadline = Instant::now() + Duration::from_secs(100);
    let mut tasks = Vec::with_capacity(batch as usize);
    for i in 0..batch as usize {
        let array = arrays[i % arrays.len()].clone();
        let (task, _rx) = Task::new(i as u64, deadline, vec![array]);
        let task = Arc::new(task);
        batch_task.append_input(&task.inputs[0], task.clone());
        tasks.push(task);
    }
    (tasks, batch_task)
}

fn run_forward(kernel: &mut dyn ModelKernel, batch: &mut BatchTask) -> Result<()> {
    let specs = kernel.output_specs();
    batch.allocate_outputs(&specs);
    kernel.forward(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_constant_samples() {
        let (mean, std) = latency_stats(&[40, 40, 40, 40]);
        assert_eq!(mean, 40.0);
        assert_eq!(std, 0.0);
    }

    #[test]
    fn stats_mean_and_std() {
        let (mean, std) = latency_stats(&[10, 20, 30]);
        assert_eq!(mean, 20.0);
        assert_eq!(std, 10.0);
    }

    #[test]
    fn stats_of_empty_and_single() {
        assert_eq!(latency_stats(&[]), (0.0, 0.0));
        assert_eq!(latency_stats(&[7]), (7.0, 0.0));
    }
}
