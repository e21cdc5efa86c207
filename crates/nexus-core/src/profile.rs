use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// One measured batch size.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ForwardEntry {
    pub batch: u32,
    pub latency_us: f32,
    #[serde(default)]
    pub std_us: f32,
    pub memory_bytes: u64,
}

/// Measured latency/memory table for one (GPU, model) pair. Read-only after
/// load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelProfile {
    pub profile_id: String,
    pub gpu_device: String,
    pub forward: Vec<ForwardEntry>,
    pub preprocess_us: f32,
    pub postprocess_us: f32,
}

impl ModelProfile {
    pub fn max_known_batch(&self) -> u32 {
        self.forward.iter().map(|e| e.batch).max().unwrap_or(0)
    }

    fn entry(&self, batch: u32) -> Result<&ForwardEntry, ProfileError> {
        self.forward
            .iter()
            .find(|e| e.batch == batch)
            .ok_or(ProfileError::OutOfRange {
                batch,
                max_batch: self.max_known_batch(),
            })
    }

    pub fn forward_latency(&self, batch: u32) -> Result<f32, ProfileError> {
        Ok(self.entry(batch)?.latency_us)
    }

    pub fn memory_usage(&self, batch: u32) -> Result<u64, ProfileError> {
        Ok(self.entry(batch)?.memory_bytes)
    }

    pub fn preprocess_latency(&self) -> f32 {
        self.preprocess_us
    }

    pub fn postprocess_latency(&self) -> f32 {
        self.postprocess_us
    }

    /// The largest batch whose full pipeline latency still fits the SLA, and
    /// the throughput of running that batch once per SLA window. Returns
    /// `(0, 0.0)` when even batch 1 does not fit.
    pub fn max_throughput(&self, sla_ms: u32) -> (u32, f64) {
        let sla_us = sla_ms as f64 * 1000.0;
        let mut max_batch = 0u32;
        for e in &self.forward {
            let total = self.preprocess_us as f64 + e.latency_us as f64 + self.postprocess_us as f64;
            if total <= sla_us && e.batch > max_batch {
                max_batch = e.batch;
            }
        }
        if max_batch == 0 {
            return (0, 0.0);
        }
        (max_batch, max_batch as f64 * 1e6 / sla_us)
    }
}
