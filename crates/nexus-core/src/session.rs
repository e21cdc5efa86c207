use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one model deployment. Two sessions are equal iff all fields
/// are equal; in particular the same model served under two SLAs forms two
/// distinct sessions that share a profile.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSession {
    pub framework: String,
    pub model_name: String,
    pub version: u32,
    /// Latency SLA in milliseconds.
    pub latency_sla: u32,
    #[serde(default)]
    pub image_height: Option<u32>,
    #[serde(default)]
    pub image_width: Option<u32>,
}

impl ModelSession {
    /// Key used to look up profiles: `<framework>:<model>:<version>[:<H>x<W>]`.
    pub fn profile_id(&self) -> String {
        match (self.image_height, self.image_width) {
            (Some(h), Some(w)) => {
                format!("{}:{}:{}:{}x{}", self.framework, self.model_name, self.version, h, w)
            }
            _ => format!("{}:{}:{}", self.framework, self.model_name, self.version),
        }
    }

    /// Session key: the profile id plus the SLA suffix.
    pub fn session_id(&self) -> String {
        format!("{}:{}", self.profile_id(), self.latency_sla)
    }

    pub fn sla_us(&self) -> f64 {
        self.latency_sla as f64 * 1000.0
    }
}

impl fmt::Display for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.session_id())
    }
}

/// The plan for one (backend, model) pair, produced by the scheduler and
/// pushed to backends in the model table.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInstanceConfig {
    pub model_session: ModelSession,
    pub batch: u32,
    pub max_batch: u32,
    pub forward_latency_us: f64,
    pub memory_usage_bytes: u64,
    /// Requests per second this instance can serve under the plan.
    pub throughput: f64,
    /// Offered requests per second the plan was derived for.
    pub workload: f64,
}

impl ModelInstanceConfig {
    pub fn unservable(model_session: ModelSession) -> Self {
        Self {
            model_session,
            batch: 0,
            max_batch: 0,
            forward_latency_us: 0.0,
            memory_usage_bytes: 0,
            throughput: 0.0,
            workload: 0.0,
        }
    }

    pub fn is_servable(&self) -> bool {
        self.batch > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(h: Option<u32>, w: Option<u32>) -> ModelSession {
        ModelSession {
            framework: "tensorflow".to_string(),
            model_name: "resnet50".to_string(),
            version: 2,
            latency_sla: 50,
            image_height: h,
            image_width: w,
        }
    }

    #[test]
    fn profile_id_without_image_size() {
        assert_eq!(session(None, None).profile_id(), "tensorflow:resnet50:2");
    }

    #[test]
    fn profile_id_with_image_size() {
        assert_eq!(
            session(Some(224), Some(224)).profile_id(),
            "tensorflow:resnet50:2:224x224"
        );
    }

    #[test]
    fn session_id_carries_sla() {
        assert_eq!(session(None, None).session_id(), "tensorflow:resnet50:2:50");
    }
}
