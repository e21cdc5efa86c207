use std::path::Path;

use anyhow::{Context, Result};
use nexus_core::ModelSession;
use serde::{Deserialize, Serialize};

/// One entry of the static workload file: a model to keep loaded and the
/// batch size to run it at.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkloadEntry {
    pub framework: String,
    pub model_name: String,
    pub version: u32,
    /// Latency SLA in milliseconds.
    pub latency_sla: u32,
    #[serde(default)]
    pub image_height: Option<u32>,
    #[serde(default)]
    pub image_width: Option<u32>,
    pub batch: u32,
}

impl WorkloadEntry {
    pub fn session(&self) -> ModelSession {
        ModelSession {
            framework: self.framework.clone(),
            model_name: self.model_name.clone(),
            version: self.version,
            latency_sla: self.latency_sla,
            image_height: self.image_height,
            image_width: self.image_width,
        }
    }
}

pub fn load_workload_file(path: &Path) -> Result<Vec<WorkloadEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workload file {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("malformed workload file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_workload_entries() {
        let text = "\
- framework: tensorflow
  model_name: resnet50
  version: 1
  latency_sla: 50
  image_height: 224
  image_width: 224
  batch: 8
- framework: caffe
  model_name: vgg16
  version: 1
  latency_sla: 100
  batch: 4
";
        let entries: Vec<WorkloadEntry> = serde_yaml::from_str(text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session().profile_id(), "tensorflow:resnet50:1:224x224");
        assert_eq!(entries[1].session().profile_id(), "caffe:vgg16:1");
        assert_eq!(entries[1].image_height, None);
        assert_eq!(entries[0].batch, 8);
    }
}
