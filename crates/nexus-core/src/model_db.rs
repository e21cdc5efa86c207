use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::profile::ModelProfile;

/// Profile store keyed by (GPU device name, profile id). Loaded once at
/// startup and passed around as an `Arc` handle so tests can substitute an
/// in-memory database.
#[derive(Debug)]
pub struct ModelDatabase {
    profiles: HashMap<(String, String), Arc<ModelProfile>>,
}

impl ModelDatabase {
    /// Loads every profile under `<model_root>/profiles/`.
    pub fn init(model_root: &Path) -> Result<Self> {
        let mut db = Self::empty();
        let dir = model_root.join("profiles");
        if !dir.is_dir() {
            return Ok(db);
        }
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to list profiles in {}", dir.display()))?
        {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                continue;
            }
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read profile {}", path.display()))?;
            let profile: ModelProfile = serde_yaml::from_str(&text)
                .with_context(|| format!("malformed profile {}", path.display()))?;
            db.insert(profile);
        }
        Ok(db)
    }

    pub fn empty() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    pub fn insert(&mut self, profile: ModelProfile) {
        self.profiles.insert(
            (profile.gpu_device.clone(), profile.profile_id.clone()),
            Arc::new(profile),
        );
    }

    /// A missing profile means the model cannot be served on that GPU.
    pub fn get_profile(&self, gpu_device: &str, profile_id: &str) -> Option<Arc<ModelProfile>> {
        self.profiles
            .get(&(gpu_device.to_string(), profile_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
