/// One GPU visible to a backend. Device discovery is left to the embedding
/// process; the serving core only needs the name used for profile lookups
/// and the memory headroom reported to the scheduler.
#[derive(Clone, Debug)]
pub struct GpuDevice {
    pub gpu_id: u32,
    pub device_name: String,
    pub total_memory: u64,
    pub free_memory: u64,
}

/// GPU inventory for one process. Constructed at startup and passed around
/// as a handle; tests build their own.
#[derive(Debug, Default)]
pub struct DeviceManager {
    gpus: Vec<GpuDevice>,
}

impl DeviceManager {
    pub fn new(gpus: Vec<GpuDevice>) -> Self {
        Self { gpus }
    }

    pub fn gpu(&self, gpu_id: u32) -> Option<&GpuDevice> {
        self.gpus.iter().find(|g| g.gpu_id == gpu_id)
    }

    pub fn gpus(&self) -> &[GpuDevice] {
        &self.gpus
    }
}
