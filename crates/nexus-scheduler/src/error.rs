use nexus_core::ProfileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("backend {0} is not idle, multi-model co-load is not supported")]
    BackendNotIdle(u32),
    #[error("no profile for {profile_id} on {gpu_device}")]
    ProfileMissing {
        gpu_device: String,
        profile_id: String,
    },
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("node {0} is already registered")]
    NodeExists(u32),
    #[error("node {0} is not registered")]
    NodeNotFound(u32),
    #[error("invalid control rpc address {addr}")]
    InvalidRpcAddress {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },
}
