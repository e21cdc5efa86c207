use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("batch size {batch} outside profiled range 1..={max_batch}")]
    OutOfRange { batch: u32, max_batch: u32 },
}

/// Status carried in control-plane replies and on tasks. Mirrors the wire
/// enum in `nexus.ctrl.v1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtrlStatus {
    Ok,
    ServerUnreachable,
    ModelNotFound,
    ModelTableError,
    InputError,
    ForwardFailure,
    Unknown,
}

impl CtrlStatus {
    pub fn is_ok(self) -> bool {
        self == CtrlStatus::Ok
    }
}
