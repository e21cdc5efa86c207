use nexus_core::{CtrlStatus, ModelInstanceConfig, ModelSession};
use thiserror::Error;

use crate::ctrl::v1 as pb;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("message is missing required field `{0}`")]
pub struct MissingField(pub &'static str);

impl From<CtrlStatus> for pb::CtrlStatus {
    fn from(status: CtrlStatus) -> Self {
        match status {
            CtrlStatus::Ok => pb::CtrlStatus::CtrlOk,
            CtrlStatus::ServerUnreachable => pb::CtrlStatus::CtrlServerUnreachable,
            CtrlStatus::ModelNotFound => pb::CtrlStatus::CtrlModelNotFound,
            CtrlStatus::ModelTableError => pb::CtrlStatus::CtrlModelTableError,
            CtrlStatus::InputError => pb::CtrlStatus::CtrlInputError,
            CtrlStatus::ForwardFailure => pb::CtrlStatus::CtrlForwardFailure,
            CtrlStatus::Unknown => pb::CtrlStatus::CtrlUnknown,
        }
    }
}

impl From<pb::CtrlStatus> for CtrlStatus {
    fn from(status: pb::CtrlStatus) -> Self {
        match status {
            pb::CtrlStatus::CtrlOk => CtrlStatus::Ok,
            pb::CtrlStatus::CtrlServerUnreachable => CtrlStatus::ServerUnreachable,
            pb::CtrlStatus::CtrlModelNotFound => CtrlStatus::ModelNotFound,
            pb::CtrlStatus::CtrlModelTableError => CtrlStatus::ModelTableError,
            pb::CtrlStatus::CtrlInputError => CtrlStatus::InputError,
            pb::CtrlStatus::CtrlForwardFailure => CtrlStatus::ForwardFailure,
            pb::CtrlStatus::CtrlUnknown => CtrlStatus::Unknown,
        }
    }
}

impl From<&ModelSession> for pb::ModelSession {
    fn from(s: &ModelSession) -> Self {
        Self {
            framework: s.framework.clone(),
            model_name: s.model_name.clone(),
            version: s.version,
            latency_sla: s.latency_sla,
            image_height: s.image_height.unwrap_or(0),
            image_width: s.image_width.unwrap_or(0),
        }
    }
}

impl From<&pb::ModelSession> for ModelSession {
    fn from(s: &pb::ModelSession) -> Self {
        Self {
            framework: s.framework.clone(),
            model_name: s.model_name.clone(),
            version: s.version,
            latency_sla: s.latency_sla,
            image_height: (s.image_height > 0).then_some(s.image_height),
            image_width: (s.image_width > 0).then_some(s.image_width),
        }
    }
}

impl From<&ModelInstanceConfig> for pb::ModelInstanceConfig {
    fn from(c: &ModelInstanceConfig) -> Self {
        Self {
            model_session: Some(pb::ModelSession::from(&c.model_session)),
            batch: c.batch,
            max_batch: c.max_batch,
            forward_latency_us: c.forward_latency_us,
            memory_usage_bytes: c.memory_usage_bytes,
            throughput: c.throughput,
            workload: c.workload,
        }
    }
}

impl TryFrom<&pb::ModelInstanceConfig> for ModelInstanceConfig {
    type Error = MissingField;

    fn try_from(c: &pb::ModelInstanceConfig) -> Result<Self, Self::Error> {
        let session = c.model_session.as_ref().ok_or(MissingField("model_session"))?;
        Ok(Self {
            model_session: ModelSession::from(session),
            batch: c.batch,
            max_batch: c.max_batch,
            forward_latency_us: c.forward_latency_us,
            memory_usage_bytes: c.memory_usage_bytes,
            throughput: c.throughput,
            workload: c.workload,
        })
    }
}
