use std::sync::Arc;

use nexus_core::{CtrlStatus, ModelInstanceConfig};
use nexus_proto::ctrl::v1 as pb;
use tonic::{Request, Response, Status};
use tracing::warn;

use crate::registry::ModelRegistry;

/// Control endpoints the scheduler drives.
pub struct BackendCtrlSvc {
    pub registry: Arc<ModelRegistry>,
}

fn reply(status: CtrlStatus) -> Response<pb::RpcReply> {
    Response::new(pb::RpcReply {
        status: pb::CtrlStatus::from(status) as i32,
    })
}

#[tonic::async_trait]
impl pb::backend_ctrl_server::BackendCtrl for BackendCtrlSvc {
    async fn update_model_table(
        &self,
        req: Request<pb::ModelTableConfig>,
    ) -> std::result::Result<Response<pb::RpcReply>, Status> {
        let req = req.into_inner();
        let mut table = Vec::with_capacity(req.model_instance_config.len());
        for config in &req.model_instance_config {
            match ModelInstanceConfig::try_from(config) {
                Ok(config) => table.push(config),
                Err(err) => {
                    warn!(error = %err, "bad model table entry");
                    return Ok(reply(CtrlStatus::ModelTableError));
                }
            }
        }
        match self.registry.apply_model_table(table) {
            Ok(()) => Ok(reply(CtrlStatus::Ok)),
            Err(err) => {
                warn!(error = %err, "failed to apply model table");
                Ok(reply(CtrlStatus::ModelTableError))
            }
        }
    }

    async fn check_alive(
        &self,
        _req: Request<pb::CheckAliveRequest>,
    ) -> std::result::Result<Response<pb::RpcReply>, Status> {
        Ok(reply(CtrlStatus::Ok))
    }
}
