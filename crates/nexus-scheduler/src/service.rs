use std::sync::Arc;

use nexus_core::CtrlStatus;
use nexus_proto::ctrl::v1 as pb;
use tonic::{Request, Response, Status};
use tracing::warn;

use crate::scheduler::Scheduler;

/// Control service nodes talk to: registration, subscriptions, stats.
pub struct SchedulerCtrlSvc {
    pub scheduler: Arc<Scheduler>,
    pub beacon_interval_sec: u32,
}

fn reply(status: CtrlStatus) -> Response<pb::RpcReply> {
    Response::new(pb::RpcReply {
        status: pb::CtrlStatus::from(status) as i32,
    })
}

#[tonic::async_trait]
impl pb::scheduler_ctrl_server::SchedulerCtrl for SchedulerCtrlSvc {
    async fn register(
        &self,
        req: Request<pb::RegisterRequest>,
    ) -> std::result::Result<Response<pb::RegisterReply>, Status> {
        let req = req.into_inner();
        let result = match req.node_type() {
            pb::NodeType::BackendNode => self
                .scheduler
                .register_backend(
                    req.node_id,
                    req.server_address,
                    req.rpc_address,
                    req.gpu_device_name,
                    req.gpu_available_memory,
                )
                .await
                .map(|_| ()),
            pb::NodeType::FrontendNode => self
                .scheduler
                .register_frontend(req.node_id, req.server_address, req.rpc_address)
                .await
                .map(|_| ()),
            pb::NodeType::NodeUnknown => {
                return Err(Status::invalid_argument("unknown node type"))
            }
        };
        let status = match result {
            Ok(()) => CtrlStatus::Ok,
            Err(err) => {
                warn!(node_id = req.node_id, error = %err, "register failed");
                CtrlStatus::InputError
            }
        };
        Ok(Response::new(pb::RegisterReply {
            status: pb::CtrlStatus::from(status) as i32,
            beacon_interval_sec: self.beacon_interval_sec,
        }))
    }

    async fn subscribe_model(
        &self,
        req: Request<pb::SubscribeModelRequest>,
    ) -> std::result::Result<Response<pb::RpcReply>, Status> {
        let req = req.into_inner();
        match self
            .scheduler
            .subscribe_model(req.node_id, req.model_session_id)
            .await
        {
            Ok(()) => Ok(reply(CtrlStatus::Ok)),
            Err(err) => {
                warn!(node_id = req.node_id, error = %err, "subscribe failed");
                Ok(reply(CtrlStatus::InputError))
            }
        }
    }

    async fn update_stats(
        &self,
        req: Request<pb::BackendStats>,
    ) -> std::result::Result<Response<pb::RpcReply>, Status> {
        let stats = req.into_inner();
        match self.scheduler.update_stats(&stats).await {
            Ok(()) => Ok(reply(CtrlStatus::Ok)),
            Err(err) => {
                warn!(node_id = stats.node_id, error = %err, "update_stats failed");
                Ok(reply(CtrlStatus::InputError))
            }
        }
    }
}
