use std::sync::Arc;

use hkv_consensus::ReplicatedLog;
use hkv_proto::convert::{
    causal_get_reply, causal_put_reply, clock_from_proto, get_reply, op_from_causal_put_request,
    op_from_put_request,
};
use hkv_proto::v1::{
    kv_service_server::KvService, CausalGetReply, CausalGetRequest, CausalPutAppendReply,
    CausalPutAppendRequest, GetReply, GetRequest, PutAppendReply, PutAppendRequest,
};
use hkv_storage::LocalStore;
use hkv_types::HkvError;
use tonic::{Request, Response, Status};

use crate::convert::hkv_to_status;
use crate::handler::RequestHandler;

pub struct KvServiceImpl<L, S> {
    handler: Arc<RequestHandler<L, S>>,
}

impl<L: ReplicatedLog, S: LocalStore> KvServiceImpl<L, S> {
    pub fn new(handler: Arc<RequestHandler<L, S>>) -> Self {
        KvServiceImpl { handler }
    }
}

fn require_key(key: &str) -> Result<(), Status> {
    if key.is_empty() {
        return Err(hkv_to_status(HkvError::InvalidArgument("key must not be empty".into())));
    }
    Ok(())
}

#[tonic::async_trait]
impl<L: ReplicatedLog, S: LocalStore> KvService for KvServiceImpl<L, S> {
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetReply>, Status> {
        let req = request.into_inner();
        require_key(&req.key)?;
        let reply = self.handler.get(&req.key).await.map_err(hkv_to_status)?;
        Ok(Response::new(get_reply(reply)))
    }

    async fn put_append(
        &self,
        request: Request<PutAppendRequest>,
    ) -> Result<Response<PutAppendReply>, Status> {
        let op = op_from_put_request(request.into_inner()).map_err(hkv_to_status)?;
        let reply = self.handler.put_append(op).await.map_err(hkv_to_status)?;
        Ok(Response::new(PutAppendReply { is_leader: reply.is_leader }))
    }

    async fn get_in_causal(
        &self,
        request: Request<CausalGetRequest>,
    ) -> Result<Response<CausalGetReply>, Status> {
        let req = request.into_inner();
        require_key(&req.key)?;
        let caller = clock_from_proto(req.vector_clock);
        let reply = self.handler.get_causal(&req.key, &caller).await.map_err(hkv_to_status)?;
        Ok(Response::new(causal_get_reply(reply)))
    }

    async fn put_append_in_causal(
        &self,
        request: Request<CausalPutAppendRequest>,
    ) -> Result<Response<CausalPutAppendReply>, Status> {
        let (op, caller) =
            op_from_causal_put_request(request.into_inner()).map_err(hkv_to_status)?;
        let reply = self
            .handler
            .put_append_causal(op, &caller)
            .await
            .map_err(hkv_to_status)?;
        Ok(Response::new(causal_put_reply(reply)))
    }
}
