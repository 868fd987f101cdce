//! How the router reaches a server.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use hkv_proto::convert;
use hkv_proto::metadata;
use hkv_proto::v1::kv_service_client::KvServiceClient;
use hkv_proto::v1::{CausalGetRequest, GetRequest};
use hkv_types::{CausalReply, HkvError, Op, StrongReply, VectorClock};

/// One RPC to one named server. Any delivery failure is reported as an
/// error; a server that answered but refused returns `Ok` with
/// `is_leader`/`success` cleared.
pub trait KvTransport: Send + Sync + 'static {
    fn get(
        &self,
        server: &str,
        key: &str,
    ) -> impl Future<Output = Result<StrongReply, HkvError>> + Send;

    fn put_append(
        &self,
        server: &str,
        op: &Op,
    ) -> impl Future<Output = Result<StrongReply, HkvError>> + Send;

    fn get_causal(
        &self,
        server: &str,
        key: &str,
        clock: &VectorClock,
    ) -> impl Future<Output = Result<CausalReply, HkvError>> + Send;

    fn put_append_causal(
        &self,
        server: &str,
        op: &Op,
        clock: &VectorClock,
    ) -> impl Future<Output = Result<CausalReply, HkvError>> + Send;
}

/// gRPC transport with one lazily connected channel per server address.
pub struct GrpcTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
    clients: Mutex<HashMap<String, KvServiceClient<Channel>>>,
}

impl GrpcTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        GrpcTransport {
            connect_timeout,
            request_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, server: &str) -> Result<KvServiceClient<Channel>, HkvError> {
        let mut clients = self.clients.lock().await;
        if let Some(c) = clients.get(server) {
            return Ok(c.clone());
        }
        let uri = if server.contains("://") {
            server.to_string()
        } else {
            format!("http://{server}")
        };
        let channel = Endpoint::from_shared(uri)
            .map_err(|e| HkvError::InvalidArgument(format!("bad server address {server}: {e}")))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .connect_lazy();
        let client = KvServiceClient::new(channel);
        clients.insert(server.to_string(), client.clone());
        Ok(client)
    }
}

impl Default for GrpcTransport {
    fn default() -> Self {
        GrpcTransport::new(Duration::from_secs(1), Duration::from_secs(10))
    }
}

/// Map an RPC failure back into the error the server raised.
pub fn status_to_hkv(status: Status) -> HkvError {
    let md = status.metadata();
    let tagged = md
        .get(metadata::ERROR_KIND)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|kind| kind == metadata::CONSENSUS_TIMEOUT);
    if tagged {
        let number = |name: &str| {
            md.get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0)
        };
        return HkvError::ConsensusTimeout {
            index: number(metadata::APPLY_INDEX),
            timeout_ms: number(metadata::APPLY_TIMEOUT_MS),
        };
    }
    match status.code() {
        Code::InvalidArgument => HkvError::InvalidArgument(status.message().to_string()),
        code => HkvError::Transport(format!("{code:?}: {}", status.message())),
    }
}

impl KvTransport for GrpcTransport {
    async fn get(&self, server: &str, key: &str) -> Result<StrongReply, HkvError> {
        let mut client = self.client(server).await?;
        let reply = client
            .get(GetRequest { key: key.to_string() })
            .await
            .map_err(status_to_hkv)?
            .into_inner();
        Ok(convert::strong_reply_from_get(reply))
    }

    async fn put_append(&self, server: &str, op: &Op) -> Result<StrongReply, HkvError> {
        let mut client = self.client(server).await?;
        let reply = client
            .put_append(convert::put_request(op))
            .await
            .map_err(status_to_hkv)?
            .into_inner();
        Ok(StrongReply { is_leader: reply.is_leader, value: None })
    }

    async fn get_causal(
        &self,
        server: &str,
        key: &str,
        clock: &VectorClock,
    ) -> Result<CausalReply, HkvError> {
        let mut client = self.client(server).await?;
        let reply = client
            .get_in_causal(CausalGetRequest {
                key: key.to_string(),
                vector_clock: Some(clock.into()),
            })
            .await
            .map_err(status_to_hkv)?
            .into_inner();
        Ok(convert::causal_reply_from_get(reply))
    }

    async fn put_append_causal(
        &self,
        server: &str,
        op: &Op,
        clock: &VectorClock,
    ) -> Result<CausalReply, HkvError> {
        let mut client = self.client(server).await?;
        let reply = client
            .put_append_in_causal(convert::causal_put_request(op, clock))
            .await
            .map_err(status_to_hkv)?
            .into_inner();
        Ok(convert::causal_reply_from_put(reply))
    }
}

#[cfg(test)]
mod tests {
    use tonic::metadata::MetadataValue;

    use super::*;

    #[test]
    fn tagged_deadline_is_a_consensus_timeout() {
        let mut status = Status::deadline_exceeded("entry 9 was not applied within 250ms");
        let md = status.metadata_mut();
        md.insert(metadata::ERROR_KIND, MetadataValue::from_static(metadata::CONSENSUS_TIMEOUT));
        md.insert(metadata::APPLY_INDEX, MetadataValue::from_static("9"));
        md.insert(metadata::APPLY_TIMEOUT_MS, MetadataValue::from_static("250"));
        assert_eq!(
            status_to_hkv(status),
            HkvError::ConsensusTimeout { index: 9, timeout_ms: 250 }
        );
    }

    #[test]
    fn untagged_deadline_is_retryable_transport() {
        let err = status_to_hkv(Status::deadline_exceeded("timeout"));
        assert!(matches!(err, HkvError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_argument_is_not_retried() {
        let err = status_to_hkv(Status::invalid_argument("key must not be empty"));
        assert_eq!(err, HkvError::InvalidArgument("key must not be empty".into()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn channels_are_cached_per_server() {
        let t = GrpcTransport::default();
        t.client("127.0.0.1:1").await.unwrap();
        t.client("127.0.0.1:1").await.unwrap();
        t.client("127.0.0.1:2").await.unwrap();
        assert_eq!(t.clients.lock().await.len(), 2);
    }
}
