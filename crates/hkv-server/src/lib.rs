pub mod apply;
pub mod convert;
pub mod handler;
mod kv_service;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hkv_consensus::ReplicatedLog;
use hkv_proto::v1::kv_service_server::KvServiceServer;
use hkv_storage::LocalStore;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic_reflection::server::Builder as ReflectionBuilder;

pub use apply::{Applier, ApplyWaiters};
pub use handler::{HandlerConfig, RequestHandler, DEFAULT_APPLY_TIMEOUT};
use kv_service::KvServiceImpl;

fn router<L: ReplicatedLog, S: LocalStore>(
    handler: Arc<RequestHandler<L, S>>,
) -> anyhow::Result<tonic::transport::server::Router> {
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(hkv_proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;
    Ok(tonic::transport::Server::builder()
        .add_service(KvServiceServer::new(KvServiceImpl::new(handler)))
        .add_service(reflection))
}

/// Serve the KV RPCs on `addr` until `shutdown` resolves.
pub async fn serve_client<L, S, F>(
    addr: SocketAddr,
    handler: Arc<RequestHandler<L, S>>,
    shutdown: F,
) -> anyhow::Result<()>
where
    L: ReplicatedLog,
    S: LocalStore,
    F: Future<Output = ()> + Send,
{
    tracing::info!(%addr, replica = handler.replica_id(), "client gRPC server starting");
    router(handler)?
        .serve_with_shutdown(addr, shutdown)
        .await
        .map_err(Into::into)
}

/// Like [`serve_client`] but on an already-bound listener (port 0 in tests).
pub async fn serve_client_with_listener<L, S, F>(
    listener: TcpListener,
    handler: Arc<RequestHandler<L, S>>,
    shutdown: F,
) -> anyhow::Result<()>
where
    L: ReplicatedLog,
    S: LocalStore,
    F: Future<Output = ()> + Send,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, replica = handler.replica_id(), "client gRPC server starting");
    router(handler)?
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .map_err(Into::into)
}
