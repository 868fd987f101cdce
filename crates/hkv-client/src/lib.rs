pub mod retry;
pub mod router;
pub mod transport;

pub use retry::RetryPolicy;
pub use router::ConsistencyRouter;
pub use transport::{GrpcTransport, KvTransport};
