pub mod v1 {
    tonic::include_proto!("hybridkv.v1");
}

/// Encoded descriptor set for gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/descriptor.bin"));

/// Response metadata that tags a server-side apply timeout, so a client can
/// tell it apart from its own RPC deadline.
pub mod metadata {
    pub const ERROR_KIND: &str = "hkv-error";
    pub const CONSENSUS_TIMEOUT: &str = "consensus-timeout";
    pub const APPLY_INDEX: &str = "hkv-apply-index";
    pub const APPLY_TIMEOUT_MS: &str = "hkv-apply-timeout-ms";
}

pub mod convert;
