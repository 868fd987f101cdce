pub mod clock;

pub use clock::{ClockOrdering, VectorClock};

/// Identifies a replica inside a vector clock. Nodes default this to their
/// listen address.
pub type ReplicaId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OpKind {
    Get,
    Put,
}

/// A single request as proposed to the replicated log.
///
/// `(client_id, sequence)` identifies a write attempt; retries of the same
/// write reuse the pair so the apply loop can drop duplicates. Reads carry
/// sequence 0.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Op {
    pub kind: OpKind,
    pub key: String,
    pub value: Option<String>,
    pub client_id: i64,
    pub sequence: i64,
}

impl Op {
    pub fn get(key: impl Into<String>) -> Self {
        Op { kind: OpKind::Get, key: key.into(), value: None, client_id: 0, sequence: 0 }
    }

    pub fn put(
        key: impl Into<String>,
        value: impl Into<String>,
        client_id: i64,
        sequence: i64,
    ) -> Self {
        Op {
            kind: OpKind::Put,
            key: key.into(),
            value: Some(value.into()),
            client_id,
            sequence,
        }
    }
}

/// Consistency level a router runs with for its whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Strong,
    Causal,
}

impl std::str::FromStr for ConsistencyLevel {
    type Err = HkvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strong" => Ok(ConsistencyLevel::Strong),
            "causal" => Ok(ConsistencyLevel::Causal),
            other => Err(HkvError::InvalidArgument(format!(
                "unknown consistency level '{other}'"
            ))),
        }
    }
}

/// Reply on the leader-routed path. `value` is only meaningful when
/// `is_leader` is true; `None` means the key is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrongReply {
    pub is_leader: bool,
    pub value: Option<String>,
}

impl StrongReply {
    pub fn not_leader() -> Self {
        StrongReply { is_leader: false, value: None }
    }
}

/// Reply on the vector-clock path. `success == false` means the replica
/// could not satisfy the request's causal precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CausalReply {
    pub success: bool,
    pub value: Option<String>,
    pub clock: VectorClock,
}

impl CausalReply {
    pub fn stale() -> Self {
        CausalReply { success: false, value: None, clock: VectorClock::new() }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HkvError {
    #[error("not the leader")]
    NotLeader,
    #[error("replica has not observed the caller's causal past")]
    CausalStale,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("entry {index} was not applied within {timeout_ms}ms")]
    ConsensusTimeout { index: u64, timeout_ms: u64 },
    #[error("gave up after {attempts} attempts; last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("request cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("consensus error: {0}")]
    Consensus(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl HkvError {
    /// Whether a router should move on to another replica and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HkvError::NotLeader | HkvError::CausalStale | HkvError::Transport(_))
    }
}
