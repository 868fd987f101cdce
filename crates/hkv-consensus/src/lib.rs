use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use hkv_types::{HkvError, Op, ReplicaId};

/// Default capacity of the apply channel: how many committed entries may be
/// in flight toward the server before the log has to wait.
pub const DEFAULT_APPLY_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// ReplicatedLog trait
// Uses RPITIT (Return Position Impl Trait In Trait, stable since Rust 1.75).
// The explicit `+ Send` bound on each future ensures generic callers can
// `.await` across thread boundaries.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderState {
    pub term: u64,
    pub is_leader: bool,
}

/// Result of proposing an operation. `index` and `term` are only meaningful
/// when `is_leader` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub index: u64,
    pub term: u64,
    pub is_leader: bool,
}

/// A committed entry handed back to the server for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyMsg {
    pub index: u64,
    pub term: u64,
    pub op: Op,
}

/// The consensus engine as seen by the request handler.
///
/// Committed entries are delivered, in index order, on the bounded
/// `mpsc::Receiver<ApplyMsg>` handed out when the log is constructed.
pub trait ReplicatedLog: Send + Sync + 'static {
    fn get_state(&self) -> impl Future<Output = LeaderState> + Send;

    /// Append `op` if this replica currently leads. Never blocks on the
    /// apply channel.
    fn start(&self, op: Op) -> impl Future<Output = Result<Proposal, HkvError>> + Send;
}

// ---------------------------------------------------------------------------
// StubLog: single replica, commits immediately, no real replication
// ---------------------------------------------------------------------------

struct StubInner {
    term: u64,
    is_leader: bool,
    last_index: u64,
}

/// In-process log that commits every accepted entry straight away.
///
/// Committed entries go directly onto the bounded apply channel. Once
/// `apply_capacity` entries are waiting, `start` blocks until the applier
/// drains one.
pub struct StubLog {
    replica_id: ReplicaId,
    inner: Arc<Mutex<StubInner>>,
    apply_tx: mpsc::Sender<ApplyMsg>,
}

impl StubLog {
    pub fn new(
        replica_id: impl Into<ReplicaId>,
        apply_capacity: usize,
        is_leader: bool,
    ) -> (Self, mpsc::Receiver<ApplyMsg>) {
        let (apply_tx, apply_rx) = mpsc::channel(apply_capacity.max(1));
        let log = StubLog {
            replica_id: replica_id.into(),
            inner: Arc::new(Mutex::new(StubInner { term: 1, is_leader, last_index: 0 })),
            apply_tx,
        };
        (log, apply_rx)
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Stop accepting proposals. Entries already started still apply.
    pub async fn step_down(&self) {
        let mut g = self.inner.lock().await;
        g.is_leader = false;
        tracing::info!(replica = %self.replica_id, term = g.term, "stepped down");
    }

    /// Win an election: move to the next term as leader.
    pub async fn campaign(&self) {
        let mut g = self.inner.lock().await;
        g.term += 1;
        g.is_leader = true;
        tracing::info!(replica = %self.replica_id, term = g.term, "became leader");
    }
}

impl ReplicatedLog for StubLog {
    async fn get_state(&self) -> LeaderState {
        let g = self.inner.lock().await;
        LeaderState { term: g.term, is_leader: g.is_leader }
    }

    async fn start(&self, op: Op) -> Result<Proposal, HkvError> {
        let mut g = self.inner.lock().await;
        if !g.is_leader {
            return Ok(Proposal { index: 0, term: g.term, is_leader: false });
        }
        let msg = ApplyMsg { index: g.last_index + 1, term: g.term, op };
        // Sent under the lock so channel order matches index order.
        self.apply_tx
            .send(msg)
            .await
            .map_err(|_| HkvError::Consensus("apply channel closed".into()))?;
        g.last_index += 1;
        Ok(Proposal { index: g.last_index, term: g.term, is_leader: true })
    }
}
