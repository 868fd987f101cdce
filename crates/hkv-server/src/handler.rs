use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use hkv_consensus::{ApplyMsg, ReplicatedLog};
use hkv_storage::LocalStore;
use hkv_types::{
    CausalReply, HkvError, Op, OpKind, ReplicaId, StrongReply, VectorClock,
};

use crate::apply::{Applier, ApplyWaiters};

/// Default bound on how long a proposer waits for its entry to apply.
pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub apply_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig { apply_timeout: DEFAULT_APPLY_TIMEOUT }
    }
}

enum Applied {
    Yes,
    NotLeader,
}

/// Turns one inbound request into either a log proposal (strong) or a
/// clock-gated local operation (causal).
pub struct RequestHandler<L, S> {
    replica_id: ReplicaId,
    log: Arc<L>,
    store: Arc<S>,
    waiters: Arc<ApplyWaiters>,
    /// Held across the store access of every causal request.
    clock: Mutex<VectorClock>,
    config: HandlerConfig,
}

impl<L: ReplicatedLog, S: LocalStore> RequestHandler<L, S> {
    /// Build a handler without an apply loop. Strong requests only complete
    /// once something drives an `Applier` over the same waiters; see
    /// [`RequestHandler::spawn`].
    pub fn new(
        replica_id: impl Into<ReplicaId>,
        log: Arc<L>,
        store: Arc<S>,
        config: HandlerConfig,
    ) -> Self {
        RequestHandler {
            replica_id: replica_id.into(),
            log,
            store,
            waiters: Arc::new(ApplyWaiters::new()),
            clock: Mutex::new(VectorClock::new()),
            config,
        }
    }

    /// Build a handler and spawn the apply loop draining `apply_rx`.
    pub fn spawn(
        replica_id: impl Into<ReplicaId>,
        log: Arc<L>,
        store: Arc<S>,
        apply_rx: mpsc::Receiver<ApplyMsg>,
        config: HandlerConfig,
    ) -> Arc<Self> {
        let handler = Self::new(replica_id, log, store, config);
        let applier = Applier::new(handler.store.clone(), handler.waiters.clone());
        tokio::spawn(applier.run(apply_rx));
        Arc::new(handler)
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn waiters(&self) -> &Arc<ApplyWaiters> {
        &self.waiters
    }

    /// Snapshot of this replica's vector clock.
    pub async fn clock(&self) -> VectorClock {
        self.clock.lock().await.clone()
    }

    // -----------------------------------------------------------------------
    // Strong path
    // -----------------------------------------------------------------------

    async fn propose_and_wait(&self, op: Op) -> Result<Applied, HkvError> {
        let Some(waiter) = self.waiters.propose(self.log.as_ref(), op).await? else {
            return Ok(Applied::NotLeader);
        };
        let index = waiter.proposal.index;
        match tokio::time::timeout(self.config.apply_timeout, waiter.rx).await {
            Ok(Ok(Ok(term))) if term == waiter.proposal.term => Ok(Applied::Yes),
            Ok(Ok(Ok(term))) => {
                tracing::warn!(
                    index,
                    proposed = waiter.proposal.term,
                    applied = term,
                    "entry superseded by another leader"
                );
                Ok(Applied::NotLeader)
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(HkvError::Consensus("applier dropped the waiter".into())),
            Err(_) => {
                self.waiters.abandon(index);
                tracing::warn!(index, "entry not applied in time");
                Err(HkvError::ConsensusTimeout {
                    index,
                    timeout_ms: self.config.apply_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Leader read: order the read through the log, then serve it locally.
    pub async fn get(&self, key: &str) -> Result<StrongReply, HkvError> {
        if !self.log.get_state().await.is_leader {
            return Ok(StrongReply::not_leader());
        }
        match self.propose_and_wait(Op::get(key)).await? {
            Applied::NotLeader => Ok(StrongReply::not_leader()),
            Applied::Yes => {
                let value = self.store.get(key).await?;
                Ok(StrongReply { is_leader: true, value })
            }
        }
    }

    pub async fn put_append(&self, op: Op) -> Result<StrongReply, HkvError> {
        if op.kind != OpKind::Put {
            return Err(HkvError::InvalidArgument("PutAppend requires a Put op".into()));
        }
        if !self.log.get_state().await.is_leader {
            return Ok(StrongReply::not_leader());
        }
        let key = op.key.clone();
        match self.propose_and_wait(op).await? {
            Applied::NotLeader => {
                tracing::info!(%key, "leadership changed during proposal");
                Ok(StrongReply::not_leader())
            }
            Applied::Yes => Ok(StrongReply { is_leader: true, value: None }),
        }
    }

    // -----------------------------------------------------------------------
    // Causal path
    // -----------------------------------------------------------------------

    /// Serve the read only if this replica has seen everything the caller has.
    pub async fn get_causal(
        &self,
        key: &str,
        caller: &VectorClock,
    ) -> Result<CausalReply, HkvError> {
        let clock = self.clock.lock().await;
        if !clock.dominates(caller) {
            tracing::debug!(%key, local = %*clock, %caller, "causal read rejected");
            return Ok(CausalReply::stale());
        }
        let value = self.store.get(key).await?;
        Ok(CausalReply { success: true, value, clock: clock.clone() })
    }

    /// Always accepted locally: merge, write, bump own coordinate.
    pub async fn put_append_causal(
        &self,
        op: Op,
        caller: &VectorClock,
    ) -> Result<CausalReply, HkvError> {
        if op.kind != OpKind::Put {
            return Err(HkvError::InvalidArgument("PutAppend requires a Put op".into()));
        }
        let mut clock = self.clock.lock().await;
        let next = clock.merge(caller).increment(&self.replica_id).ok_or_else(|| {
            HkvError::InvalidArgument(format!(
                "clock coordinate for {} is exhausted",
                self.replica_id
            ))
        })?;
        self.store.put(&op.key, op.value.as_deref().unwrap_or_default()).await?;
        *clock = next.clone();
        tracing::debug!(key = %op.key, clock = %next, "causal write accepted");
        Ok(CausalReply { success: true, value: None, clock: next })
    }
}
