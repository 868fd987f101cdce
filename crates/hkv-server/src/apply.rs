//! Apply loop and per-index completion signals.
//!
//! Every proposer registers a one-shot waiter keyed by the log index it was
//! assigned, so concurrent writers each wait for their own entry instead of
//! sharing one notification queue.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};

use hkv_consensus::{ApplyMsg, Proposal, ReplicatedLog};
use hkv_storage::LocalStore;
use hkv_types::{HkvError, Op, OpKind};

/// What a waiter receives: the term its index was applied under.
type Completion = Result<u64, HkvError>;

#[derive(Default)]
struct Table {
    pending: HashMap<u64, oneshot::Sender<Completion>>,
    /// Proposers inside `start` that have no index yet.
    proposing: usize,
    /// Completions that arrived while some proposer was still inside
    /// `start`. Cleared whenever `proposing` drops to zero.
    early: HashMap<u64, Completion>,
    /// Timed-out indices whose completion should be dropped, not parked.
    abandoned: HashSet<u64>,
}

#[derive(Default)]
pub struct ApplyWaiters {
    table: Mutex<Table>,
}

/// Counts a proposer as inside `start` until dropped, so a cancelled
/// proposal can't leave `early` growing.
struct Proposing<'a>(&'a ApplyWaiters);

impl Drop for Proposing<'_> {
    fn drop(&mut self) {
        let mut table = self.0.lock();
        table.proposing -= 1;
        if table.proposing == 0 {
            table.early.clear();
        }
    }
}

/// A proposal that the log accepted, plus the signal for its application.
pub(crate) struct Waiter {
    pub proposal: Proposal,
    pub rx: oneshot::Receiver<Completion>,
}

impl ApplyWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Propose `op` and register for its index.
    ///
    /// `start` may block on a full apply channel, so no lock is held across
    /// it. An entry applied before its proposer registers is parked in
    /// `early` and handed over at registration. Returns `None` when the log
    /// is not leading.
    pub(crate) async fn propose<L: ReplicatedLog>(
        &self,
        log: &L,
        op: Op,
    ) -> Result<Option<Waiter>, HkvError> {
        self.lock().proposing += 1;
        let guard = Proposing(self);
        let proposal = log.start(op).await?;
        if !proposal.is_leader {
            return Ok(None);
        }
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.lock();
            match table.early.remove(&proposal.index) {
                Some(outcome) => {
                    let _ = tx.send(outcome);
                }
                None => {
                    table.pending.insert(proposal.index, tx);
                }
            }
        }
        drop(guard);
        Ok(Some(Waiter { proposal, rx }))
    }

    /// Drop the waiter for `index`, e.g. after its proposer timed out.
    pub(crate) fn abandon(&self, index: u64) {
        let mut table = self.lock();
        if table.pending.remove(&index).is_some() {
            table.abandoned.insert(index);
        }
    }

    fn complete(&self, index: u64, outcome: Completion) {
        let mut table = self.lock();
        if let Some(tx) = table.pending.remove(&index) {
            // The proposer may have given up already.
            let _ = tx.send(outcome);
        } else if table.abandoned.remove(&index) {
            tracing::debug!(index, "abandoned entry applied");
        } else if table.proposing > 0 {
            table.early.insert(index, outcome);
        }
    }

    fn fail_all(&self, err: HkvError) {
        let mut table = self.lock();
        table.abandoned.clear();
        for (_, tx) in table.pending.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }
}

/// Drains committed entries in order and executes them against the store.
pub struct Applier<S> {
    store: Arc<S>,
    waiters: Arc<ApplyWaiters>,
    /// client_id → highest sequence already executed. One entry per client
    /// that ever wrote with a non-zero sequence; entries are never evicted,
    /// so memory grows with the number of distinct clients, not writes.
    last_sequence: HashMap<i64, i64>,
    last_applied: u64,
}

impl<S: LocalStore> Applier<S> {
    pub fn new(store: Arc<S>, waiters: Arc<ApplyWaiters>) -> Self {
        Applier { store, waiters, last_sequence: HashMap::new(), last_applied: 0 }
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Number of clients in the dedup table.
    pub fn tracked_clients(&self) -> usize {
        self.last_sequence.len()
    }

    /// Run until the log drops its sender. Pending waiters then fail.
    pub async fn run(mut self, mut apply_rx: mpsc::Receiver<ApplyMsg>) {
        while let Some(msg) = apply_rx.recv().await {
            self.apply(msg).await;
        }
        tracing::info!(last_applied = self.last_applied, "apply channel closed");
        self.waiters.fail_all(HkvError::Consensus("apply channel closed".into()));
    }

    pub async fn apply(&mut self, msg: ApplyMsg) {
        let ApplyMsg { index, term, op } = msg;
        let outcome = match self.execute(op).await {
            Ok(()) => Ok(term),
            Err(e) => {
                tracing::error!(index, term, error = %e, "failed to apply entry");
                Err(e)
            }
        };
        self.last_applied = index;
        self.waiters.complete(index, outcome);
    }

    async fn execute(&mut self, op: Op) -> Result<(), HkvError> {
        match op.kind {
            // Reads only need a position in the log.
            OpKind::Get => Ok(()),
            OpKind::Put => {
                let seen = self.last_sequence.get(&op.client_id).copied().unwrap_or(0);
                if op.sequence != 0 && op.sequence <= seen {
                    tracing::debug!(
                        client_id = op.client_id,
                        sequence = op.sequence,
                        "duplicate write skipped"
                    );
                    return Ok(());
                }
                let value = op.value.unwrap_or_default();
                self.store.put(&op.key, &value).await?;
                if op.sequence != 0 {
                    self.last_sequence.insert(op.client_id, op.sequence);
                }
                Ok(())
            }
        }
    }
}
