//! Client-side routing of `get`/`put` across the replica set.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use hkv_types::{ConsistencyLevel, HkvError, Op, VectorClock};

use crate::retry::{Attempts, RetryPolicy};
use crate::transport::KvTransport;

/// Per-client routing state. Not meant to be shared between tasks; run one
/// router per logical client.
pub struct ConsistencyRouter<T> {
    transport: Arc<T>,
    servers: Vec<String>,
    level: ConsistencyLevel,
    client_id: i64,
    /// Index into `servers` of the last server that confirmed leadership.
    leader: usize,
    /// Last sequence handed to a write. Retries of that write reuse it.
    sequence: i64,
    clock: VectorClock,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<T: KvTransport> ConsistencyRouter<T> {
    pub fn new(
        transport: Arc<T>,
        servers: Vec<String>,
        level: ConsistencyLevel,
    ) -> Result<Self, HkvError> {
        if servers.is_empty() {
            return Err(HkvError::InvalidArgument("server list is empty".into()));
        }
        Ok(ConsistencyRouter {
            transport,
            servers,
            level,
            client_id: (rand::random::<u64>() >> 2) as i64,
            leader: 0,
            sequence: 0,
            clock: VectorClock::new(),
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Calls return `Cancelled` once `cancel` fires, including mid-RPC.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn level(&self) -> ConsistencyLevel {
        self.level
    }

    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    pub fn leader(&self) -> &str {
        &self.servers[self.leader]
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    fn attempts(&self) -> Attempts {
        Attempts::new(self.policy.clone(), self.cancel.clone(), self.servers.len())
    }

    /// Read `key`. `server_hint` picks the first replica tried on the causal
    /// path; strong reads always start at the cached leader.
    pub async fn get(
        &mut self,
        server_hint: usize,
        key: &str,
    ) -> Result<Option<String>, HkvError> {
        match self.level {
            ConsistencyLevel::Strong => self.strong_get(key).await,
            ConsistencyLevel::Causal => self.causal_get(server_hint, key).await,
        }
    }

    pub async fn put(
        &mut self,
        server_hint: usize,
        key: &str,
        value: &str,
    ) -> Result<(), HkvError> {
        self.sequence += 1;
        let op = Op::put(key, value, self.client_id, self.sequence);
        match self.level {
            ConsistencyLevel::Strong => self.strong_put(&op).await,
            ConsistencyLevel::Causal => self.causal_put(server_hint, &op).await,
        }
    }

    async fn strong_get(&mut self, key: &str) -> Result<Option<String>, HkvError> {
        let mut attempts = self.attempts();
        let mut id = self.leader;
        loop {
            let server = &self.servers[id];
            let outcome = attempts.run(self.transport.get(server, key)).await?;
            let err = match outcome {
                Ok(reply) if reply.is_leader => {
                    self.leader = id;
                    return Ok(reply.value);
                }
                Ok(_) => HkvError::NotLeader,
                Err(e) => e,
            };
            attempts.failed(server, err).await?;
            id = (id + 1) % self.servers.len();
        }
    }

    async fn strong_put(&mut self, op: &Op) -> Result<(), HkvError> {
        let mut attempts = self.attempts();
        let mut id = self.leader;
        loop {
            let server = &self.servers[id];
            let outcome = attempts.run(self.transport.put_append(server, op)).await?;
            let err = match outcome {
                Ok(reply) if reply.is_leader => {
                    if id != self.leader {
                        tracing::debug!(server, "leader changed");
                    }
                    self.leader = id;
                    return Ok(());
                }
                Ok(_) => HkvError::NotLeader,
                Err(e) => e,
            };
            attempts.failed(server, err).await?;
            id = (id + 1) % self.servers.len();
        }
    }

    async fn causal_get(&mut self, hint: usize, key: &str) -> Result<Option<String>, HkvError> {
        let mut attempts = self.attempts();
        let mut id = hint % self.servers.len();
        loop {
            let server = &self.servers[id];
            let outcome = attempts
                .run(self.transport.get_causal(server, key, &self.clock))
                .await?;
            let err = match outcome {
                Ok(reply) if reply.success => {
                    self.clock = self.clock.merge(&reply.clock);
                    return Ok(reply.value);
                }
                Ok(_) => HkvError::CausalStale,
                Err(e) => e,
            };
            attempts.failed(server, err).await?;
            id = (id + 1) % self.servers.len();
        }
    }

    async fn causal_put(&mut self, hint: usize, op: &Op) -> Result<(), HkvError> {
        let mut attempts = self.attempts();
        let mut id = hint % self.servers.len();
        loop {
            let server = &self.servers[id];
            let outcome = attempts
                .run(self.transport.put_append_causal(server, op, &self.clock))
                .await?;
            let err = match outcome {
                Ok(reply) if reply.success => {
                    self.clock = self.clock.merge(&reply.clock);
                    return Ok(());
                }
                Ok(_) => HkvError::CausalStale,
                Err(e) => e,
            };
            attempts.failed(server, err).await?;
            id = (id + 1) % self.servers.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    use hkv_types::{CausalReply, StrongReply};

    use super::*;

    /// Scripted cluster: one leader for the strong path, a set of stale
    /// replicas and unreachable servers for both paths.
    #[derive(Default)]
    struct Script {
        leader: Option<String>,
        stale: HashSet<String>,
        down: HashSet<String>,
        data: HashMap<String, String>,
        calls: Vec<String>,
        writes: Vec<Op>,
        hang: bool,
        timeout: bool,
    }

    #[derive(Default)]
    struct FakeTransport(Mutex<Script>);

    impl FakeTransport {
        fn with(f: impl FnOnce(&mut Script)) -> Arc<Self> {
            let t = FakeTransport::default();
            f(&mut t.0.lock().unwrap());
            Arc::new(t)
        }

        fn calls(&self) -> Vec<String> {
            self.0.lock().unwrap().calls.clone()
        }

        fn record(&self, server: &str) -> Result<(), HkvError> {
            let mut s = self.0.lock().unwrap();
            s.calls.push(server.to_string());
            if s.down.contains(server) {
                return Err(HkvError::Transport(format!("{server} unreachable")));
            }
            if s.timeout {
                return Err(HkvError::ConsensusTimeout { index: 1, timeout_ms: 10 });
            }
            Ok(())
        }

        async fn maybe_hang(&self) {
            let hang = self.0.lock().unwrap().hang;
            if hang {
                std::future::pending::<()>().await;
            }
        }
    }

    impl KvTransport for FakeTransport {
        async fn get(&self, server: &str, key: &str) -> Result<StrongReply, HkvError> {
            self.maybe_hang().await;
            self.record(server)?;
            let s = self.0.lock().unwrap();
            if s.leader.as_deref() != Some(server) {
                return Ok(StrongReply::not_leader());
            }
            Ok(StrongReply { is_leader: true, value: s.data.get(key).cloned() })
        }

        async fn put_append(&self, server: &str, op: &Op) -> Result<StrongReply, HkvError> {
            self.record(server)?;
            let mut s = self.0.lock().unwrap();
            if s.leader.as_deref() != Some(server) {
                return Ok(StrongReply::not_leader());
            }
            s.writes.push(op.clone());
            s.data.insert(op.key.clone(), op.value.clone().unwrap_or_default());
            Ok(StrongReply { is_leader: true, value: None })
        }

        async fn get_causal(
            &self,
            server: &str,
            key: &str,
            clock: &VectorClock,
        ) -> Result<CausalReply, HkvError> {
            self.record(server)?;
            let s = self.0.lock().unwrap();
            if s.stale.contains(server) {
                return Ok(CausalReply::stale());
            }
            Ok(CausalReply {
                success: true,
                value: s.data.get(key).cloned(),
                clock: clock.increment(server).unwrap(),
            })
        }

        async fn put_append_causal(
            &self,
            server: &str,
            op: &Op,
            clock: &VectorClock,
        ) -> Result<CausalReply, HkvError> {
            self.record(server)?;
            let mut s = self.0.lock().unwrap();
            s.writes.push(op.clone());
            s.data.insert(op.key.clone(), op.value.clone().unwrap_or_default());
            let clock = clock.increment(server).unwrap();
            Ok(CausalReply { success: true, value: None, clock })
        }
    }

    fn servers() -> Vec<String> {
        vec!["s0".into(), "s1".into(), "s2".into()]
    }

    fn fast_policy(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            deadline: Some(Duration::from_secs(5)),
        }
    }

    fn router(t: &Arc<FakeTransport>, level: ConsistencyLevel) -> ConsistencyRouter<FakeTransport> {
        ConsistencyRouter::new(t.clone(), servers(), level)
            .unwrap()
            .with_policy(fast_policy(Some(20)))
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let t = Arc::new(FakeTransport::default());
        assert!(matches!(
            ConsistencyRouter::new(t, vec![], ConsistencyLevel::Strong),
            Err(HkvError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn strong_put_finds_and_caches_the_leader() {
        let t = FakeTransport::with(|s| s.leader = Some("s2".into()));
        let mut r = router(&t, ConsistencyLevel::Strong);

        r.put(0, "k", "v").await.unwrap();
        assert_eq!(t.calls(), ["s0", "s1", "s2"]);
        assert_eq!(r.leader(), "s2");

        // the next call goes straight to the cached leader
        assert_eq!(r.get(0, "k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(t.calls().len(), 4);
        assert_eq!(t.calls()[3], "s2");
    }

    #[tokio::test]
    async fn strong_path_skips_unreachable_servers() {
        let t = FakeTransport::with(|s| {
            s.leader = Some("s1".into());
            s.down.insert("s0".into());
        });
        let mut r = router(&t, ConsistencyLevel::Strong);
        r.put(0, "k", "v").await.unwrap();
        assert_eq!(r.leader(), "s1");
    }

    #[tokio::test]
    async fn each_put_gets_a_fresh_sequence() {
        let t = FakeTransport::with(|s| s.leader = Some("s0".into()));
        let mut r = router(&t, ConsistencyLevel::Strong);
        r.put(0, "a", "1").await.unwrap();
        r.put(0, "b", "2").await.unwrap();
        let writes = t.0.lock().unwrap().writes.clone();
        assert_eq!(writes.iter().map(|w| w.sequence).collect::<Vec<_>>(), [1, 2]);
        assert!(writes.iter().all(|w| w.client_id == r.client_id()));
    }

    #[tokio::test]
    async fn no_leader_exhausts_attempts() {
        let t = Arc::new(FakeTransport::default());
        let mut r = ConsistencyRouter::new(t.clone(), servers(), ConsistencyLevel::Strong)
            .unwrap()
            .with_policy(fast_policy(Some(5)));
        let err = r.put(0, "k", "v").await.unwrap_err();
        assert!(matches!(err, HkvError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(t.calls().len(), 5);
    }

    #[tokio::test]
    async fn consensus_timeout_is_surfaced_without_retry() {
        let t = FakeTransport::with(|s| {
            s.leader = Some("s0".into());
            s.timeout = true;
        });
        let mut r = router(&t, ConsistencyLevel::Strong);
        let err = r.put(0, "k", "v").await.unwrap_err();
        assert!(matches!(err, HkvError::ConsensusTimeout { .. }));
        assert_eq!(t.calls().len(), 1);
    }

    #[tokio::test]
    async fn causal_put_starts_at_hint_and_adopts_clock() {
        let t = Arc::new(FakeTransport::default());
        let mut r = router(&t, ConsistencyLevel::Causal);
        r.put(4, "k", "v").await.unwrap();
        assert_eq!(t.calls(), ["s1"]);
        assert_eq!(r.clock().get("s1"), 1);
    }

    #[tokio::test]
    async fn causal_get_skips_stale_replicas_and_merges_clock() {
        let t = FakeTransport::with(|s| {
            s.stale.insert("s0".into());
            s.data.insert("k".into(), "v".into());
        });
        let mut r = router(&t, ConsistencyLevel::Causal);
        assert_eq!(r.get(0, "k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(t.calls(), ["s0", "s1"]);
        assert_eq!(r.clock().get("s1"), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_a_hung_call() {
        let t = FakeTransport::with(|s| s.hang = true);
        let cancel = CancellationToken::new();
        let mut r = router(&t, ConsistencyLevel::Strong).with_cancellation(cancel.clone());

        let call = tokio::spawn(async move { r.get(0, "k").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(call.await.unwrap(), Err(HkvError::Cancelled));
    }

    #[tokio::test]
    async fn deadline_bounds_retries_without_attempt_cap() {
        let t = Arc::new(FakeTransport::default());
        let mut r = ConsistencyRouter::new(t, servers(), ConsistencyLevel::Strong)
            .unwrap()
            .with_policy(RetryPolicy {
                deadline: Some(Duration::from_millis(50)),
                ..fast_policy(None)
            });
        assert_eq!(r.put(0, "k", "v").await, Err(HkvError::DeadlineExceeded));
    }
}
