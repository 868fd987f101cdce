use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use hkv_types::HkvError;

/// Bounds for a router call: attempt cap, backoff between passes over the
/// server list, and an overall deadline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `None` retries until the deadline or cancellation.
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: Some(32),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            deadline: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Sleep after the `pass`-th full sweep of the server list (0-based).
    pub fn backoff(&self, pass: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(pass.min(16));
        self.initial_backoff.saturating_mul(multiplier).min(self.max_backoff)
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Book-keeping for one router call.
pub(crate) struct Attempts {
    policy: RetryPolicy,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    servers: u32,
    attempts: u32,
}

impl Attempts {
    pub(crate) fn new(policy: RetryPolicy, cancel: CancellationToken, servers: usize) -> Self {
        let deadline = policy.deadline.map(|d| Instant::now() + d);
        Attempts {
            policy,
            cancel,
            deadline,
            servers: servers.max(1) as u32,
            attempts: 0,
        }
    }

    /// Race one RPC against cancellation and the deadline. The outer error
    /// ends the call; the inner result is the RPC's own.
    pub(crate) async fn run<R>(
        &self,
        rpc: impl Future<Output = Result<R, HkvError>>,
    ) -> Result<Result<R, HkvError>, HkvError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HkvError::Cancelled),
            _ = until(self.deadline) => Err(HkvError::DeadlineExceeded),
            res = rpc => Ok(res),
        }
    }

    /// Record a failed attempt. Returns an error when the call should stop;
    /// otherwise sleeps if a full pass over the servers just finished.
    pub(crate) async fn failed(&mut self, server: &str, err: HkvError) -> Result<(), HkvError> {
        if !err.is_retryable() {
            return Err(err);
        }
        self.attempts += 1;
        tracing::debug!(server, attempt = self.attempts, error = %err, "attempt failed");
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return Err(HkvError::RetriesExhausted {
                    attempts: self.attempts,
                    last_error: err.to_string(),
                });
            }
        }
        if self.attempts % self.servers == 0 {
            let pause = self.policy.backoff(self.attempts / self.servers - 1);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(HkvError::Cancelled),
                _ = until(self.deadline) => return Err(HkvError::DeadlineExceeded),
                _ = tokio::time::sleep(pause) => {}
            }
        }
        Ok(())
    }
}
