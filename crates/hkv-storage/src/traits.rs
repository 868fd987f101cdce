use std::future::Future;

use hkv_types::HkvError;

/// Durable point read/write store that committed and causal writes land in.
///
/// Methods use RPITIT (`-> impl Future + Send`) matching the `ReplicatedLog`
/// trait style in `hkv-consensus`. Per-key atomicity is whatever the
/// implementation provides; callers add their own serialization on top.
pub trait LocalStore: Send + Sync + 'static {
    /// Return the current value, or `None` if the key was never written.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, HkvError>> + Send;

    /// Overwrite `key` with `value`. Durable once the future resolves.
    fn put(&self, key: &str, value: &str) -> impl Future<Output = Result<(), HkvError>> + Send;
}
