use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use hkv_types::HkvError;

use crate::traits::LocalStore;

/// In-memory `LocalStore` backed by a `BTreeMap`.
///
/// Intended for unit tests; not persisted across restarts.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore { inner: Arc::new(RwLock::new(BTreeMap::new())) }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemStore {
    async fn get(&self, key: &str) -> Result<Option<String>, HkvError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), HkvError> {
        self.inner.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
