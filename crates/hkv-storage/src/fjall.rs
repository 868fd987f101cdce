use std::path::Path;
use std::sync::Arc;

use hkv_types::HkvError;

use crate::traits::LocalStore;

fn fjall_err(e: fjall::Error) -> HkvError {
    HkvError::Storage(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> HkvError {
    HkvError::Storage(e.to_string())
}

/// Database handle plus the single `data` keyspace (`key_utf8` → `value_utf8`).
pub struct FjallHandles {
    /// The underlying fjall database.
    pub db: fjall::Database,
    pub data: fjall::Keyspace,
}

/// `LocalStore` backed by fjall.
///
/// Cheap to clone. All blocking I/O is wrapped in
/// `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct FjallStore(pub Arc<FjallHandles>);

impl FjallStore {
    /// Open (or create) a `FjallStore` at `path`.
    pub fn open(path: &Path) -> Result<Self, HkvError> {
        let db = fjall::Database::builder(path).open().map_err(fjall_err)?;
        let data =
            db.keyspace("data", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        Ok(FjallStore(Arc::new(FjallHandles { db, data })))
    }
}

impl LocalStore for FjallStore {
    async fn get(&self, key: &str) -> Result<Option<String>, HkvError> {
        let store = self.0.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<String>, HkvError> {
            match store.data.get(key.as_bytes()).map_err(fjall_err)? {
                Some(b) => String::from_utf8(b.to_vec())
                    .map(Some)
                    .map_err(|e| HkvError::Storage(format!("value for '{key}': {e}"))),
                None => Ok(None),
            }
        })
        .await
        .map_err(join_err)?
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), HkvError> {
        let store = self.0.clone();
        let key = key.as_bytes().to_vec();
        let value = value.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), HkvError> {
            let mut batch = store.db.batch();
            batch.insert(&store.data, key, value);
            batch.commit().map_err(fjall_err)
        })
        .await
        .map_err(join_err)?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &std::path::Path) -> FjallStore {
        FjallStore::open(dir).expect("open store")
    }

    #[tokio::test]
    async fn put_and_get_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(store.get("k").await.unwrap().is_none());
        store.put("k", "v1").await.unwrap();
        store.put("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn durability() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.put("x", "persist").await.unwrap();
        }
        // Reopen at the same path.
        let store = open_store(dir.path());
        assert_eq!(store.get("x").await.unwrap().as_deref(), Some("persist"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_puts() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let mut handles = Vec::new();
        for i in 0u64..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put(&format!("k{i}"), &format!("v{i}")).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for i in 0u64..20 {
            let v = store.get(&format!("k{i}")).await.unwrap();
            assert_eq!(v, Some(format!("v{i}")));
        }
    }

    #[tokio::test]
    async fn non_utf8_value_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut batch = store.0.db.batch();
        batch.insert(&store.0.data, b"bad".to_vec(), vec![0xff, 0xfe]);
        batch.commit().unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, HkvError::Storage(_)));
    }
}
