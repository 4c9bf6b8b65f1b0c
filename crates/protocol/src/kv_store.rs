use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Async, byte-string key/value storage used for keyshares and other
/// session state that must survive process restarts.
///
/// Keys are opaque strings; implementations are expected to support
/// prefix scans so callers can enumerate e.g. every keyshare for a
/// group without a separate index.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, overwriting any existing value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove the value stored under `key`, if any.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List every key starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory reference implementation of [`KeyValueStore`].
///
/// Suitable for tests and for single-process deployments that accept
/// losing state on restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("a", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_value() {
        let store = MemoryStore::new();
        store.set("a", vec![1]).await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_keys_filters_by_prefix() {
        let store = MemoryStore::new();
        store.set("keyshare_g1_0", vec![1]).await.unwrap();
        store.set("keyshare_g1_0.bak", vec![2]).await.unwrap();
        store.set("keyshare_g2_0", vec![3]).await.unwrap();
        let mut keys = store.list_keys("keyshare_g1_0").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["keyshare_g1_0", "keyshare_g1_0.bak"]);
    }
}
