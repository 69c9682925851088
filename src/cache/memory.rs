use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheRecord, CacheStore};

/// Process-local cache backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    records: DashMap<String, CacheRecord>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<CacheRecord> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    async fn replace(&self, key: &str, record: CacheRecord) -> CacheRecord {
        self.records.insert(key.to_string(), record.clone());
        record
    }

    async fn remove(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    async fn clear(&self) -> bool {
        self.records.clear();
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;

    #[tokio::test]
    async fn test_replace_get_remove() {
        let store = MemoryCacheStore::new();
        assert!(store.get("a").await.is_none());

        let record = CacheRecord::new("a", 200, HeaderMap::new(), Bytes::from_static(b"one"));
        store.replace("a", record).await;
        let second = CacheRecord::new("a", 200, HeaderMap::new(), Bytes::from_static(b"two"));
        store.replace("a", second).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").await.unwrap().body, "two");
        assert!(store.remove("a").await);
        assert!(!store.remove("a").await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryCacheStore::new();
        for key in ["a", "b"] {
            store
                .replace(key, CacheRecord::new(key, 200, HeaderMap::new(), Bytes::new()))
                .await;
        }
        assert!(store.clear().await);
        assert!(store.is_empty());
    }
}
