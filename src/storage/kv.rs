use std::{
    collections::HashMap,
    future::Future,
    ops::Deref,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;

use crate::error::StoreError;

/// Interface for abstracting the durable key-value namespace the tracker persists into.
/// Values are JSON documents. Batch operations let callers read a whole date range in one go.
pub trait KeyValueStore {
    /// Reads the given keys. Missing keys are simply absent from the result.
    fn get(&self, keys: &[String]) -> impl Future<Output = Result<HashMap<String, Value>, StoreError>>;

    /// Writes all entries or none of them. [super::file_store::FileStore] stages every entry
    /// before replacing any target.
    fn set(&self, entries: Vec<(String, Value)>) -> impl Future<Output = Result<(), StoreError>>;

    /// Removes the given keys, returning how many existed.
    fn remove(&self, keys: &[String]) -> impl Future<Output = Result<usize, StoreError>>;

    fn keys(&self) -> impl Future<Output = Result<Vec<String>, StoreError>>;
}

impl<T: Deref> KeyValueStore for T
where
    T::Target: KeyValueStore,
{
    fn get(&self, keys: &[String]) -> impl Future<Output = Result<HashMap<String, Value>, StoreError>> {
        self.deref().get(keys)
    }

    fn set(&self, entries: Vec<(String, Value)>) -> impl Future<Output = Result<(), StoreError>> {
        self.deref().set(entries)
    }

    fn remove(&self, keys: &[String]) -> impl Future<Output = Result<usize, StoreError>> {
        self.deref().remove(keys)
    }

    fn keys(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> {
        self.deref().keys()
    }
}

/// In-process store. Optionally enforces a byte quota over the serialized size of all values,
/// which is how quota failures are exercised without a real disk.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    quota: Mutex<Option<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            values: Mutex::default(),
            quota: Mutex::new(Some(quota)),
        }
    }

    pub fn set_quota(&self, quota: Option<u64>) {
        *lock(&self.quota) = quota;
    }

    fn size_of(values: &HashMap<String, Value>) -> u64 {
        values
            .iter()
            .map(|(key, value)| (key.len() + value.to_string().len()) as u64)
            .sum()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Value>, StoreError> {
        let values = lock(&self.values);
        Ok(keys
            .iter()
            .filter_map(|key| values.get(key).map(|v| (key.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut values = lock(&self.values);
        let mut updated = values.clone();
        updated.extend(entries);

        if let Some(quota) = *lock(&self.quota) {
            let required = Self::size_of(&updated);
            if required > quota {
                return Err(StoreError::QuotaExceeded { required, quota });
            }
        }

        *values = updated;
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut values = lock(&self.values);
        Ok(keys.iter().filter(|key| values.remove(*key).is_some()).count())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.values).keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use serde_json::json;

    use crate::error::StoreError;

    use super::{KeyValueStore, MemoryStore};

    #[tokio::test]
    async fn test_memory_store_basic() -> Result<()> {
        let store = MemoryStore::new();
        store
            .set(vec![("a".into(), json!(1)), ("b".into(), json!({"x": 2}))])
            .await?;

        let values = store.get(&["a".to_string(), "missing".to_string()]).await?;
        assert_eq!(values.len(), 1);
        assert_eq!(values["a"], json!(1));

        assert_eq!(store.remove(&["a".to_string(), "missing".to_string()]).await?, 1);
        assert_eq!(store.keys().await?, vec!["b".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_quota_rejects_whole_write() -> Result<()> {
        let store = MemoryStore::with_quota(16);
        store.set(vec![("a".into(), json!(1))]).await?;

        let result = store
            .set(vec![
                ("b".into(), json!(2)),
                ("c".into(), json!("a long value that does not fit")),
            ])
            .await;

        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));
        assert!(store.get(&["b".to_string()]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_shared_store_through_arc() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let handle = store.clone();
        handle.set(vec![("k".into(), json!(true))]).await?;
        assert_eq!(store.get(&["k".to_string()]).await?["k"], json!(true));
        Ok(())
    }
}
