use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::driver::{BatchOp, OrderedStoreDriver};
use crate::error::AdapterError;

/// Sorted keyspace kept in process memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderedStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryOrderedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl OrderedStoreDriver for InMemoryOrderedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AdapterError::LockPoisoned("ordered store read"))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AdapterError> {
        self.entries
            .write()
            .map_err(|_| AdapterError::LockPoisoned("ordered store write"))?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AdapterError> {
        self.entries
            .write()
            .map_err(|_| AdapterError::LockPoisoned("ordered store write"))?
            .remove(key);
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), AdapterError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AdapterError::LockPoisoned("ordered store batch"))?;
        for op in ops {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn keys(&self, start: &str, end: &str) -> Result<Vec<String>, AdapterError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let entries = self
            .entries
            .read()
            .map_err(|_| AdapterError::LockPoisoned("ordered store scan"))?;
        Ok(entries
            .range(start.to_string()..end.to_string())
            .map(|(key, _)| key.clone())
            .collect())
    }
}
