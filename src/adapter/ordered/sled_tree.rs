//! `sled::Tree` as an ordered store.

use std::path::Path;

use async_trait::async_trait;

use super::driver::{BatchOp, OrderedStoreDriver};
use super::OrderedStoreAdapter;
use crate::error::AdapterError;

impl From<sled::Error> for AdapterError {
    fn from(err: sled::Error) -> Self {
        AdapterError::Driver(err.to_string())
    }
}

fn key_string(key: sled::IVec) -> Result<String, AdapterError> {
    String::from_utf8(key.to_vec())
        .map_err(|err| AdapterError::Driver(format!("non-UTF-8 key in tree: {err}")))
}

#[async_trait]
impl OrderedStoreDriver for sled::Tree {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        Ok(sled::Tree::get(self, key)?.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AdapterError> {
        self.insert(key, value)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AdapterError> {
        self.remove(key)?;
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), AdapterError> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put(key, value) => batch.insert(key.as_str(), value),
                BatchOp::Delete(key) => batch.remove(key.as_str()),
            }
        }
        self.apply_batch(batch)?;
        Ok(())
    }

    async fn keys(&self, start: &str, end: &str) -> Result<Vec<String>, AdapterError> {
        if start >= end {
            return Ok(Vec::new());
        }
        self.range(start..end)
            .keys()
            .map(|key| key_string(key?))
            .collect()
    }
}

impl OrderedStoreAdapter<sled::Tree> {
    /// Opens (or creates) a sled database at `path` with one tree for
    /// records and one for attachment bodies.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let db = sled::open(path)?;
        Ok(Self::new(db.open_tree("records")?, db.open_tree("attachments")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tree_scans_by_range() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let tree = db.open_tree("records").unwrap();
        OrderedStoreDriver::put(&tree, "w:1", b"{}".to_vec()).await.unwrap();
        OrderedStoreDriver::put(&tree, "w:2", b"{}".to_vec()).await.unwrap();
        OrderedStoreDriver::put(&tree, "x:1", b"{}".to_vec()).await.unwrap();
        assert_eq!(
            OrderedStoreDriver::keys(&tree, "w:", "w;").await.unwrap(),
            vec!["w:1", "w:2"]
        );
    }
}
