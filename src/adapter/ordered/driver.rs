use async_trait::async_trait;

use crate::error::AdapterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// A sorted key-value keyspace (LevelDB-like).
#[async_trait]
pub trait OrderedStoreDriver: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AdapterError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AdapterError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), AdapterError>;

    /// Applies every operation or none.
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), AdapterError>;

    /// Keys in `[start, end)`, ascending.
    async fn keys(&self, start: &str, end: &str) -> Result<Vec<String>, AdapterError>;
}
