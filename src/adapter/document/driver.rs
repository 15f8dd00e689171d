use async_trait::async_trait;

use crate::error::AdapterError;

/// Id and revision of a document after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReceipt {
    pub id: String,
    pub rev: String,
}

/// A connected document-store client (CouchDB-like).
///
/// Documents are JSON objects carrying `_id` and `_rev`. Every write
/// produces a new revision, and writes naming a revision other than the
/// current one fail with [`AdapterError::Conflict`]. Fetched documents carry
/// their attachments as `_attachments` stubs.
#[async_trait]
pub trait DocumentStoreDriver: Send + Sync {
    /// Creates the database if it does not exist.
    async fn create_database(&self, db: &str) -> Result<(), AdapterError>;

    /// Creates or replaces a document. A missing id is generated.
    ///
    /// An `_attachments` object in `body` is applied entry by entry: stubs
    /// keep the stored attachment, `data` replaces it, empty `data` deletes
    /// it. Stored attachments not named are dropped.
    async fn save(
        &self,
        db: &str,
        id: Option<&str>,
        rev: Option<&str>,
        body: serde_json::Value,
    ) -> Result<DocumentReceipt, AdapterError>;

    async fn get(&self, db: &str, id: &str) -> Result<Option<serde_json::Value>, AdapterError>;

    /// One entry per id, in order.
    async fn get_many(
        &self,
        db: &str,
        ids: &[String],
    ) -> Result<Vec<Option<serde_json::Value>>, AdapterError>;

    /// Server-side field update of an existing document.
    async fn merge(
        &self,
        db: &str,
        id: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<DocumentReceipt, AdapterError>;

    async fn remove(&self, db: &str, id: &str, rev: &str) -> Result<(), AdapterError>;

    /// Every document id, design documents included.
    async fn all_ids(&self, db: &str) -> Result<Vec<String>, AdapterError>;

    async fn get_attachment(
        &self,
        db: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, AdapterError>;

    async fn save_attachment(
        &self,
        db: &str,
        id: &str,
        rev: Option<&str>,
        name: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<DocumentReceipt, AdapterError>;

    async fn remove_attachment(
        &self,
        db: &str,
        id: &str,
        rev: Option<&str>,
        name: &str,
    ) -> Result<DocumentReceipt, AdapterError>;
}
