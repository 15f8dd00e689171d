//! Ordered key-value adapter (LevelDB-like embedded engines).
//!
//! Records are JSON documents at `<db>:<key>` in the record keyspace.
//! Attachment bodies are raw bytes at `<db>:<key>:<name>` in a separate
//! attachment keyspace.

mod driver;
mod in_memory;
#[cfg(feature = "sled")]
mod sled_tree;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, trace};

pub use driver::{BatchOp, OrderedStoreDriver};
pub use in_memory::InMemoryOrderedStore;

use super::{record_from_json, Adapter, AdapterBinding, Payload, SaveReceipt, StorageOptions};
use crate::attachment::{Attachment, AttachmentPayload};
use crate::error::AdapterError;
use crate::model::{Model, ModelClass};
use crate::value::Record;

pub struct OrderedStoreAdapter<D> {
    records: D,
    attachments: D,
    binding: AdapterBinding,
}

impl<D: OrderedStoreDriver> OrderedStoreAdapter<D> {
    pub fn new(records: D, attachments: D) -> Self {
        Self {
            records,
            attachments,
            binding: AdapterBinding::default(),
        }
    }

    pub fn records(&self) -> &D {
        &self.records
    }

    pub fn attachments(&self) -> &D {
        &self.attachments
    }

    fn prefix(&self) -> String {
        format!("{}:", self.binding.collection())
    }

    /// Namespaced record key. Keys that already carry the namespace are
    /// kept as they are.
    pub fn record_key(&self, key: &str) -> String {
        let prefix = self.prefix();
        if key.starts_with(&prefix) {
            key.to_string()
        } else {
            format!("{prefix}{key}")
        }
    }

    pub fn attachment_key(&self, key: &str, name: &str) -> String {
        format!("{}:{}", self.record_key(key), name)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Result<Record, AdapterError> {
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        record_from_json(&json)
            .ok_or_else(|| AdapterError::Serde(format!("record {key} is not an object")))
    }

    fn attachment_op(
        &self,
        key: &str,
        name: &str,
        payload: &AttachmentPayload,
    ) -> Result<BatchOp, AdapterError> {
        let attach_key = self.attachment_key(key, name);
        Ok(match payload.body()? {
            Some(body) => BatchOp::Put(attach_key, body),
            None => BatchOp::Delete(attach_key),
        })
    }

    async fn remove_key(&self, key: &str) -> Result<(), AdapterError> {
        let record_key = self.record_key(key);
        self.records.delete(&record_key).await?;

        let start = format!("{record_key}:");
        let end = format!("{record_key};");
        let attached = self.attachments.keys(&start, &end).await?;
        if !attached.is_empty() {
            trace!(key = %record_key, count = attached.len(), "removing attachments");
            self.attachments
                .batch(attached.into_iter().map(BatchOp::Delete).collect())
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<D> Adapter for OrderedStoreAdapter<D>
where
    D: OrderedStoreDriver + 'static,
{
    fn configure(&mut self, options: &StorageOptions, class: &ModelClass) -> Result<(), AdapterError> {
        self.binding = AdapterBinding::bind(options, class)?;
        Ok(())
    }

    async fn provision(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn save(&self, model: &Model, payload: &Payload) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        let record_key = self.record_key(&key);
        debug!(key = %record_key, "ordered store put");
        self.records
            .put(&record_key, serde_json::to_vec(&payload.fields)?)
            .await?;

        let mut ops = Vec::new();
        for (name, attachment) in payload.dirty_attachments() {
            ops.push(self.attachment_op(&key, name, attachment)?);
        }
        if !ops.is_empty() {
            self.attachments.batch(ops).await?;
        }
        Ok(SaveReceipt::default())
    }

    async fn get(&self, key: &str) -> Result<Option<Model>, AdapterError> {
        let record_key = self.record_key(key);
        let Some(bytes) = self.records.get(&record_key).await? else {
            return Ok(None);
        };
        let record = self.decode(&record_key, &bytes)?;
        let key = key.strip_prefix(&self.prefix()).unwrap_or(key);
        self.binding.inflate_record(Some(key), record).map(Some)
    }

    async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<Model>>, AdapterError> {
        try_join_all(keys.iter().map(|key| self.get(key))).await
    }

    async fn all(&self) -> Result<Vec<String>, AdapterError> {
        let prefix = self.prefix();
        let end = format!("{};", self.binding.collection());
        let keys = self.records.keys(&prefix, &end).await?;
        Ok(keys
            .into_iter()
            .map(|key| key[prefix.len()..].to_string())
            .collect())
    }

    /// Read-modify-write of the stored document.
    async fn merge(&self, key: &str, fields: &Record) -> Result<SaveReceipt, AdapterError> {
        let record_key = self.record_key(key);
        let bytes = self
            .records
            .get(&record_key)
            .await?
            .ok_or_else(|| self.binding.not_found(key))?;
        let mut record = self.decode(&record_key, &bytes)?;
        record.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.records
            .put(&record_key, serde_json::to_vec(&record)?)
            .await?;
        Ok(SaveReceipt::default())
    }

    async fn remove(&self, model: &Model) -> Result<(), AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.remove_key(&key).await
    }

    async fn destroy_many(&self, keys: &[String]) -> Result<(), AdapterError> {
        try_join_all(keys.iter().map(|key| self.remove_key(key))).await?;
        Ok(())
    }

    async fn attachment(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        self.attachments.get(&self.attachment_key(key, name)).await
    }

    async fn save_attachment(
        &self,
        model: &Model,
        name: &str,
        attachment: &Attachment,
    ) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        match self.attachment_op(&key, name, &attachment.to_payload())? {
            BatchOp::Put(attach_key, body) => self.attachments.put(&attach_key, body).await?,
            BatchOp::Delete(attach_key) => self.attachments.delete(&attach_key).await?,
        }
        Ok(SaveReceipt::default())
    }

    async fn remove_attachment(&self, model: &Model, name: &str) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.attachments
            .delete(&self.attachment_key(&key, name))
            .await?;
        Ok(SaveReceipt::default())
    }

    fn inflate(&self, raw: &serde_json::Value) -> Result<Option<Model>, AdapterError> {
        match record_from_json(raw) {
            Some(record) => self.binding.inflate_record(None, record).map(Some),
            None => Ok(None),
        }
    }
}
