//! The storage adapter contract and the pieces every adapter shares.
//!
//! An adapter owns the mapping between a model's flat property set and one
//! engine's native shape. The persistence layer drives it through
//! [`Adapter`]; each engine sits behind its own driver trait so tests and
//! embedders can hand in a connected handle.

pub mod column;
pub mod document;
pub mod hash;
pub mod memory;
pub mod ordered;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::attachment::{Attachment, AttachmentPayload};
use crate::error::AdapterError;
use crate::model::{Model, ModelClass, WeakModelClass};
use crate::value::{Record, Value};

pub use column::{ColumnStoreAdapter, ColumnStoreDriver, InMemoryColumnStore};
pub use document::{DocumentStoreAdapter, DocumentStoreDriver, InMemoryDocumentStore};
pub use hash::{HashStoreAdapter, HashStoreDriver, InMemoryHashStore};
pub use memory::MemoryAdapter;
pub use ordered::{InMemoryOrderedStore, OrderedStoreAdapter, OrderedStoreDriver};

/// Key used for the embedded attachment map in the wire shape.
pub const ATTACHMENTS_FIELD: &str = "_attachments";

/// Model metadata entry holding the engine revision, for engines that
/// track one.
pub const REVISION_META: &str = "_rev";

/// Adapter options. Each adapter reads the keys it understands; the rest
/// are kept in `extra` and ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbpath: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, AdapterError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn with_dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_dbpath(mut self, dbpath: impl Into<PathBuf>) -> Self {
        self.dbpath = Some(dbpath.into());
        self
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }
}

/// What an adapter reports back from a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReceipt {
    /// Set when the engine generated the key.
    pub key: Option<String>,
    /// New revision, for engines that track them.
    pub revision: Option<String>,
}

impl SaveReceipt {
    pub fn keyed(key: impl Into<String>) -> Self {
        SaveReceipt {
            key: Some(key.into()),
            revision: None,
        }
    }
}

/// Serialized state handed to `save`/`update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub fields: Record,
    pub attachments: BTreeMap<String, AttachmentPayload>,
}

impl Payload {
    /// Serialized fields, plus the key under the key field when the key is
    /// not itself a property.
    pub fn from_model(model: &Model) -> Self {
        let mut fields = model.serialize();
        if let (Some(field), Some(key)) = (model.class().hidden_keyfield(), model.key()) {
            fields.insert(field, Value::String(key));
        }
        Payload {
            fields,
            attachments: model.serialize_attachments(),
        }
    }

    /// Fields plus an `_attachments` map when there are attachments.
    pub fn to_json(&self) -> serde_json::Value {
        let mut json = serde_json::Map::new();
        for (name, value) in &self.fields {
            json.insert(name.clone(), value.to_json());
        }
        if !self.attachments.is_empty() {
            let attachments = self
                .attachments
                .iter()
                .map(|(name, a)| Ok((name.clone(), serde_json::to_value(a)?)))
                .collect::<Result<serde_json::Map<_, _>, serde_json::Error>>()
                .unwrap_or_default();
            json.insert(
                ATTACHMENTS_FIELD.to_string(),
                serde_json::Value::Object(attachments),
            );
        }
        serde_json::Value::Object(json)
    }

    /// Attachments whose body changed since the last save.
    pub fn dirty_attachments(&self) -> impl Iterator<Item = (&String, &AttachmentPayload)> {
        self.attachments.iter().filter(|(_, a)| !a.stub)
    }
}

/// Hash input as a record; `None` for null and non-object input.
pub fn record_from_json(raw: &serde_json::Value) -> Option<Record> {
    match Value::from_json(raw.clone()) {
        Value::Hash(record) => Some(record),
        _ => None,
    }
}

/// The class an adapter serves and the collection name it resolved.
#[derive(Debug, Clone, Default)]
pub struct AdapterBinding {
    class: WeakModelClass,
    collection: String,
}

impl AdapterBinding {
    /// Collection is the `dbname` option, else the class plural.
    pub fn bind(options: &StorageOptions, class: &ModelClass) -> Result<Self, AdapterError> {
        let collection = options
            .dbname
            .clone()
            .or_else(|| class.plural().map(str::to_string))
            .ok_or(AdapterError::MissingOption("dbname"))?;
        Ok(AdapterBinding {
            class: class.downgrade(),
            collection,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn class(&self) -> Result<ModelClass, AdapterError> {
        self.class.upgrade().ok_or(AdapterError::Unbound)
    }

    /// Builds an instance from a stored record, which may carry an
    /// `_attachments` map. Without an explicit key the key is taken from the
    /// record's hidden key field.
    pub fn inflate_record(
        &self,
        key: Option<&str>,
        mut record: Record,
    ) -> Result<Model, AdapterError> {
        let class = self.class()?;
        let stored_key = class
            .hidden_keyfield()
            .and_then(|field| record.remove(&field))
            .and_then(|value| match value {
                Value::String(key) if !key.is_empty() => Some(key),
                n @ Value::Number(_) => Some(n.to_string()),
                _ => None,
            });
        let mut model = class.create();
        if let Some(key) = key.map(str::to_string).or(stored_key) {
            model
                .set_key(key)
                .map_err(|e| AdapterError::Inflate(e.to_string()))?;
        }
        model
            .init_from_storage(record)
            .map_err(|e| AdapterError::Inflate(e.to_string()))?;
        Ok(model)
    }

    pub fn not_found(&self, key: &str) -> AdapterError {
        AdapterError::NotFound {
            collection: self.collection.clone(),
            key: key.to_string(),
        }
    }
}

/// Storage engine contract. One adapter instance is bound to one class.
///
/// Batch reads answer key `i` at position `i`, with `None` for missing keys,
/// and fail as a whole if any constituent read fails. `all` returns keys.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Binds the adapter to its class. Called once by `set_storage`.
    fn configure(&mut self, options: &StorageOptions, class: &ModelClass)
        -> Result<(), AdapterError>;

    /// Whether `save` assigns keys to keyless instances.
    fn generates_keys(&self) -> bool {
        false
    }

    /// Creates the backing structure if absent. Never drops data.
    async fn provision(&self) -> Result<(), AdapterError>;

    async fn save(&self, model: &Model, payload: &Payload) -> Result<SaveReceipt, AdapterError>;

    async fn update(&self, model: &Model, payload: &Payload) -> Result<SaveReceipt, AdapterError> {
        self.save(model, payload).await
    }

    async fn get(&self, key: &str) -> Result<Option<Model>, AdapterError>;

    async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<Model>>, AdapterError>;

    async fn all(&self) -> Result<Vec<String>, AdapterError>;

    /// Writes only `fields` for an existing record.
    async fn merge(&self, key: &str, fields: &Record) -> Result<SaveReceipt, AdapterError>;

    async fn remove(&self, model: &Model) -> Result<(), AdapterError>;

    /// Never called with an empty list.
    async fn destroy_many(&self, keys: &[String]) -> Result<(), AdapterError>;

    async fn attachment(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, AdapterError>;

    async fn save_attachment(
        &self,
        model: &Model,
        name: &str,
        attachment: &Attachment,
    ) -> Result<SaveReceipt, AdapterError>;

    async fn remove_attachment(&self, model: &Model, name: &str)
        -> Result<SaveReceipt, AdapterError>;

    /// Native record to instance. Null and non-object input yield `Ok(None)`.
    fn inflate(&self, raw: &serde_json::Value) -> Result<Option<Model>, AdapterError>;
}
