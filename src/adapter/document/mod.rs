//! Document-store adapter (CouchDB-like engines).
//!
//! Each record is one document in a database named after the collection.
//! The engine assigns ids to new documents, so keyless instances can be
//! saved. The current revision travels in the model's `_rev` metadata and
//! every write must name it.

mod driver;
mod in_memory;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, trace};

pub use driver::{DocumentReceipt, DocumentStoreDriver};
pub use in_memory::InMemoryDocumentStore;

use super::{Adapter, AdapterBinding, Payload, SaveReceipt, StorageOptions, REVISION_META};
use crate::attachment::Attachment;
use crate::error::AdapterError;
use crate::model::{Model, ModelClass};
use crate::value::{Record, Value};

const DESIGN_PREFIX: &str = "_design/";

pub struct DocumentStoreAdapter<D> {
    driver: D,
    binding: AdapterBinding,
}

impl<D: DocumentStoreDriver> DocumentStoreAdapter<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            binding: AdapterBinding::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn database(&self) -> &str {
        self.binding.collection()
    }

    fn receipt(document: DocumentReceipt) -> SaveReceipt {
        SaveReceipt {
            key: Some(document.id),
            revision: Some(document.rev),
        }
    }

    fn inflate_document(&self, raw: &serde_json::Value) -> Result<Option<Model>, AdapterError> {
        let Some(object) = raw.as_object() else {
            return Ok(None);
        };
        let mut id = None;
        let mut rev = None;
        let mut record = Record::new();
        for (name, value) in object {
            match name.as_str() {
                "_id" => id = value.as_str().map(str::to_string),
                "_rev" => rev = value.as_str().map(str::to_string),
                _ => {
                    record.insert(name.clone(), Value::from_json(value.clone()));
                }
            }
        }
        let mut model = self.binding.inflate_record(id.as_deref(), record)?;
        if let Some(rev) = rev {
            model.set_meta(REVISION_META, rev);
        }
        Ok(Some(model))
    }

    async fn remove_key(&self, key: &str, rev: Option<String>) -> Result<(), AdapterError> {
        let rev = match rev {
            Some(rev) => rev,
            None => match self.driver.get(self.database(), key).await? {
                Some(doc) => doc
                    .get("_rev")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| AdapterError::Driver(format!("document {key} has no revision")))?,
                None => {
                    trace!(db = %self.database(), key, "nothing to remove");
                    return Ok(());
                }
            },
        };
        self.driver.remove(self.database(), key, &rev).await
    }
}

fn revision(model: &Model) -> Option<String> {
    model
        .meta(REVISION_META)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl<D> Adapter for DocumentStoreAdapter<D>
where
    D: DocumentStoreDriver + 'static,
{
    fn configure(&mut self, options: &StorageOptions, class: &ModelClass) -> Result<(), AdapterError> {
        self.binding = AdapterBinding::bind(options, class)?;
        Ok(())
    }

    fn generates_keys(&self) -> bool {
        true
    }

    async fn provision(&self) -> Result<(), AdapterError> {
        debug!(db = %self.database(), "creating database");
        self.driver.create_database(self.database()).await
    }

    /// Writes the whole document, attachments embedded.
    async fn save(&self, model: &Model, payload: &Payload) -> Result<SaveReceipt, AdapterError> {
        let key = model.key();
        let rev = revision(model);
        trace!(db = %self.database(), key = ?key, rev = ?rev, "saving document");
        let document = self
            .driver
            .save(self.database(), key.as_deref(), rev.as_deref(), payload.to_json())
            .await?;
        Ok(Self::receipt(document))
    }

    async fn get(&self, key: &str) -> Result<Option<Model>, AdapterError> {
        match self.driver.get(self.database(), key).await? {
            Some(document) => self.inflate_document(&document),
            None => Ok(None),
        }
    }

    async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<Model>>, AdapterError> {
        self.driver
            .get_many(self.database(), keys)
            .await?
            .iter()
            .map(|document| match document {
                Some(document) => self.inflate_document(document),
                None => Ok(None),
            })
            .collect()
    }

    /// Document ids, without design documents.
    async fn all(&self) -> Result<Vec<String>, AdapterError> {
        let ids = self.driver.all_ids(self.database()).await?;
        Ok(ids
            .into_iter()
            .filter(|id| !id.starts_with(DESIGN_PREFIX))
            .collect())
    }

    async fn merge(&self, key: &str, fields: &Record) -> Result<SaveReceipt, AdapterError> {
        let fields = fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        let document = self.driver.merge(self.database(), key, fields).await?;
        Ok(Self::receipt(document))
    }

    async fn remove(&self, model: &Model) -> Result<(), AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.remove_key(&key, revision(model)).await
    }

    async fn destroy_many(&self, keys: &[String]) -> Result<(), AdapterError> {
        try_join_all(keys.iter().map(|key| self.remove_key(key, None))).await?;
        Ok(())
    }

    async fn attachment(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        self.driver
            .get_attachment(self.database(), key, name)
            .await
    }

    async fn save_attachment(
        &self,
        model: &Model,
        name: &str,
        attachment: &Attachment,
    ) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        let rev = revision(model);
        let document = match &attachment.body {
            Some(body) => {
                self.driver
                    .save_attachment(
                        self.database(),
                        &key,
                        rev.as_deref(),
                        name,
                        &attachment.content_type,
                        body.as_bytes().to_vec(),
                    )
                    .await?
            }
            None => {
                self.driver
                    .remove_attachment(self.database(), &key, rev.as_deref(), name)
                    .await?
            }
        };
        Ok(Self::receipt(document))
    }

    async fn remove_attachment(&self, model: &Model, name: &str) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        let document = self
            .driver
            .remove_attachment(self.database(), &key, revision(model).as_deref(), name)
            .await?;
        Ok(Self::receipt(document))
    }

    /// Takes the key from `_id` and the revision from `_rev`.
    fn inflate(&self, raw: &serde_json::Value) -> Result<Option<Model>, AdapterError> {
        self.inflate_document(raw)
    }
}
