//! HashMap-backed adapter for tests and development.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{
    record_from_json, Adapter, AdapterBinding, Payload, SaveReceipt, StorageOptions,
    ATTACHMENTS_FIELD,
};
use crate::attachment::{Attachment, AttachmentPayload};
use crate::error::AdapterError;
use crate::model::{Model, ModelClass};
use crate::value::{Record, Value};

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    fields: Record,
    /// Attachment name to content type and length.
    attachments: BTreeMap<String, (String, usize)>,
}

/// In-memory adapter.
///
/// Records are keyed by model key, attachment bodies by `"key:name"`.
/// Clones share storage, so a test can keep a handle after passing the
/// adapter to `set_storage`.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    records: Arc<RwLock<HashMap<String, StoredRecord>>>,
    bodies: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    calls: Arc<AtomicUsize>,
    binding: AdapterBinding,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of storage calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored fields for `key`, as JSON.
    pub fn raw(&self, key: &str) -> Option<serde_json::Value> {
        let records = self.records.read().ok()?;
        records.get(key).map(|r| Value::Hash(r.fields.clone()).to_json())
    }

    pub fn has_attachment(&self, key: &str, name: &str) -> bool {
        self.bodies
            .read()
            .map(|b| b.contains_key(&Self::attachment_key(key, name)))
            .unwrap_or(false)
    }

    fn attachment_key(key: &str, name: &str) -> String {
        format!("{}:{}", key, name)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn inflate_stored(&self, key: &str, stored: StoredRecord) -> Result<Model, AdapterError> {
        let mut record = stored.fields;
        if !stored.attachments.is_empty() {
            let stubs = stored
                .attachments
                .into_iter()
                .map(|(name, (content_type, length))| {
                    let stub = AttachmentPayload {
                        content_type,
                        data: None,
                        length,
                        stub: true,
                    };
                    (name, Value::from(serde_json::to_value(stub).unwrap_or_default()))
                })
                .collect();
            record.insert(ATTACHMENTS_FIELD.to_string(), Value::Hash(stubs));
        }
        self.binding.inflate_record(Some(key), record)
    }

    fn write_attachment(
        &self,
        key: &str,
        name: &str,
        payload: &AttachmentPayload,
        stored: &mut StoredRecord,
    ) -> Result<(), AdapterError> {
        let mut bodies = self
            .bodies
            .write()
            .map_err(|_| AdapterError::LockPoisoned("memory attachment write"))?;
        let body_key = Self::attachment_key(key, name);
        match payload.body()? {
            Some(body) => {
                stored
                    .attachments
                    .insert(name.to_string(), (payload.content_type.clone(), body.len()));
                bodies.insert(body_key, body);
            }
            None => {
                stored.attachments.remove(name);
                bodies.remove(&body_key);
            }
        }
        Ok(())
    }

    fn remove_key(&self, key: &str) -> Result<(), AdapterError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| AdapterError::LockPoisoned("memory remove"))?;
        let Some(stored) = records.remove(key) else {
            return Ok(());
        };
        let mut bodies = self
            .bodies
            .write()
            .map_err(|_| AdapterError::LockPoisoned("memory attachment remove"))?;
        for name in stored.attachments.keys() {
            bodies.remove(&Self::attachment_key(key, name));
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn configure(&mut self, options: &StorageOptions, class: &ModelClass) -> Result<(), AdapterError> {
        self.binding = AdapterBinding::bind(options, class)?;
        Ok(())
    }

    async fn provision(&self) -> Result<(), AdapterError> {
        self.tick();
        Ok(())
    }

    async fn save(&self, model: &Model, payload: &Payload) -> Result<SaveReceipt, AdapterError> {
        self.tick();
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        let mut stored = {
            let records = self
                .records
                .read()
                .map_err(|_| AdapterError::LockPoisoned("memory read"))?;
            records.get(&key).cloned().unwrap_or_default()
        };
        stored.fields = payload.fields.clone();
        for (name, attachment) in payload.dirty_attachments() {
            self.write_attachment(&key, name, attachment, &mut stored)?;
        }
        self.records
            .write()
            .map_err(|_| AdapterError::LockPoisoned("memory write"))?
            .insert(key, stored);
        Ok(SaveReceipt::default())
    }

    async fn get(&self, key: &str) -> Result<Option<Model>, AdapterError> {
        self.tick();
        let stored = {
            let records = self
                .records
                .read()
                .map_err(|_| AdapterError::LockPoisoned("memory read"))?;
            records.get(key).cloned()
        };
        stored.map(|s| self.inflate_stored(key, s)).transpose()
    }

    async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<Model>>, AdapterError> {
        let mut models = Vec::with_capacity(keys.len());
        for key in keys {
            models.push(self.get(key).await?);
        }
        Ok(models)
    }

    async fn all(&self) -> Result<Vec<String>, AdapterError> {
        self.tick();
        let records = self
            .records
            .read()
            .map_err(|_| AdapterError::LockPoisoned("memory read"))?;
        let mut keys: Vec<String> = records.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn merge(&self, key: &str, fields: &Record) -> Result<SaveReceipt, AdapterError> {
        self.tick();
        let mut records = self
            .records
            .write()
            .map_err(|_| AdapterError::LockPoisoned("memory write"))?;
        let stored = records
            .get_mut(key)
            .ok_or_else(|| self.binding.not_found(key))?;
        stored
            .fields
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(SaveReceipt::default())
    }

    async fn remove(&self, model: &Model) -> Result<(), AdapterError> {
        self.tick();
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.remove_key(&key)
    }

    async fn destroy_many(&self, keys: &[String]) -> Result<(), AdapterError> {
        self.tick();
        for key in keys {
            self.remove_key(key)?;
        }
        Ok(())
    }

    async fn attachment(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        self.tick();
        let bodies = self
            .bodies
            .read()
            .map_err(|_| AdapterError::LockPoisoned("memory attachment read"))?;
        Ok(bodies.get(&Self::attachment_key(key, name)).cloned())
    }

    async fn save_attachment(
        &self,
        model: &Model,
        name: &str,
        attachment: &Attachment,
    ) -> Result<SaveReceipt, AdapterError> {
        self.tick();
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        let payload = attachment.to_payload();
        let mut records = self
            .records
            .write()
            .map_err(|_| AdapterError::LockPoisoned("memory write"))?;
        let stored = records.entry(key.clone()).or_default();
        self.write_attachment(&key, name, &payload, stored)?;
        Ok(SaveReceipt::default())
    }

    async fn remove_attachment(&self, model: &Model, name: &str) -> Result<SaveReceipt, AdapterError> {
        self.tick();
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        if let Some(stored) = self
            .records
            .write()
            .map_err(|_| AdapterError::LockPoisoned("memory write"))?
            .get_mut(&key)
        {
            stored.attachments.remove(name);
        }
        self.bodies
            .write()
            .map_err(|_| AdapterError::LockPoisoned("memory attachment remove"))?
            .remove(&Self::attachment_key(&key, name));
        Ok(SaveReceipt::default())
    }

    fn inflate(&self, raw: &serde_json::Value) -> Result<Option<Model>, AdapterError> {
        match record_from_json(raw) {
            Some(record) => self.binding.inflate_record(None, record).map(Some),
            None => Ok(None),
        }
    }
}
