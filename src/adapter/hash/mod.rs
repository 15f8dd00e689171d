//! Hash-store adapter (Redis-like engines).
//!
//! Layout for a collection `widgets` and key `k1`:
//!
//! - `widgets:k1` is a hash with one JSON-encoded value per property
//! - `widgets:k1:attaches` is a hash with one JSON attachment record per name
//! - `widgets:ids` is the set of stored keys

mod driver;
mod in_memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

pub use driver::{HashCommand, HashReply, HashStoreDriver};
pub use in_memory::InMemoryHashStore;

use super::{Adapter, AdapterBinding, Payload, SaveReceipt, StorageOptions, ATTACHMENTS_FIELD};
use crate::attachment::{Attachment, AttachmentPayload};
use crate::error::AdapterError;
use crate::model::{Model, ModelClass};
use crate::value::{Record, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAttachment {
    name: String,
    content_type: String,
    length: usize,
    body: String,
}

pub struct HashStoreAdapter<D> {
    driver: D,
    binding: AdapterBinding,
}

impl<D: HashStoreDriver> HashStoreAdapter<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            binding: AdapterBinding::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn hash_key(&self, key: &str) -> String {
        format!("{}:{}", self.binding.collection(), key)
    }

    pub fn attachment_key(&self, key: &str) -> String {
        format!("{}:{}:attaches", self.binding.collection(), key)
    }

    pub fn ids_key(&self) -> String {
        format!("{}:ids", self.binding.collection())
    }

    /// JSON-encodes each field value.
    pub fn encode_fields(fields: &Record) -> Result<Vec<(String, String)>, AdapterError> {
        fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), serde_json::to_string(value)?)))
            .collect()
    }

    /// Decodes each field as JSON, keeping the raw string when it is not
    /// valid JSON.
    pub fn decode_fields(raw: BTreeMap<String, String>) -> Record {
        raw.into_iter()
            .map(|(name, text)| {
                let value = decode_field(&name, text);
                (name, value)
            })
            .collect()
    }

    fn attachment_command(
        &self,
        key: &str,
        name: &str,
        payload: &AttachmentPayload,
    ) -> Result<HashCommand, AdapterError> {
        let attach_key = self.attachment_key(key);
        match payload.body()? {
            Some(body) => {
                let stored = StoredAttachment {
                    name: name.to_string(),
                    content_type: payload.content_type.clone(),
                    length: body.len(),
                    body: STANDARD.encode(&body),
                };
                Ok(HashCommand::HSet(
                    attach_key,
                    name.to_string(),
                    serde_json::to_string(&stored)?,
                ))
            }
            None => Ok(HashCommand::HDel(attach_key, name.to_string())),
        }
    }

    /// Attachment metadata as an `_attachments` record of stubs.
    fn attachment_stubs(raw: BTreeMap<String, String>) -> Record {
        raw.into_iter()
            .filter_map(|(name, text)| match serde_json::from_str::<StoredAttachment>(&text) {
                Ok(stored) => {
                    let stub = AttachmentPayload {
                        content_type: stored.content_type,
                        data: None,
                        length: stored.length,
                        stub: true,
                    };
                    let stub = serde_json::to_value(stub).ok()?;
                    Some((name, Value::from(stub)))
                }
                Err(err) => {
                    warn!(attachment = %name, error = %err, "skipping unreadable attachment record");
                    None
                }
            })
            .collect()
    }

    fn inflate_native(
        &self,
        key: &str,
        fields: BTreeMap<String, String>,
        attachments: BTreeMap<String, String>,
    ) -> Result<Option<Model>, AdapterError> {
        if fields.is_empty() {
            return Ok(None);
        }
        let mut record = Self::decode_fields(fields);
        if !attachments.is_empty() {
            record.insert(
                ATTACHMENTS_FIELD.to_string(),
                Value::Hash(Self::attachment_stubs(attachments)),
            );
        }
        self.binding.inflate_record(Some(key), record).map(Some)
    }

    fn read_commands(&self, key: &str) -> [HashCommand; 2] {
        [
            HashCommand::HGetAll(self.hash_key(key)),
            HashCommand::HGetAll(self.attachment_key(key)),
        ]
    }
}

fn decode_field(name: &str, text: String) -> Value {
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => Value::from_json(json),
        Err(_) => {
            trace!(field = %name, "field is not JSON; keeping raw string");
            Value::String(text)
        }
    }
}

fn next_reply(replies: &mut impl Iterator<Item = HashReply>) -> Result<HashReply, AdapterError> {
    replies
        .next()
        .ok_or_else(|| AdapterError::Driver("pipeline returned too few replies".into()))
}

#[async_trait]
impl<D> Adapter for HashStoreAdapter<D>
where
    D: HashStoreDriver + 'static,
{
    fn configure(&mut self, options: &StorageOptions, class: &ModelClass) -> Result<(), AdapterError> {
        self.binding = AdapterBinding::bind(options, class)?;
        Ok(())
    }

    /// Hashes need no schema.
    async fn provision(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn save(&self, model: &Model, payload: &Payload) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        let mut commands = vec![HashCommand::SAdd(self.ids_key(), key.clone())];
        let fields = Self::encode_fields(&payload.fields)?;
        if !fields.is_empty() {
            commands.push(HashCommand::HMSet(self.hash_key(&key), fields));
        }
        for (name, attachment) in payload.dirty_attachments() {
            commands.push(self.attachment_command(&key, name, attachment)?);
        }
        trace!(key = %key, commands = commands.len(), "hash store save");
        self.driver.exec(commands).await?;
        Ok(SaveReceipt::default())
    }

    async fn get(&self, key: &str) -> Result<Option<Model>, AdapterError> {
        let replies = self.driver.exec(self.read_commands(key).to_vec()).await?;
        let mut replies = replies.into_iter();
        let fields = next_reply(&mut replies)?.into_hash()?;
        let attachments = next_reply(&mut replies)?.into_hash()?;
        self.inflate_native(key, fields, attachments)
    }

    async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<Model>>, AdapterError> {
        let commands = keys.iter().flat_map(|key| self.read_commands(key)).collect();
        let mut replies = self.driver.exec(commands).await?.into_iter();
        let mut models = Vec::with_capacity(keys.len());
        for key in keys {
            let fields = next_reply(&mut replies)?.into_hash()?;
            let attachments = next_reply(&mut replies)?.into_hash()?;
            models.push(self.inflate_native(key, fields, attachments)?);
        }
        Ok(models)
    }

    async fn all(&self) -> Result<Vec<String>, AdapterError> {
        let mut keys = self
            .driver
            .query(HashCommand::SMembers(self.ids_key()))
            .await?
            .into_members()?;
        keys.sort();
        Ok(keys)
    }

    /// Field-level write; fields not named are untouched.
    async fn merge(&self, key: &str, fields: &Record) -> Result<SaveReceipt, AdapterError> {
        let encoded = Self::encode_fields(fields)?;
        if !encoded.is_empty() {
            self.driver
                .query(HashCommand::HMSet(self.hash_key(key), encoded))
                .await?;
        }
        Ok(SaveReceipt::default())
    }

    async fn remove(&self, model: &Model) -> Result<(), AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.driver
            .exec(vec![
                HashCommand::Del(vec![self.hash_key(&key), self.attachment_key(&key)]),
                HashCommand::SRem(self.ids_key(), key),
            ])
            .await?;
        Ok(())
    }

    async fn destroy_many(&self, keys: &[String]) -> Result<(), AdapterError> {
        let doomed = keys
            .iter()
            .flat_map(|key| [self.hash_key(key), self.attachment_key(key)])
            .collect();
        let mut commands = vec![HashCommand::Del(doomed)];
        commands.extend(
            keys.iter()
                .map(|key| HashCommand::SRem(self.ids_key(), key.clone())),
        );
        self.driver.exec(commands).await?;
        Ok(())
    }

    async fn attachment(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        let reply = self
            .driver
            .query(HashCommand::HGet(self.attachment_key(key), name.to_string()))
            .await?
            .into_bulk()?;
        match reply {
            Some(text) => {
                let stored: StoredAttachment = serde_json::from_str(&text)?;
                Ok(Some(STANDARD.decode(stored.body)?))
            }
            None => Ok(None),
        }
    }

    async fn save_attachment(
        &self,
        model: &Model,
        name: &str,
        attachment: &Attachment,
    ) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        let command = self.attachment_command(&key, name, &attachment.to_payload())?;
        self.driver.query(command).await?;
        Ok(SaveReceipt::default())
    }

    async fn remove_attachment(&self, model: &Model, name: &str) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.driver
            .query(HashCommand::HDel(self.attachment_key(&key), name.to_string()))
            .await?;
        Ok(SaveReceipt::default())
    }

    /// Accepts a hash of field strings as the engine returns it; string
    /// values are JSON-decoded with the raw-string fallback.
    fn inflate(&self, raw: &serde_json::Value) -> Result<Option<Model>, AdapterError> {
        let Some(object) = raw.as_object() else {
            return Ok(None);
        };
        let record = object
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(text) => decode_field(name, text.clone()),
                    other => Value::from_json(other.clone()),
                };
                (name.clone(), value)
            })
            .collect();
        self.binding.inflate_record(None, record).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_falls_back_to_raw_strings() {
        let raw = BTreeMap::from([
            ("count".to_string(), "12".to_string()),
            ("name".to_string(), "\"fred\"".to_string()),
            ("bare".to_string(), "not json".to_string()),
        ]);
        let decoded = HashStoreAdapter::<InMemoryHashStore>::decode_fields(raw);
        assert_eq!(decoded["count"], Value::from(12));
        assert_eq!(decoded["name"], Value::from("fred"));
        assert_eq!(decoded["bare"], Value::from("not json"));
    }

    #[test]
    fn encode_writes_json_per_field() {
        let fields = Record::from([
            ("name".to_string(), Value::from("fred")),
            ("tags".to_string(), Value::from(vec!["a", "b"])),
        ]);
        let encoded = HashStoreAdapter::<InMemoryHashStore>::encode_fields(&fields).unwrap();
        assert_eq!(
            encoded,
            vec![
                ("name".to_string(), "\"fred\"".to_string()),
                ("tags".to_string(), "[\"a\",\"b\"]".to_string()),
            ]
        );
    }
}
