use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::adapter::{Payload, SaveReceipt, ATTACHMENTS_FIELD, REVISION_META};
use crate::attachment::{Attachment, AttachmentBody, AttachmentPayload};
use crate::error::{AdapterError, Result, SchemaError, StateError};
use crate::model::events;
use crate::model::Model;
use crate::schema::{PropertyKind, PropertySpec};
use crate::value::{Record, Value};

impl Model {
    /// Writes the instance. New instances go through the adapter's `save`,
    /// loaded ones through `update`; a loaded instance with nothing dirty is
    /// a successful no-op.
    pub async fn save(&mut self) -> Result<SaveReceipt> {
        let adapter = self.class.adapter()?;
        if !self.is_new && !self.dirty && !self.has_dirty_attachments() {
            trace!(class = %self.class.name(), key = ?self.key(), "save skipped; nothing dirty");
            return Ok(SaveReceipt::default());
        }
        if !adapter.generates_keys() && self.key().is_none() {
            return Err(StateError::MissingKey.into());
        }

        if let Some(hook) = self.class.hooks().before_save.clone() {
            hook(self);
        }
        self.emit(events::BEFORE_SAVE, self.key().unwrap_or_default());

        let payload = Payload::from_model(self);
        debug!(class = %self.class.name(), key = ?self.key(), is_new = self.is_new, "saving model");
        let receipt = if self.is_new {
            adapter.save(self, &payload).await?
        } else {
            adapter.update(self, &payload).await?
        };

        self.apply_receipt(&receipt)?;
        self.attachments.retain(|_, a| !a.is_deletion());
        self.clear_dirty();
        self.is_new = false;

        self.emit(events::AFTER_SAVE, self.key().unwrap_or_default());
        if let Some(hook) = self.class.hooks().after_save.clone() {
            hook(self);
        }
        Ok(receipt)
    }

    /// Deletes the stored record. Fails on a keyless or already destroyed
    /// instance.
    pub async fn destroy(&mut self) -> Result<()> {
        let key = self.key().ok_or(StateError::MissingKey)?;
        if self.destroyed {
            return Err(StateError::AlreadyDestroyed(key).into());
        }
        let adapter = self.class.adapter()?;

        if let Some(hook) = self.class.hooks().before_destroy.clone() {
            hook(self);
        }
        self.emit(events::BEFORE_DESTROY, key.clone());
        debug!(class = %self.class.name(), key = %key, "destroying model");

        adapter.remove(self).await?;
        self.destroyed = true;
        self.emit(events::AFTER_DESTROY, key);
        Ok(())
    }

    /// Applies `partial` locally, then persists just those fields.
    ///
    /// If the adapter fails, attributes, snapshot and dirty flag go back to
    /// their state before the call and a `rollback` event fires. On success
    /// the instance is left clean only if it was clean before.
    pub async fn merge(&mut self, partial: &Record) -> Result<SaveReceipt> {
        let key = self.key().ok_or(StateError::MissingKey)?;
        let adapter = self.class.adapter()?;
        let checkpoint = self.checkpoint();
        let was_clean = !self.dirty;

        if let Err(err) = self.update_record(partial) {
            self.restore(checkpoint);
            return Err(err);
        }

        let fields = self.serialized_subset(partial);
        debug!(class = %self.class.name(), key = %key, fields = fields.len(), "merging");

        match adapter.merge(&key, &fields).await {
            Ok(receipt) => {
                self.apply_receipt(&receipt)?;
                if was_clean {
                    self.clear_dirty();
                }
                Ok(receipt)
            }
            Err(err) => {
                warn!(class = %self.class.name(), key = %key, error = %err, "merge failed; rolling back");
                self.restore(checkpoint);
                Err(err.into())
            }
        }
    }

    /// Loads a stored record into this instance. An `_attachments` entry
    /// becomes attachment metadata; everything else goes through
    /// [`Model::update_record`]. The instance ends up clean and not new.
    pub fn init_from_storage(&mut self, mut record: Record) -> Result<()> {
        if let Some(attachments) = record.remove(ATTACHMENTS_FIELD) {
            self.load_attachments(attachments)?;
        }
        // an unset enumerable is written as "" and must load as unset
        let class = self.class.clone();
        record.retain(|name, value| {
            let blank = value.is_null() || value.as_str() == Some("");
            let enumerable = matches!(
                class.property(name).map(PropertySpec::kind),
                Some(PropertyKind::Enumerable { .. })
            );
            !(blank && enumerable)
        });
        self.update_record(&record)?;
        self.is_new = false;
        self.destroyed = false;
        self.clear_dirty();
        if let Some(hook) = self.class.hooks().after_load.clone() {
            hook(self);
        }
        Ok(())
    }

    fn load_attachments(&mut self, attachments: Value) -> Result<()> {
        let Value::Hash(entries) = attachments else {
            return Ok(());
        };
        for (name, meta) in entries {
            let payload: AttachmentPayload =
                serde_json::from_value(meta.to_json()).map_err(AdapterError::from)?;
            let body = payload
                .body()?
                .map(|bytes| AttachmentBody::decode(bytes, &payload.content_type));
            let length = match &body {
                Some(body) => body.len(),
                None => payload.length,
            };
            self.attachments.insert(
                name,
                Attachment {
                    stub: body.is_none(),
                    body,
                    length,
                    content_type: payload.content_type,
                    dirty: false,
                },
            );
        }
        Ok(())
    }

    fn apply_receipt(&mut self, receipt: &SaveReceipt) -> Result<()> {
        if let Some(key) = &receipt.key {
            if self.key().as_deref() != Some(key.as_str()) {
                self.set_key(key.clone())?;
            }
        }
        if let Some(revision) = &receipt.revision {
            self.meta
                .insert(REVISION_META.to_string(), Value::from(revision.clone()));
        }
        Ok(())
    }

    /// Stages a body for a declared attachment.
    pub fn set_attachment(
        &mut self,
        name: &str,
        body: impl Into<AttachmentBody>,
    ) -> Result<(), SchemaError> {
        self.stage_attachment(name, Some(body.into()))
    }

    /// Stages deletion of an attachment; the next save removes it.
    pub fn clear_attachment(&mut self, name: &str) -> Result<(), SchemaError> {
        self.stage_attachment(name, None)
    }

    fn stage_attachment(
        &mut self,
        name: &str,
        body: Option<AttachmentBody>,
    ) -> Result<(), SchemaError> {
        let content_type = self.class.require_attachment(name)?;
        self.attachments
            .insert(name.to_string(), Attachment::staged(body, content_type));
        Ok(())
    }

    /// Cached body, if set locally or fetched.
    pub fn attachment(&self, name: &str) -> Option<&AttachmentBody> {
        self.attachments.get(name)?.body.as_ref()
    }

    pub fn attachment_meta(&self, name: &str) -> Option<&Attachment> {
        self.attachments.get(name)
    }

    pub fn has_dirty_attachments(&self) -> bool {
        self.attachments.values().any(|a| a.dirty)
    }

    /// Wire form of every attachment.
    pub fn serialize_attachments(&self) -> BTreeMap<String, AttachmentPayload> {
        self.attachments
            .iter()
            .map(|(name, attachment)| (name.clone(), attachment.to_payload()))
            .collect()
    }

    /// Body of an attachment, fetched once and then served from the
    /// instance. Text mime types decode to text. `Ok(None)` when storage has
    /// no body.
    pub async fn fetch_attachment(&mut self, name: &str) -> Result<Option<AttachmentBody>> {
        let content_type = self.class.require_attachment(name)?;
        if let Some(attachment) = self.attachments.get(name) {
            if let Some(body) = &attachment.body {
                return Ok(Some(body.clone()));
            }
            if attachment.is_deletion() {
                return Ok(None);
            }
        }
        let key = self.key().ok_or(StateError::MissingKey)?;
        let adapter = self.class.adapter()?;
        trace!(class = %self.class.name(), key = %key, attachment = name, "fetching attachment");

        let Some(bytes) = adapter.attachment(&key, name).await? else {
            return Ok(None);
        };
        let body = AttachmentBody::decode(bytes, &content_type);
        let entry = self
            .attachments
            .entry(name.to_string())
            .or_insert_with(|| Attachment::stub(content_type, 0));
        entry.length = body.len();
        entry.body = Some(body.clone());
        entry.stub = false;
        Ok(Some(body))
    }

    /// Writes one staged attachment on its own. A staged deletion removes
    /// the stored body instead; a clean attachment is left alone.
    pub async fn save_attachment(&mut self, name: &str) -> Result<SaveReceipt> {
        self.class.require_attachment(name)?;
        let key = self.key().ok_or(StateError::MissingKey)?;
        let attachment = self
            .attachments
            .get(name)
            .cloned()
            .ok_or_else(|| StateError::NoAttachment {
                class: self.class.name().to_string(),
                name: name.to_string(),
            })?;
        let adapter = self.class.adapter()?;
        if !attachment.dirty {
            trace!(class = %self.class.name(), key = %key, attachment = name, "attachment already stored");
            return Ok(SaveReceipt::default());
        }
        debug!(class = %self.class.name(), key = %key, attachment = name, "saving attachment");

        let receipt = if attachment.is_deletion() {
            adapter.remove_attachment(self, name).await?
        } else {
            adapter.save_attachment(self, name, &attachment).await?
        };
        self.apply_receipt(&receipt)?;
        if attachment.is_deletion() {
            self.attachments.remove(name);
        } else if let Some(saved) = self.attachments.get_mut(name) {
            saved.dirty = false;
            saved.stub = false;
        }
        self.emit(&events::change_of(name), key);
        Ok(receipt)
    }

    /// Deletes a stored attachment and forgets it locally.
    pub async fn remove_attachment(&mut self, name: &str) -> Result<SaveReceipt> {
        self.class.require_attachment(name)?;
        let key = self.key().ok_or(StateError::MissingKey)?;
        let adapter = self.class.adapter()?;
        debug!(class = %self.class.name(), key = %key, attachment = name, "removing attachment");

        let receipt = adapter.remove_attachment(self, name).await?;
        self.apply_receipt(&receipt)?;
        self.attachments.remove(name);
        self.emit(&events::change_of(name), key);
        Ok(receipt)
    }

    /// Stored properties named in `fields`, in serialized form.
    fn serialized_subset(&self, fields: &Record) -> Record {
        let serialized = self.serialize();
        fields
            .keys()
            .filter(|name| {
                self.class
                    .property(name)
                    .is_some_and(PropertySpec::is_stored)
            })
            .filter_map(|name| serialized.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}
