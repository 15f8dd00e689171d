//! Column-store adapter (Cassandra-like engines).
//!
//! One row per record in a family named after the collection, with one
//! column per stored property. Attachments live in a sibling family,
//! `<family>_attachments`, keyed `<key>:<name>`. Both families are created
//! on first use and the check is cached for the life of the adapter.

mod driver;
mod in_memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

pub use driver::{Cell, ColumnDef, ColumnStoreDriver, ColumnValidator, FamilyDef, RowData};
pub use in_memory::InMemoryColumnStore;

use super::{
    record_from_json, Adapter, AdapterBinding, Payload, SaveReceipt, StorageOptions,
    ATTACHMENTS_FIELD,
};
use crate::attachment::{Attachment, AttachmentPayload};
use crate::error::AdapterError;
use crate::model::{Model, ModelClass};
use crate::types::{date, BuiltinType};
use crate::value::{Record, Value};

pub const DEFAULT_KEYSPACE: &str = "claystore";

const CONTENT_TYPE_COLUMN: &str = "content_type";
const LENGTH_COLUMN: &str = "length";
const BODY_COLUMN: &str = "body";

#[derive(Debug, Clone)]
struct Column {
    type_name: String,
    validator: ColumnValidator,
    labels: Option<Vec<String>>,
}

pub struct ColumnStoreAdapter<D> {
    driver: D,
    binding: AdapterBinding,
    keyspace: String,
    columns: BTreeMap<String, Column>,
    schema: OnceCell<()>,
}

impl<D: ColumnStoreDriver> ColumnStoreAdapter<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            binding: AdapterBinding::default(),
            keyspace: DEFAULT_KEYSPACE.to_string(),
            columns: BTreeMap::new(),
            schema: OnceCell::new(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn family(&self) -> &str {
        self.binding.collection()
    }

    pub fn attachment_family(&self) -> String {
        format!("{}_attachments", self.family())
    }

    /// Record family declaration derived from the class's property types.
    pub fn family_def(&self) -> FamilyDef {
        FamilyDef {
            name: self.family().to_string(),
            key_validator: ColumnValidator::Utf8,
            columns: self
                .columns
                .iter()
                .map(|(name, column)| ColumnDef::new(name.clone(), column.validator))
                .collect(),
        }
    }

    pub fn attachment_family_def(&self) -> FamilyDef {
        FamilyDef {
            name: self.attachment_family(),
            key_validator: ColumnValidator::Utf8,
            columns: vec![
                ColumnDef::new(CONTENT_TYPE_COLUMN, ColumnValidator::Utf8),
                ColumnDef::new(LENGTH_COLUMN, ColumnValidator::Double),
                ColumnDef::new(BODY_COLUMN, ColumnValidator::Bytes),
            ],
        }
    }

    async fn ensure_schema(&self) -> Result<(), AdapterError> {
        self.schema
            .get_or_try_init(|| async move {
                self.driver.ensure_keyspace(&self.keyspace).await?;
                let existing = self.driver.describe(&self.keyspace).await?;
                for family in [self.family_def(), self.attachment_family_def()] {
                    if existing.contains(&family.name) {
                        continue;
                    }
                    debug!(keyspace = %self.keyspace, family = %family.name, "creating column family");
                    self.driver.create_family(&self.keyspace, family).await?;
                }
                Ok::<(), AdapterError>(())
            })
            .await?;
        Ok(())
    }

    /// Row cells for the given fields. Nulls are left out; enumerables are
    /// written as their index.
    fn encode_row(&self, fields: &Record) -> Result<RowData, AdapterError> {
        let mut row = RowData::new();
        for (name, value) in fields {
            let Some(column) = self.columns.get(name) else {
                trace!(column = %name, "no column for field; skipping");
                continue;
            };
            if let Some(cell) = encode_cell(name, column, value)? {
                row.insert(name.clone(), cell);
            }
        }
        Ok(row)
    }

    fn decode_row(&self, row: RowData) -> Record {
        row.into_iter()
            .map(|(name, cell)| {
                let value = match (cell, self.columns.get(&name)) {
                    (Cell::Utf8(text), Some(column)) if column.type_name != BuiltinType::String.name() => {
                        decode_json(text)
                    }
                    (cell, _) => decode_cell(cell),
                };
                (name, value)
            })
            .collect()
    }

    fn attachment_names(&self) -> Result<Vec<String>, AdapterError> {
        Ok(self.binding.class()?.attachment_types().into_keys().collect())
    }

    /// `_attachments` stubs for each key, in order.
    async fn attachment_stubs(&self, keys: &[String]) -> Result<Vec<Record>, AdapterError> {
        let names = self.attachment_names()?;
        if names.is_empty() {
            return Ok(vec![Record::new(); keys.len()]);
        }
        let row_keys: Vec<String> = keys
            .iter()
            .flat_map(|key| names.iter().map(move |name| attachment_row_key(key, name)))
            .collect();
        let rows = self
            .driver
            .select(&self.keyspace, &self.attachment_family(), &row_keys)
            .await?;

        let mut rows = rows.into_iter();
        let mut stubs = Vec::with_capacity(keys.len());
        for _ in keys {
            let mut record = Record::new();
            for name in &names {
                let Some(row) = rows.next().flatten() else {
                    continue;
                };
                let content_type = match row.get(CONTENT_TYPE_COLUMN) {
                    Some(Cell::Utf8(ct)) => ct.clone(),
                    _ => String::new(),
                };
                let length = match row.get(LENGTH_COLUMN) {
                    Some(Cell::Double(n)) => *n as usize,
                    _ => 0,
                };
                let stub = AttachmentPayload {
                    content_type,
                    data: None,
                    length,
                    stub: true,
                };
                record.insert(name.clone(), Value::from(serde_json::to_value(stub)?));
            }
            stubs.push(record);
        }
        Ok(stubs)
    }

    async fn read(&self, keys: &[String]) -> Result<Vec<Option<Model>>, AdapterError> {
        self.ensure_schema().await?;
        let rows = self.driver.select(&self.keyspace, self.family(), keys).await?;
        let stubs = self.attachment_stubs(keys).await?;
        keys.iter()
            .zip(rows)
            .zip(stubs)
            .map(|((key, row), stubs)| {
                let Some(row) = row else {
                    return Ok(None);
                };
                let mut record = self.decode_row(row);
                if !stubs.is_empty() {
                    record.insert(ATTACHMENTS_FIELD.to_string(), Value::Hash(stubs));
                }
                self.binding.inflate_record(Some(key), record).map(Some)
            })
            .collect()
    }

    async fn write_attachment(
        &self,
        key: &str,
        name: &str,
        payload: &AttachmentPayload,
    ) -> Result<(), AdapterError> {
        let row_key = attachment_row_key(key, name);
        let family = self.attachment_family();
        match payload.body()? {
            Some(body) => {
                let row = RowData::from([
                    (
                        CONTENT_TYPE_COLUMN.to_string(),
                        Cell::Utf8(payload.content_type.clone()),
                    ),
                    (LENGTH_COLUMN.to_string(), Cell::Double(body.len() as f64)),
                    (BODY_COLUMN.to_string(), Cell::Bytes(body)),
                ]);
                self.driver.insert(&self.keyspace, &family, &row_key, row).await
            }
            None => self.driver.delete(&self.keyspace, &family, &[row_key]).await,
        }
    }

    async fn delete_rows(&self, keys: &[String]) -> Result<(), AdapterError> {
        self.ensure_schema().await?;
        self.driver.delete(&self.keyspace, self.family(), keys).await?;
        let names = self.attachment_names()?;
        if names.is_empty() {
            return Ok(());
        }
        let row_keys: Vec<String> = keys
            .iter()
            .flat_map(|key| names.iter().map(move |name| attachment_row_key(key, name)))
            .collect();
        self.driver
            .delete(&self.keyspace, &self.attachment_family(), &row_keys)
            .await
    }
}

fn attachment_row_key(key: &str, name: &str) -> String {
    format!("{key}:{name}")
}

fn encode_cell(name: &str, column: &Column, value: &Value) -> Result<Option<Cell>, AdapterError> {
    if value.is_null() {
        return Ok(None);
    }
    let mismatch = || AdapterError::Serde(format!("column {name} cannot hold {value}"));

    if let Some(labels) = &column.labels {
        let index = match value {
            Value::String(label) if label.is_empty() => return Ok(None),
            Value::String(label) => labels.iter().position(|l| l == label).ok_or_else(mismatch)?,
            Value::Number(n) => *n as usize,
            _ => return Err(mismatch()),
        };
        return Ok(Some(Cell::Double(index as f64)));
    }

    let cell = match column.validator {
        ColumnValidator::Double => Cell::Double(value.as_f64().ok_or_else(mismatch)?),
        ColumnValidator::Boolean => Cell::Boolean(value.as_bool().ok_or_else(mismatch)?),
        ColumnValidator::Date => {
            let parsed = match value {
                Value::Date(d) => Some(*d),
                Value::String(s) => date::parse_date(s),
                Value::Number(n) => date::from_epoch_millis(*n),
                _ => None,
            };
            Cell::Date(parsed.ok_or_else(mismatch)?)
        }
        ColumnValidator::Utf8 => match value {
            Value::String(s) if column.type_name == BuiltinType::String.name() => Cell::Utf8(s.clone()),
            other => Cell::Utf8(serde_json::to_string(other)?),
        },
        ColumnValidator::Bytes => return Err(mismatch()),
    };
    Ok(Some(cell))
}

fn decode_cell(cell: Cell) -> Value {
    match cell {
        Cell::Utf8(text) => Value::String(text),
        Cell::Double(n) => Value::Number(n),
        Cell::Boolean(b) => Value::Bool(b),
        Cell::Date(d) => Value::Date(d),
        Cell::Bytes(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
    }
}

fn decode_json(text: String) -> Value {
    serde_json::from_str::<serde_json::Value>(&text)
        .map(Value::from_json)
        .unwrap_or(Value::String(text))
}

#[async_trait]
impl<D> Adapter for ColumnStoreAdapter<D>
where
    D: ColumnStoreDriver + 'static,
{
    fn configure(&mut self, options: &StorageOptions, class: &ModelClass) -> Result<(), AdapterError> {
        self.binding = AdapterBinding::bind(options, class)?;
        if let Some(keyspace) = &options.keyspace {
            self.keyspace = keyspace.clone();
        }
        self.columns = class
            .property_types()
            .into_iter()
            .map(|(name, type_name)| {
                let column = Column {
                    validator: ColumnValidator::for_type(&type_name),
                    labels: class.enumeration(&name).map(<[String]>::to_vec),
                    type_name,
                };
                (name, column)
            })
            .collect();
        if let Some(field) = class.hidden_keyfield() {
            self.columns.insert(
                field,
                Column {
                    type_name: BuiltinType::String.name().to_string(),
                    validator: ColumnValidator::Utf8,
                    labels: None,
                },
            );
        }
        Ok(())
    }

    async fn provision(&self) -> Result<(), AdapterError> {
        self.ensure_schema().await
    }

    async fn save(&self, model: &Model, payload: &Payload) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.ensure_schema().await?;
        let row = self.encode_row(&payload.fields)?;
        trace!(family = %self.family(), key = %key, columns = row.len(), "column store insert");
        self.driver
            .insert(&self.keyspace, self.family(), &key, row)
            .await?;
        for (name, attachment) in payload.dirty_attachments() {
            self.write_attachment(&key, name, attachment).await?;
        }
        Ok(SaveReceipt::default())
    }

    async fn get(&self, key: &str) -> Result<Option<Model>, AdapterError> {
        let mut models = self.read(&[key.to_string()]).await?;
        Ok(models.pop().flatten())
    }

    async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<Model>>, AdapterError> {
        self.read(keys).await
    }

    async fn all(&self) -> Result<Vec<String>, AdapterError> {
        self.ensure_schema().await?;
        let mut keys = self.driver.select_keys(&self.keyspace, self.family()).await?;
        keys.sort();
        Ok(keys)
    }

    /// Native column-level update.
    async fn merge(&self, key: &str, fields: &Record) -> Result<SaveReceipt, AdapterError> {
        self.ensure_schema().await?;
        let columns = self.encode_row(fields)?;
        if !columns.is_empty() {
            self.driver
                .update(&self.keyspace, self.family(), key, columns)
                .await?;
        }
        Ok(SaveReceipt::default())
    }

    async fn remove(&self, model: &Model) -> Result<(), AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.delete_rows(&[key]).await
    }

    async fn destroy_many(&self, keys: &[String]) -> Result<(), AdapterError> {
        self.delete_rows(keys).await
    }

    async fn attachment(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, AdapterError> {
        self.ensure_schema().await?;
        let rows = self
            .driver
            .select(
                &self.keyspace,
                &self.attachment_family(),
                &[attachment_row_key(key, name)],
            )
            .await?;
        Ok(rows
            .into_iter()
            .flatten()
            .next()
            .and_then(|mut row| match row.remove(BODY_COLUMN) {
                Some(Cell::Bytes(body)) => Some(body),
                _ => None,
            }))
    }

    async fn save_attachment(
        &self,
        model: &Model,
        name: &str,
        attachment: &Attachment,
    ) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.ensure_schema().await?;
        self.write_attachment(&key, name, &attachment.to_payload())
            .await?;
        Ok(SaveReceipt::default())
    }

    async fn remove_attachment(&self, model: &Model, name: &str) -> Result<SaveReceipt, AdapterError> {
        let key = model.key().ok_or(AdapterError::MissingKey)?;
        self.ensure_schema().await?;
        self.driver
            .delete(
                &self.keyspace,
                &self.attachment_family(),
                &[attachment_row_key(&key, name)],
            )
            .await?;
        Ok(SaveReceipt::default())
    }

    /// Accepts a row as a JSON object; text columns of structured types are
    /// JSON-decoded.
    fn inflate(&self, raw: &serde_json::Value) -> Result<Option<Model>, AdapterError> {
        let Some(record) = record_from_json(raw) else {
            return Ok(None);
        };
        let record = record
            .into_iter()
            .map(|(name, value)| {
                let value = match (value, self.columns.get(&name)) {
                    (Value::String(text), Some(column))
                        if column.validator == ColumnValidator::Utf8
                            && column.type_name != BuiltinType::String.name() =>
                    {
                        decode_json(text)
                    }
                    (value, _) => value,
                };
                (name, value)
            })
            .collect();
        self.binding.inflate_record(None, record).map(Some)
    }
}
