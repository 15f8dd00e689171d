//! Storage behaviour layered onto a model class by [`persist`].

mod instance;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::adapter::{Adapter, StorageOptions};
use crate::error::{Result, SchemaError, StateError};
use crate::model::{Model, ModelClass};
use crate::schema::PropertySpec;

pub const DEFAULT_KEYFIELD: &str = "_id";

pub(crate) struct Persistence {
    keyfield: String,
    adapter: Option<Arc<dyn Adapter>>,
}

/// Property that backs the key when no key field is named.
pub const KEY_PROPERTY: &str = "key";

/// Makes a class persistent. The key lives in `keyfield`; without one it
/// lives in a declared `key` property if the class has one, else in `_id`.
/// When the key field names a declared property the key is read and written
/// through it.
pub fn persist(class: &ModelClass, keyfield: Option<&str>) -> Result<(), SchemaError> {
    let keyfield = match keyfield {
        Some(field) => field.to_string(),
        None if class
            .property(KEY_PROPERTY)
            .is_some_and(PropertySpec::is_stored) =>
        {
            KEY_PROPERTY.to_string()
        }
        None => DEFAULT_KEYFIELD.to_string(),
    };
    let mut persistence = class.persistence_mut();
    if persistence.is_some() {
        return Err(SchemaError::AlreadyPersistent(class.name().to_string()));
    }
    debug!(class = %class.name(), keyfield = %keyfield, "class made persistent");
    *persistence = Some(Persistence {
        keyfield,
        adapter: None,
    });
    Ok(())
}

/// Argument to [`ModelClass::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Lookup {
    fn from(key: &str) -> Self {
        Lookup::One(key.to_string())
    }
}

impl From<String> for Lookup {
    fn from(key: String) -> Self {
        Lookup::One(key)
    }
}

impl From<Vec<String>> for Lookup {
    fn from(keys: Vec<String>) -> Self {
        Lookup::Many(keys)
    }
}

impl From<&[&str]> for Lookup {
    fn from(keys: &[&str]) -> Self {
        Lookup::Many(keys.iter().map(|k| k.to_string()).collect())
    }
}

#[derive(Debug)]
pub enum Fetched {
    One(Option<Model>),
    Many(Vec<Option<Model>>),
}

impl Fetched {
    pub fn into_one(self) -> Option<Model> {
        match self {
            Fetched::One(model) => model,
            Fetched::Many(models) => models.into_iter().flatten().next(),
        }
    }

    pub fn into_many(self) -> Vec<Option<Model>> {
        match self {
            Fetched::One(model) => vec![model],
            Fetched::Many(models) => models,
        }
    }
}

impl ModelClass {
    pub fn is_persistent(&self) -> bool {
        self.persistence().is_some()
    }

    pub fn keyfield(&self) -> Option<String> {
        self.persistence().as_ref().map(|p| p.keyfield.clone())
    }

    /// The key field when it names a stored property.
    pub(crate) fn keyfield_property(&self) -> Option<String> {
        self.keyfield()
            .filter(|field| self.property(field).is_some_and(PropertySpec::is_stored))
    }

    /// The key field when the key lives outside the properties. Adapters
    /// store the key under this name next to the serialized fields.
    pub fn hidden_keyfield(&self) -> Option<String> {
        self.keyfield()
            .filter(|field| !self.property(field).is_some_and(PropertySpec::is_stored))
    }

    /// Configures `adapter` for this class and routes all storage calls to
    /// it, replacing any previous adapter.
    pub fn set_storage<A>(&self, options: &StorageOptions, mut adapter: A) -> Result<()>
    where
        A: Adapter + 'static,
    {
        if !self.is_persistent() {
            return Err(SchemaError::NotPersistent(self.name().to_string()).into());
        }
        adapter.configure(options, self)?;
        let mut persistence = self.persistence_mut();
        if let Some(persistence) = persistence.as_mut() {
            persistence.adapter = Some(Arc::new(adapter));
        }
        debug!(class = %self.name(), "storage configured");
        Ok(())
    }

    pub(crate) fn adapter(&self) -> Result<Arc<dyn Adapter>> {
        match self.persistence().as_ref() {
            None => Err(SchemaError::NotPersistent(self.name().to_string()).into()),
            Some(Persistence { adapter: None, .. }) => {
                Err(StateError::NoStorage(self.name().to_string()).into())
            }
            Some(Persistence {
                adapter: Some(adapter),
                ..
            }) => Ok(adapter.clone()),
        }
    }

    /// `Ok(None)` when the key is absent.
    pub async fn get(&self, key: &str) -> Result<Option<Model>> {
        let adapter = self.adapter()?;
        debug!(class = %self.name(), key, "get");
        Ok(adapter.get(key).await?)
    }

    /// Element `i` answers `keys[i]`; missing keys are `None`.
    pub async fn get_batch(&self, keys: &[String]) -> Result<Vec<Option<Model>>> {
        let adapter = self.adapter()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        debug!(class = %self.name(), count = keys.len(), "get batch");
        Ok(adapter.get_batch(keys).await?)
    }

    /// One key or many; a list goes through [`ModelClass::get_batch`].
    pub async fn lookup(&self, lookup: impl Into<Lookup>) -> Result<Fetched> {
        match lookup.into() {
            Lookup::One(key) => Ok(Fetched::One(self.get(&key).await?)),
            Lookup::Many(keys) => Ok(Fetched::Many(self.get_batch(&keys).await?)),
        }
    }

    /// Every stored instance.
    pub async fn all(&self) -> Result<Vec<Model>> {
        let adapter = self.adapter()?;
        let keys = adapter.all().await?;
        debug!(class = %self.name(), count = keys.len(), "all");
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let models = adapter.get_batch(&keys).await?;
        Ok(models.into_iter().flatten().collect())
    }

    /// Creates the backing structure if needed. Safe to repeat.
    pub async fn provision(&self) -> Result<()> {
        let adapter = self.adapter()?;
        debug!(class = %self.name(), "provision");
        Ok(adapter.provision().await?)
    }

    /// Inflates raw stored records without touching storage. Records that
    /// are null or not objects are skipped.
    pub fn construct_many(&self, raw: &[serde_json::Value]) -> Result<Vec<Model>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let adapter = self.adapter()?;
        let mut models = Vec::with_capacity(raw.len());
        for record in raw {
            if let Some(model) = adapter.inflate(record)? {
                models.push(model);
            }
        }
        Ok(models)
    }

    /// Deletes every key. `None` or an empty list succeeds without calling
    /// the adapter.
    pub async fn destroy_many(&self, keys: Option<&[String]>) -> Result<()> {
        let keys = match keys {
            Some(keys) if !keys.is_empty() => keys,
            _ => return Ok(()),
        };
        let adapter = self.adapter()?;
        debug!(class = %self.name(), count = keys.len(), "destroy many");
        Ok(adapter.destroy_many(keys).await?)
    }

    /// Keys of `models`, then [`ModelClass::destroy_many`]. Keyless models
    /// are skipped.
    pub async fn destroy_models(&self, models: &[Model]) -> Result<()> {
        let keys: Vec<String> = models.iter().filter_map(Model::key).collect();
        self.destroy_many(Some(keys.as_slice())).await
    }

    /// Declares an attachment slot.
    pub fn define_attachment(&self, name: &str, mime_type: &str) -> Result<(), SchemaError> {
        if !self.is_persistent() {
            return Err(SchemaError::NotPersistent(self.name().to_string()));
        }
        if self.property(name).is_some() {
            return Err(SchemaError::DuplicateProperty(name.to_string()));
        }
        self.attachment_table_mut()
            .insert(name.to_string(), mime_type.to_string());
        Ok(())
    }

    pub fn attachment_type(&self, name: &str) -> Option<String> {
        self.attachment_table().get(name).cloned()
    }

    pub fn attachment_types(&self) -> BTreeMap<String, String> {
        self.attachment_table().clone()
    }

    pub(crate) fn require_attachment(&self, name: &str) -> Result<String, SchemaError> {
        self.attachment_type(name)
            .ok_or_else(|| SchemaError::UnknownAttachment {
                class: self.name().to_string(),
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::error::Error;
    use crate::model::build_class;
    use crate::schema::ModelDefinition;

    fn class() -> ModelClass {
        build_class(
            ModelDefinition::new()
                .singular("widget")
                .property("name", "string"),
        )
        .unwrap()
    }

    #[test]
    fn persist_twice_fails() {
        let class = class();
        persist(&class, None).unwrap();
        assert_eq!(class.keyfield().as_deref(), Some("_id"));
        assert!(matches!(
            persist(&class, None),
            Err(SchemaError::AlreadyPersistent(_))
        ));
    }

    #[test]
    fn storage_requires_persist() {
        let class = class();
        let err = class
            .set_storage(&StorageOptions::new(), MemoryAdapter::new())
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::NotPersistent(_))));
    }

    #[tokio::test]
    async fn calls_without_storage_fail_loudly() {
        let class = class();
        persist(&class, None).unwrap();
        let err = class.get("k").await.unwrap_err();
        assert!(matches!(err, Error::State(StateError::NoStorage(_))));
    }

    #[tokio::test]
    async fn destroy_many_on_empty_input_needs_no_storage() {
        let class = class();
        persist(&class, None).unwrap();
        class.destroy_many(None).await.unwrap();
        class.destroy_many(Some(Vec::new().as_slice())).await.unwrap();
    }

    #[test]
    fn attachments_need_a_free_name() {
        let class = class();
        assert!(class.define_attachment("photo", "image/png").is_err());
        persist(&class, None).unwrap();
        class.define_attachment("photo", "image/png").unwrap();
        assert_eq!(class.attachment_type("photo").as_deref(), Some("image/png"));
        assert!(matches!(
            class.define_attachment("name", "text/plain"),
            Err(SchemaError::DuplicateProperty(_))
        ));
    }

    #[test]
    fn keyfield_property_resolves_declared_fields_only() {
        let class = class();
        persist(&class, Some("name")).unwrap();
        assert_eq!(class.keyfield_property().as_deref(), Some("name"));

        let other = build_class(ModelDefinition::new().singular("gadget")).unwrap();
        persist(&other, None).unwrap();
        assert_eq!(other.keyfield_property(), None);
    }
}
