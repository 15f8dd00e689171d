//! Model classes built from a [`ModelDefinition`].

pub mod events;
mod field;
mod instance;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::error::SchemaError;
use crate::persistence::Persistence;
use crate::schema::{
    CustomValidator, Hooks, Initializer, Method, ModelDefinition, PropertySpec, PropertyTable,
};
use crate::value::{FromValue, Value};

pub use field::Field;
pub use instance::{Model, Snapshot};

/// Builds a model class. Fails without producing a class if any property
/// names an unregistered type or a name is declared twice.
pub fn build_class(definition: ModelDefinition) -> Result<ModelClass, SchemaError> {
    let table = PropertyTable::compile(&definition)?;
    let plural = definition.plural_name();
    let name = definition
        .singular
        .clone()
        .or_else(|| plural.clone())
        .unwrap_or_else(|| "model".to_string());

    tracing::debug!(class = %name, properties = table.len(), "built model class");

    Ok(ModelClass {
        inner: Arc::new(ClassInner {
            name,
            singular: definition.singular,
            plural,
            table,
            methods: definition.methods,
            initialize: definition.initialize,
            validator: definition.validator,
            hooks: definition.hooks,
            persistence: RwLock::new(None),
            attachments: RwLock::new(BTreeMap::new()),
        }),
    })
}

pub(crate) struct ClassInner {
    name: String,
    singular: Option<String>,
    plural: Option<String>,
    table: PropertyTable,
    methods: BTreeMap<String, Method>,
    initialize: Option<Initializer>,
    validator: Option<CustomValidator>,
    hooks: Hooks,
    persistence: RwLock<Option<Persistence>>,
    /// Attachment name to mime type.
    attachments: RwLock<BTreeMap<String, String>>,
}

/// A compiled model class. Cheap to clone; clones share the accessor table,
/// persistence settings and adapter.
#[derive(Clone)]
pub struct ModelClass {
    inner: Arc<ClassInner>,
}

impl ModelClass {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn singular(&self) -> Option<&str> {
        self.inner.singular.as_deref()
    }

    pub fn plural(&self) -> Option<&str> {
        self.inner.plural.as_deref()
    }

    pub fn create(&self) -> Model {
        Model::new(self.clone(), &[])
    }

    /// Constructs an instance, forwarding `args` to the initializer.
    pub fn create_with(&self, args: &[Value]) -> Model {
        Model::new(self.clone(), args)
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.inner.table
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.inner.table.get(name)
    }

    pub fn property_type(&self, name: &str) -> Option<&str> {
        self.property(name).map(PropertySpec::type_name)
    }

    /// Type of every stored property, keyed by name.
    pub fn property_types(&self) -> BTreeMap<String, String> {
        self.inner
            .table
            .iter()
            .filter(|spec| spec.is_stored())
            .map(|spec| (spec.name().to_string(), spec.type_name().to_string()))
            .collect()
    }

    pub fn enumeration(&self, name: &str) -> Option<&[String]> {
        self.property(name).and_then(PropertySpec::labels)
    }

    /// Typed handle for one property.
    pub fn field<T>(&self, name: &str) -> Result<Field<T>, SchemaError>
    where
        T: FromValue + Into<Value>,
    {
        match self.property(name) {
            Some(_) => Ok(Field::new(name)),
            None => Err(self.unknown_property(name)),
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.inner.methods.contains_key(name)
    }

    pub fn ptr_eq(&self, other: &ModelClass) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakModelClass {
        WeakModelClass {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn unknown_property(&self, name: &str) -> SchemaError {
        SchemaError::UnknownProperty {
            class: self.name().to_string(),
            property: name.to_string(),
        }
    }

    pub(crate) fn method(&self, name: &str) -> Option<Method> {
        self.inner.methods.get(name).cloned()
    }

    pub(crate) fn initializer(&self) -> Option<Initializer> {
        self.inner.initialize.clone()
    }

    pub(crate) fn validator(&self) -> Option<CustomValidator> {
        self.inner.validator.clone()
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    pub(crate) fn persistence(&self) -> RwLockReadGuard<'_, Option<Persistence>> {
        self.inner
            .persistence
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn persistence_mut(&self) -> RwLockWriteGuard<'_, Option<Persistence>> {
        self.inner
            .persistence
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attachment_table(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.inner
            .attachments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attachment_table_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.inner
            .attachments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClass")
            .field("name", &self.inner.name)
            .field("plural", &self.inner.plural)
            .field("properties", &self.property_types())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle held by adapters so a class and its adapter do not keep
/// each other alive.
#[derive(Clone, Default)]
pub struct WeakModelClass {
    inner: Weak<ClassInner>,
}

impl WeakModelClass {
    pub fn upgrade(&self) -> Option<ModelClass> {
        self.inner.upgrade().map(|inner| ModelClass { inner })
    }
}

impl fmt::Debug for WeakModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakModelClass")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
