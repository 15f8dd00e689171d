//! Declarative schema input for [`build_class`](crate::build_class).

pub mod property;
pub mod typed;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::model::Model;
use crate::value::Value;

pub use property::{PropertyKind, PropertySpec, PropertyTable};
pub use typed::{read_field, Schema};

pub type Method = Arc<dyn Fn(&mut Model, &[Value]) -> Result<Value> + Send + Sync>;
pub type Initializer = Arc<dyn Fn(&mut Model, &[Value]) + Send + Sync>;
pub type CustomValidator = Arc<dyn Fn(&Model) -> bool + Send + Sync>;
pub type Hook = Arc<dyn Fn(&mut Model) + Send + Sync>;
pub type Getter = Arc<dyn Fn(&Model) -> Value + Send + Sync>;
pub type Setter = Arc<dyn Fn(&mut Model, Value) -> Result<()> + Send + Sync>;

/// A property backed by caller-supplied accessors instead of an attribute.
#[derive(Clone)]
pub struct Computed {
    pub(crate) get: Getter,
    pub(crate) set: Option<Setter>,
}

impl Computed {
    pub fn new<G>(get: G) -> Self
    where
        G: Fn(&Model) -> Value + Send + Sync + 'static,
    {
        Computed {
            get: Arc::new(get),
            set: None,
        }
    }

    pub fn with_setter<S>(mut self, set: S) -> Self
    where
        S: Fn(&mut Model, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(set));
        self
    }
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) before_save: Option<Hook>,
    pub(crate) after_save: Option<Hook>,
    pub(crate) after_load: Option<Hook>,
    pub(crate) before_destroy: Option<Hook>,
}

/// Reusable bundle of properties and behaviour merged into a definition.
#[derive(Clone, Default)]
pub struct Mixin {
    properties: Vec<(String, String)>,
    methods: BTreeMap<String, Method>,
    computed: Vec<(String, Computed)>,
}

impl Mixin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.properties.push((name.into(), type_name.into()));
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut Model, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn computed(mut self, name: impl Into<String>, computed: Computed) -> Self {
        self.computed.push((name.into(), computed));
        self
    }
}

/// Schema for a model class, assembled with builder calls and consumed by
/// `build_class`.
#[derive(Clone, Default)]
pub struct ModelDefinition {
    pub(crate) singular: Option<String>,
    pub(crate) plural: Option<String>,
    pub(crate) properties: Vec<(String, String)>,
    pub(crate) optional: Vec<String>,
    pub(crate) required: Vec<String>,
    pub(crate) enumerables: Vec<(String, Vec<String>)>,
    pub(crate) references: Vec<String>,
    pub(crate) computed: Vec<(String, Computed)>,
    pub(crate) methods: BTreeMap<String, Method>,
    pub(crate) initialize: Option<Initializer>,
    pub(crate) validator: Option<CustomValidator>,
    pub(crate) hooks: Hooks,
}

impl ModelDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singular(mut self, name: impl Into<String>) -> Self {
        self.singular = Some(name.into());
        self
    }

    pub fn plural(mut self, name: impl Into<String>) -> Self {
        self.plural = Some(name.into());
        self
    }

    /// Declares a typed property. The type name `reference` declares a
    /// reference property instead.
    pub fn property(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.properties.push((name.into(), type_name.into()));
        self
    }

    pub fn properties<I, N, T>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(n, t)| (n.into(), t.into())));
        self
    }

    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.optional.push(name.into());
        self
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn enumerable<I, L>(mut self, name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.enumerables
            .push((name.into(), labels.into_iter().map(Into::into).collect()));
        self
    }

    pub fn reference(mut self, name: impl Into<String>) -> Self {
        self.references.push(name.into());
        self
    }

    pub fn computed(mut self, name: impl Into<String>, computed: Computed) -> Self {
        self.computed.push((name.into(), computed));
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut Model, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn initialize<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut Model, &[Value]) + Send + Sync + 'static,
    {
        self.initialize = Some(Arc::new(init));
        self
    }

    /// Extra check ANDed into [`Model::valid`].
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Model) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn before_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Model) + Send + Sync + 'static,
    {
        self.hooks.before_save = Some(Arc::new(hook));
        self
    }

    pub fn after_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Model) + Send + Sync + 'static,
    {
        self.hooks.after_save = Some(Arc::new(hook));
        self
    }

    pub fn after_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Model) + Send + Sync + 'static,
    {
        self.hooks.after_load = Some(Arc::new(hook));
        self
    }

    pub fn before_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Model) + Send + Sync + 'static,
    {
        self.hooks.before_destroy = Some(Arc::new(hook));
        self
    }

    /// Merges a mixin. Methods already defined on the definition win.
    pub fn include(mut self, mixin: Mixin) -> Self {
        self.properties.extend(mixin.properties);
        self.computed.extend(mixin.computed);
        for (name, method) in mixin.methods {
            self.methods.entry(name).or_insert(method);
        }
        self
    }

    /// Falls back to `singular + "s"`.
    pub fn plural_name(&self) -> Option<String> {
        self.plural
            .clone()
            .or_else(|| self.singular.as_ref().map(|s| format!("{s}s")))
    }
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("singular", &self.singular)
            .field("plural", &self.plural)
            .field("properties", &self.properties)
            .field("optional", &self.optional)
            .field("required", &self.required)
            .field("enumerables", &self.enumerables)
            .field("references", &self.references)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
