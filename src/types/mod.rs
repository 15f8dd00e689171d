//! Process-wide type registry.
//!
//! Every typed property names a registered type. The registry is seeded with
//! the built-in types on first use; `add_type` registers custom ones or
//! replaces an existing entry by name.

pub mod date;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use once_cell::sync::Lazy;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::value::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinType {
    String,
    Array,
    Number,
    Boolean,
    Date,
    Hash,
    Reference,
    Untyped,
}

impl BuiltinType {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;
pub type Coercion = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct TypeDescriptor {
    name: String,
    validate: Validator,
    make_default: DefaultFactory,
    coerce: Option<Coercion>,
}

impl TypeDescriptor {
    pub fn new<V, D>(name: impl Into<String>, validate: V, make_default: D) -> Self
    where
        V: Fn(&Value) -> bool + Send + Sync + 'static,
        D: Fn() -> Value + Send + Sync + 'static,
    {
        TypeDescriptor {
            name: name.into(),
            validate: Arc::new(validate),
            make_default: Arc::new(make_default),
            coerce: None,
        }
    }

    /// Adds a step run by setters before validation.
    pub fn with_coercion<C>(mut self, coerce: C) -> Self
    where
        C: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.coerce = Some(Arc::new(coerce));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn validate(&self, value: &Value) -> bool {
        (self.validate)(value)
    }

    pub fn make_default(&self) -> Value {
        (self.make_default)()
    }

    pub fn coerce(&self, value: Value) -> Value {
        match &self.coerce {
            Some(coerce) => coerce(value),
            None => value,
        }
    }

    pub fn builtin(kind: BuiltinType) -> Self {
        let name = kind.name();
        match kind {
            BuiltinType::String => TypeDescriptor::new(
                name,
                |v| matches!(v, Value::String(_)),
                || Value::String(String::new()),
            ),
            BuiltinType::Array => TypeDescriptor::new(
                name,
                |v| matches!(v, Value::Array(_)),
                || Value::Array(Vec::new()),
            ),
            BuiltinType::Number => TypeDescriptor::new(
                name,
                |v| matches!(v, Value::Number(n) if !n.is_nan()),
                || Value::Number(0.0),
            ),
            BuiltinType::Boolean => TypeDescriptor::new(
                name,
                |v| matches!(v, Value::Bool(_)),
                || Value::Bool(false),
            ),
            BuiltinType::Date => TypeDescriptor::new(
                name,
                |v| match v {
                    Value::Date(_) => true,
                    Value::Number(n) => date::from_epoch_millis(*n).is_some(),
                    Value::String(s) => date::parse_date(s).is_some(),
                    _ => false,
                },
                || Value::Date(Utc::now()),
            )
            .with_coercion(date::coerce),
            BuiltinType::Hash | BuiltinType::Reference => TypeDescriptor::new(
                name,
                |v| matches!(v, Value::Hash(_)),
                || Value::Hash(Record::new()),
            ),
            BuiltinType::Untyped => TypeDescriptor::new(name, |_| true, || Value::Null),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("coerces", &self.coerce.is_some())
            .finish()
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<TypeDescriptor>>>> = Lazy::new(|| {
    let types = BuiltinType::iter()
        .map(|kind| (kind.to_string(), Arc::new(TypeDescriptor::builtin(kind))))
        .collect();
    RwLock::new(types)
});

/// Registers a type, replacing any previous entry with the same name.
pub fn add_type(descriptor: TypeDescriptor) {
    let mut types = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    tracing::debug!(type_name = %descriptor.name, "registering type");
    types.insert(descriptor.name.clone(), Arc::new(descriptor));
}

pub fn lookup(name: &str) -> Option<Arc<TypeDescriptor>> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

pub fn is_registered(name: &str) -> bool {
    lookup(name).is_some()
}

/// Unknown type names never validate.
pub fn validate(name: &str, value: &Value) -> bool {
    lookup(name).is_some_and(|t| t.validate(value))
}

pub fn make_default(name: &str) -> Value {
    lookup(name).map(|t| t.make_default()).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        for kind in BuiltinType::iter() {
            assert!(is_registered(kind.name()), "{kind} missing");
        }
        assert_eq!("boolean".parse::<BuiltinType>().unwrap(), BuiltinType::Boolean);
    }

    #[test]
    fn builtin_defaults() {
        assert_eq!(make_default("string"), Value::from(""));
        assert_eq!(make_default("number"), Value::from(0));
        assert_eq!(make_default("boolean"), Value::from(false));
        assert_eq!(make_default("array"), Value::Array(vec![]));
        assert_eq!(make_default("hash"), Value::Hash(Record::new()));
        assert_eq!(make_default("untyped"), Value::Null);
        assert!(matches!(make_default("date"), Value::Date(_)));
    }

    #[test]
    fn builtin_validators() {
        assert!(validate("string", &Value::from("x")));
        assert!(!validate("string", &Value::from(true)));
        assert!(!validate("number", &Value::from("12x")));
        assert!(validate("date", &Value::from(1_370_000_000_000_i64)));
        assert!(validate("date", &Value::from("2013-06-14T10:30:00Z")));
        assert!(!validate("date", &Value::from("Invalid Date")));
        assert!(validate("untyped", &Value::Null));
        assert!(!validate("no-such-type", &Value::Null));
    }

    #[test]
    fn add_type_registers_and_overwrites() {
        add_type(TypeDescriptor::new(
            "registry_test_even",
            |v| v.as_f64().is_some_and(|n| n % 2.0 == 0.0),
            || Value::from(0),
        ));
        assert!(validate("registry_test_even", &Value::from(4)));
        assert!(!validate("registry_test_even", &Value::from(3)));

        add_type(TypeDescriptor::new(
            "registry_test_even",
            |_| false,
            || Value::from(2),
        ));
        assert!(!validate("registry_test_even", &Value::from(4)));
        assert_eq!(make_default("registry_test_even"), Value::from(2));
    }
}
