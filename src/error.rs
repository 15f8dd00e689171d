use thiserror::Error;

use crate::value::Value;

/// Problems with a schema definition or with how a class is being used.
/// Raised at build time and never recovered automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{property} type {type_name} invalid; see documentation for types")]
    UnknownType { property: String, type_name: String },
    #[error("property {0} is declared more than once")]
    DuplicateProperty(String),
    #[error("enumerable {0} needs at least one label")]
    EmptyEnumeration(String),
    #[error("{class} has no property named {property}")]
    UnknownProperty { class: String, property: String },
    #[error("{class} has no method named {method}")]
    UnknownMethod { class: String, method: String },
    #[error("{class} has no attachment named {name}")]
    UnknownAttachment { class: String, name: String },
    #[error("{0} is not a persistent model class")]
    NotPersistent(String),
    #[error("{0} is already a persistent model class")]
    AlreadyPersistent(String),
}

/// A setter refused a value.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{property}: type of {value} not {expected}")]
pub struct ValidationError {
    pub property: String,
    pub value: Value,
    pub expected: String,
}

impl ValidationError {
    pub fn new(property: impl Into<String>, value: Value, expected: impl Into<String>) -> Self {
        ValidationError {
            property: property.into(),
            value,
            expected: expected.into(),
        }
    }
}

/// An instance is in the wrong lifecycle state for the requested operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("cannot persist or destroy an object without a key")]
    MissingKey,
    #[error("object {0} already destroyed")]
    AlreadyDestroyed(String),
    #[error("no storage configured for {0}; call set_storage() first")]
    NoStorage(String),
    #[error("{class} has no staged attachment named {name}")]
    NoAttachment { class: String, name: String },
}

/// Failures surfaced by an adapter or the driver underneath it. Passed
/// through to the caller without retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("adapter is not bound to a live model class")]
    Unbound,
    #[error("missing storage option {0}")]
    MissingOption(&'static str),
    #[error("cannot save a document without a key")]
    MissingKey,
    #[error("storage lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("storage driver error: {0}")]
    Driver(String),
    #[error("storage serialization error: {0}")]
    Serde(String),
    #[error("document conflict on {collection}:{key}")]
    Conflict { collection: String, key: String },
    #[error("not found: {collection}:{key}")]
    NotFound { collection: String, key: String },
    #[error("cannot inflate stored record: {0}")]
    Inflate(String),
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Serde(err.to_string())
    }
}

impl From<base64::DecodeError> for AdapterError {
    fn from(err: base64::DecodeError) -> Self {
        AdapterError::Serde(err.to_string())
    }
}

/// Crate-level error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
