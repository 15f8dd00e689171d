pub mod adapter;
mod attachment;
mod error;
pub mod model;
mod persistence;
pub mod schema;
pub mod types;
mod value;

pub use adapter::{
    Adapter, AdapterBinding, ColumnStoreAdapter, DocumentStoreAdapter, HashStoreAdapter,
    InMemoryColumnStore, InMemoryDocumentStore, InMemoryHashStore, InMemoryOrderedStore,
    MemoryAdapter, OrderedStoreAdapter, Payload, SaveReceipt, StorageOptions,
};
pub use attachment::{data_length, Attachment, AttachmentBody, AttachmentPayload};
pub use error::{AdapterError, Error, Result, SchemaError, StateError, ValidationError};
pub use model::{build_class, events, Field, Model, ModelClass, WeakModelClass};
pub use persistence::{persist, Fetched, Lookup, DEFAULT_KEYFIELD, KEY_PROPERTY};
pub use schema::{read_field, Computed, Mixin, ModelDefinition, Schema};
pub use types::{add_type, BuiltinType, TypeDescriptor};
pub use value::{FromValue, Record, Value};

// Derive macro for `Schema`; shares the trait's name.
pub use claystore_macros::Schema;
