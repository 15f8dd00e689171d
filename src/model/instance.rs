use std::collections::{BTreeMap, HashMap};
use std::fmt;

use once_cell::sync::OnceCell;
use serde::{Serialize, Serializer};

use crate::attachment::Attachment;
use crate::error::{Result, SchemaError, ValidationError};
use crate::model::events::{self, Emitter};
use crate::model::ModelClass;
use crate::schema::{PropertyKind, PropertySpec};
use crate::types;
use crate::value::{Record, Value};

/// An instance of a [`ModelClass`].
///
/// Instances are not synchronized; mutate one from a single task at a time.
pub struct Model {
    pub(crate) class: ModelClass,
    pub(crate) attributes: Record,
    pub(crate) previous: Snapshot,
    defaults: HashMap<String, OnceCell<Value>>,
    references: HashMap<String, Box<Model>>,
    pub(crate) attachments: BTreeMap<String, Attachment>,
    pub(crate) meta: Record,
    pub(crate) key: Option<String>,
    pub(crate) dirty: bool,
    pub(crate) is_new: bool,
    pub(crate) destroyed: bool,
    errors: BTreeMap<String, String>,
    emitter: Emitter,
}

/// Values properties held before their first change since the last clean
/// point; `None` for a property that was unset.
pub type Snapshot = BTreeMap<String, Option<Value>>;

/// Attribute state captured before an optimistic change.
pub(crate) struct Checkpoint {
    attributes: Record,
    previous: Snapshot,
    dirty: bool,
}

impl Model {
    pub(crate) fn new(class: ModelClass, args: &[Value]) -> Self {
        let defaults = class
            .properties()
            .iter()
            .filter(|spec| matches!(spec.kind(), PropertyKind::Typed { .. }))
            .map(|spec| (spec.name().to_string(), OnceCell::new()))
            .collect();

        let mut model = Model {
            class,
            attributes: Record::new(),
            previous: Snapshot::new(),
            defaults,
            references: HashMap::new(),
            attachments: BTreeMap::new(),
            meta: Record::new(),
            key: None,
            dirty: false,
            is_new: true,
            destroyed: false,
            errors: BTreeMap::new(),
            emitter: Emitter::new(),
        };
        if let Some(initialize) = model.class.initializer() {
            initialize(&mut model, args);
        }
        model
    }

    pub fn class(&self) -> &ModelClass {
        &self.class
    }

    /// Current value of a property, `None` if the class has no such
    /// property. Unset typed properties read as their type's default.
    pub fn get(&self, name: &str) -> Option<Value> {
        let spec = self.class.property(name)?;
        let value = match spec.kind() {
            PropertyKind::Typed { type_name } => match self.attributes.get(name) {
                Some(value) => value.clone(),
                None => self.default_for(name, type_name),
            },
            PropertyKind::Optional => self.attributes.get(name).cloned().unwrap_or_default(),
            PropertyKind::Enumerable { labels } => {
                PropertySpec::label_of(labels, self.attributes.get(name))
            }
            PropertyKind::Reference { .. } => self
                .references
                .get(name)
                .map(|target| Value::Hash(Model::serialize(target)))
                .unwrap_or_else(|| Value::Hash(Record::new())),
            PropertyKind::Computed(computed) => (computed.get)(self),
        };
        Some(value)
    }

    fn default_for(&self, name: &str, type_name: &str) -> Value {
        match self.defaults.get(name) {
            Some(cell) => cell.get_or_init(|| types::make_default(type_name)).clone(),
            None => types::make_default(type_name),
        }
    }

    /// Assigns a property through its setter.
    ///
    /// Typed and enumerable values are checked and rejected with a
    /// [`ValidationError`]. Null is accepted everywhere: strings become `""`,
    /// other types become null, and a reference is cleared.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let class = self.class.clone();
        let spec = class
            .property(name)
            .ok_or_else(|| class.unknown_property(name))?;

        match spec.kind() {
            PropertyKind::Reference { id_field } => {
                if value.is_truthy() {
                    return Err(ValidationError::new(name, value, "model with a key").into());
                }
                self.clear_reference(name, id_field)
            }
            PropertyKind::Computed(computed) => match &computed.set {
                Some(setter) => setter(self, value),
                None => Err(ValidationError::new(name, value, "writable property").into()),
            },
            _ => {
                let stored = spec.admit(value)?;
                self.store(name, stored);
                Ok(())
            }
        }
    }

    fn store(&mut self, name: &str, value: Value) {
        let prior = self.attributes.get(name).cloned();
        self.previous.entry(name.to_string()).or_insert(prior);
        let payload = value.to_string();
        self.attributes.insert(name.to_string(), value);
        self.changed(name, payload);
    }

    /// Returns a property to its never-set state.
    fn unset(&mut self, name: &str) {
        if let Some(prior) = self.attributes.remove(name) {
            self.previous.entry(name.to_string()).or_insert(Some(prior));
        }
        self.changed(name, Value::Null.to_string());
    }

    fn changed(&mut self, name: &str, payload: String) {
        self.dirty = true;
        self.emitter.emit(&events::change_of(name), payload);
        self.emitter.emit(events::CHANGE, name);
    }

    /// Points a reference property at `target`, or clears it with `None`.
    /// The target must have a key.
    pub fn set_reference(&mut self, name: &str, target: Option<&Model>) -> Result<()> {
        let class = self.class.clone();
        let id_field = match class.property(name).map(PropertySpec::kind) {
            Some(PropertyKind::Reference { id_field }) => id_field,
            _ => return Err(class.unknown_property(name).into()),
        };

        let Some(target) = target else {
            return self.clear_reference(name, id_field);
        };
        let key = target.key().ok_or_else(|| {
            ValidationError::new(name, Value::Hash(Model::serialize(target)), "model with a key")
        })?;
        self.set(id_field, key)?;
        self.references
            .insert(name.to_string(), Box::new(target.clone()));
        Ok(())
    }

    fn clear_reference(&mut self, name: &str, id_field: &str) -> Result<()> {
        self.set(id_field, Value::Null)?;
        self.references.remove(name);
        Ok(())
    }

    pub fn reference(&self, name: &str) -> Option<&Model> {
        self.references.get(name).map(Box::as_ref)
    }

    /// Every typed and enumerable property (defaulted when unset) plus the
    /// optional properties that were set.
    pub fn serialize(&self) -> Record {
        let mut out = Record::new();
        for spec in self.class.properties().iter() {
            let name = spec.name();
            let value = match spec.kind() {
                PropertyKind::Typed { .. } | PropertyKind::Enumerable { .. } => self.get(name),
                PropertyKind::Optional => self.attributes.get(name).cloned(),
                PropertyKind::Reference { .. } | PropertyKind::Computed(_) => None,
            };
            if let Some(value) = value {
                out.insert(name.to_string(), value);
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Hash(self.serialize()).to_json()
    }

    /// Applies every recognized stored property in `partial`. Non-hash input
    /// is ignored.
    pub fn update(&mut self, partial: &Value) -> Result<()> {
        match partial {
            Value::Hash(fields) => self.update_record(fields),
            _ => Ok(()),
        }
    }

    pub fn update_record(&mut self, fields: &Record) -> Result<()> {
        for (name, value) in fields {
            let known = self
                .class
                .property(name)
                .is_some_and(PropertySpec::is_stored);
            if known {
                self.set(name, value.clone())?;
            } else {
                tracing::trace!(class = %self.class.name(), property = %name, "skipping unknown property");
            }
        }
        self.emitter.emit(events::UPDATE, "");
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Resets the dirty flag, drops the rollback snapshot and clears
    /// attachment dirty flags.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        self.previous.clear();
        for attachment in self.attachments.values_mut() {
            attachment.dirty = false;
        }
    }

    /// Re-applies the snapshot through the setters; properties that were
    /// unset become unset again. Returns false and does nothing when the
    /// instance is clean or has no snapshot.
    ///
    /// The instance stays dirty afterwards; call [`Model::clear_dirty`] for a
    /// clean rollback.
    pub fn rollback(&mut self) -> bool {
        if !self.dirty || self.previous.is_empty() {
            return false;
        }
        let snapshot = std::mem::take(&mut self.previous);
        for (name, value) in snapshot {
            let Some(value) = value else {
                self.unset(&name);
                continue;
            };
            if let Err(err) = self.set(&name, value) {
                tracing::warn!(property = %name, error = %err, "rollback could not restore property");
            }
        }
        self.emitter.emit(events::ROLLBACK, "");
        true
    }

    pub fn previous_attributes(&self) -> &Snapshot {
        &self.previous
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            attributes: self.attributes.clone(),
            previous: self.previous.clone(),
            dirty: self.dirty,
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        self.attributes = checkpoint.attributes;
        self.previous = checkpoint.previous;
        self.dirty = checkpoint.dirty;
        self.emitter.emit(events::ROLLBACK, "");
    }

    /// Recomputes [`Model::errors`]. Never fails.
    pub fn valid(&mut self) -> bool {
        let class = self.class.clone();
        let mut errors = BTreeMap::new();

        for spec in class.properties().iter() {
            if let Some(value) = self.attributes.get(spec.name()) {
                if !value.is_null() && !spec.conforms(value) {
                    errors.insert(spec.name().to_string(), "invalid data".to_string());
                }
            }
        }
        for name in class.properties().required() {
            if !self.attributes.contains_key(name) {
                errors.insert(name.clone(), "missing".to_string());
            }
        }

        let mut valid = errors.is_empty();
        self.errors = errors;
        if let Some(validator) = class.validator() {
            valid = valid && validator(self);
        }
        valid
    }

    /// Errors found by the last [`Model::valid`] call.
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn property_type(&self, name: &str) -> Option<&str> {
        self.class.property_type(name)
    }

    pub fn property_types(&self) -> BTreeMap<String, String> {
        self.class.property_types()
    }

    /// Invokes a schema method.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let method = self
            .class
            .method(name)
            .ok_or_else(|| SchemaError::UnknownMethod {
                class: self.class.name().to_string(),
                method: name.to_string(),
            })?;
        method(self, args)
    }

    /// Logical key. Backed by the key field when it is a declared property,
    /// otherwise by a slot that is never serialized. Empty keys read as
    /// `None`.
    pub fn key(&self) -> Option<String> {
        match self.class.keyfield_property() {
            Some(field) => match self.attributes.get(&field) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(n @ Value::Number(_)) => Some(n.to_string()),
                _ => None,
            },
            None => self.key.clone().filter(|k| !k.is_empty()),
        }
    }

    pub fn set_key(&mut self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        match self.class.keyfield_property() {
            Some(field) => self.set(&field, key),
            None => {
                self.key = Some(key);
                Ok(())
            }
        }
    }

    /// Adapter-private metadata, such as a document revision.
    pub fn meta(&self, name: &str) -> Option<&Value> {
        self.meta.get(name)
    }

    pub fn set_meta(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.meta.insert(name.into(), value.into());
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Registers a listener; returns an id for [`Model::off`].
    pub fn on<F>(&mut self, event: &str, listener: F) -> String
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.emitter.on(event, listener)
    }

    pub fn off(&mut self, listener_id: &str) -> bool {
        self.emitter.off(listener_id)
    }

    pub(crate) fn emit(&mut self, event: &str, payload: impl Into<String>) {
        self.emitter.emit(event, payload);
    }
}

impl Model {
    /// Default cells with every default materialized, so a copy reads the
    /// same defaults as its source.
    fn settled_defaults(&self) -> HashMap<String, OnceCell<Value>> {
        self.defaults
            .iter()
            .map(|(name, cell)| {
                if let Some(PropertyKind::Typed { type_name }) =
                    self.class.property(name).map(PropertySpec::kind)
                {
                    cell.get_or_init(|| types::make_default(type_name));
                }
                (name.clone(), cell.clone())
            })
            .collect()
    }
}

/// Clones share no listeners.
impl Clone for Model {
    fn clone(&self) -> Self {
        Model {
            class: self.class.clone(),
            attributes: self.attributes.clone(),
            previous: self.previous.clone(),
            defaults: self.settled_defaults(),
            references: self.references.clone(),
            attachments: self.attachments.clone(),
            meta: self.meta.clone(),
            key: self.key.clone(),
            dirty: self.dirty,
            is_new: self.is_new,
            destroyed: self.destroyed,
            errors: self.errors.clone(),
            emitter: Emitter::new(),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("class", &self.class.name())
            .field("key", &self.key())
            .field("attributes", &self.attributes)
            .field("attachments", &self.attachments.keys().collect::<Vec<_>>())
            .field("dirty", &self.dirty)
            .field("is_new", &self.is_new)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl Serialize for Model {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(&Model::serialize(self))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};

    use crate::error::Error;
    use crate::model::build_class;
    use crate::schema::{Computed, ModelDefinition};

    use super::*;

    fn class() -> ModelClass {
        build_class(
            ModelDefinition::new()
                .singular("widget")
                .property("name", "string")
                .property("count", "number")
                .property("flag", "boolean")
                .property("created", "date")
                .property("tags", "array")
                .property("owner", "reference")
                .optional("notes")
                .enumerable("enum1", ["zero", "one", "two"])
                .required("name"),
        )
        .unwrap()
    }

    #[test]
    fn fresh_instance_is_clean_and_new() {
        let m = class().create();
        assert!(!m.is_dirty());
        assert!(m.is_new());
        assert!(!m.is_destroyed());
    }

    #[test]
    fn typed_getters_default_without_counting_as_set() {
        let mut m = class().create();
        assert_eq!(m.get("name"), Some(Value::from("")));
        assert_eq!(m.get("count"), Some(Value::from(0)));
        assert_eq!(m.get("tags"), Some(Value::Array(vec![])));
        assert!(!m.valid());
        assert_eq!(m.errors().get("name").map(String::as_str), Some("missing"));
    }

    #[test]
    fn default_dates_are_cached() {
        let m = class().create();
        assert_eq!(m.get("created"), m.get("created"));
    }

    #[test]
    fn setters_reject_wrong_types() {
        let mut m = class().create();
        assert!(matches!(m.set("name", true), Err(Error::Validation(_))));
        assert!(matches!(m.set("count", "twelve"), Err(Error::Validation(_))));
        assert!(matches!(m.set("created", "Invalid Date"), Err(Error::Validation(_))));
        assert!(!m.is_dirty());
    }

    #[test]
    fn date_setter_coerces() {
        let mut m = class().create();
        m.set("created", 1_371_205_800_000_i64).unwrap();
        let expected = Utc.with_ymd_and_hms(2013, 6, 14, 10, 30, 0).unwrap();
        assert_eq!(m.get("created"), Some(Value::Date(expected)));

        m.set("created", "2013-06-14T10:30:00Z").unwrap();
        assert_eq!(m.get("created"), Some(Value::Date(expected)));
    }

    #[test]
    fn null_assignment_coerces() {
        let mut m = class().create();
        m.set("name", Value::Null).unwrap();
        m.set("count", Value::Null).unwrap();
        assert_eq!(m.get("name"), Some(Value::from("")));
        assert_eq!(m.get("count"), Some(Value::Null));
    }

    #[test]
    fn enumerables_store_indices_and_read_labels() {
        let mut m = class().create();
        assert_eq!(m.get("enum1"), Some(Value::from("")));
        m.set("enum1", "one").unwrap();
        assert_eq!(m.get("enum1"), Some(Value::from("one")));
        assert_eq!(m.attributes.get("enum1"), Some(&Value::from(1)));

        m.set("enum1", 2).unwrap();
        assert_eq!(m.get("enum1"), Some(Value::from("two")));

        assert!(m.set("enum1", 5).is_err());
        assert!(m.set("enum1", "nope").is_err());

        m.set("enum1", "").unwrap();
        assert_eq!(m.attributes.get("enum1"), Some(&Value::from(0)));
        assert_eq!(m.get("enum1"), Some(Value::from("zero")));
    }

    #[test]
    fn optional_properties_mark_dirty_and_serialize_only_when_set() {
        let mut m = class().create();
        assert!(!m.serialize().contains_key("notes"));
        m.set("notes", Value::from(vec![1, 2])).unwrap();
        assert!(m.is_dirty());
        assert_eq!(m.serialize().get("notes"), Some(&Value::from(vec![1, 2])));
    }

    #[test]
    fn serialize_is_stable() {
        let mut m = class().create();
        m.set("name", "fred").unwrap();
        assert_eq!(m.serialize(), m.serialize());
        assert_eq!(m.to_json()["name"], "fred");
        assert!(m.to_json().get("owner").is_none());
        assert_eq!(m.to_json()["owner_id"], "");
    }

    #[test]
    fn references_track_the_target_key() {
        let mut owner = class().create();
        owner.key = Some("owner-1".into());
        let mut m = class().create();

        m.set_reference("owner", Some(&owner)).unwrap();
        assert_eq!(m.get("owner_id"), Some(Value::from("owner-1")));
        assert!(m.reference("owner").is_some());
        assert_eq!(m.get("owner"), Some(Value::Hash(owner.serialize())));

        m.set("owner", false).unwrap();
        assert_eq!(m.get("owner_id"), Some(Value::from("")));
        assert!(m.reference("owner").is_none());
    }

    #[test]
    fn references_require_a_key() {
        let owner = class().create();
        let mut m = class().create();
        assert!(m.set_reference("owner", Some(&owner)).is_err());
        assert!(m.set("owner", Value::from("raw")).is_err());
    }

    #[test]
    fn update_skips_unknown_keys_and_non_hashes() {
        let mut m = class().create();
        let partial: Value = serde_json::json!({"name": "x", "bogus": 1}).into();
        m.update(&partial).unwrap();
        assert_eq!(m.get("name"), Some(Value::from("x")));
        assert_eq!(m.get("bogus"), None);

        m.clear_dirty();
        m.update(&Value::from("not a hash")).unwrap();
        assert!(!m.is_dirty());
    }

    #[test]
    fn rollback_restores_snapshot() {
        let mut m = class().create();
        assert!(!m.rollback());

        m.set("name", "first").unwrap();
        m.set("count", 3).unwrap();
        m.clear_dirty();

        m.set("name", "second").unwrap();
        m.set("name", "third").unwrap();
        m.set("count", 4).unwrap();
        assert!(m.rollback());
        assert_eq!(m.get("name"), Some(Value::from("first")));
        assert_eq!(m.get("count"), Some(Value::from(3)));
    }

    #[test]
    fn clear_dirty_empties_snapshot() {
        let mut m = class().create();
        m.set("name", "a").unwrap();
        assert!(!m.previous_attributes().is_empty());
        m.clear_dirty();
        assert!(!m.is_dirty());
        assert!(m.previous_attributes().is_empty());
        assert!(!m.rollback());
    }

    #[test]
    fn valid_flags_invalid_stored_data() {
        let mut m = class().create();
        m.set("name", "ok").unwrap();
        m.attributes.insert("count".into(), Value::from("bad"));
        assert!(!m.valid());
        assert_eq!(
            m.errors().get("count").map(String::as_str),
            Some("invalid data")
        );
    }

    #[test]
    fn custom_validator_is_anded() {
        let class = build_class(
            ModelDefinition::new()
                .property("count", "number")
                .validator(|m| m.get("count").and_then(|v| v.as_f64()).unwrap_or(0.0) > 1.0),
        )
        .unwrap();
        let mut m = class.create();
        assert!(!m.valid());
        assert!(m.errors().is_empty());
        m.set("count", 2).unwrap();
        assert!(m.valid());
    }

    #[test]
    fn setters_emit_specific_then_general_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut m = class().create();
        let specific = seen.clone();
        m.on("change.name", move |payload| {
            specific.lock().unwrap().push(format!("change.name {payload}"))
        });
        let general = seen.clone();
        m.on("change", move |payload| {
            general.lock().unwrap().push(format!("change {payload}"))
        });

        m.set("name", "fred").unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["change.name \"fred\"".to_string(), "change name".to_string()]
        );
    }

    #[test]
    fn methods_and_initializer() {
        let class = build_class(
            ModelDefinition::new()
                .property("count", "number")
                .initialize(|m, args| {
                    if let Some(start) = args.first() {
                        let _ = m.set("count", start.clone());
                    }
                })
                .method("bump", |m, _| {
                    let next = m.get("count").and_then(|v| v.as_f64()).unwrap_or(0.0) + 1.0;
                    m.set("count", next)?;
                    Ok(Value::from(next))
                }),
        )
        .unwrap();

        let mut m = class.create_with(&[Value::from(5)]);
        assert_eq!(m.call("bump", &[]).unwrap(), Value::from(6));
        assert!(matches!(
            m.call("nope", &[]),
            Err(Error::Schema(SchemaError::UnknownMethod { .. }))
        ));
    }

    #[test]
    fn computed_properties_use_custom_accessors() {
        let class = build_class(
            ModelDefinition::new()
                .property("first", "string")
                .property("last", "string")
                .computed(
                    "full",
                    Computed::new(|m| {
                        let first = m.get("first").unwrap_or_default();
                        let last = m.get("last").unwrap_or_default();
                        Value::from(format!(
                            "{} {}",
                            first.as_str().unwrap_or(""),
                            last.as_str().unwrap_or("")
                        ))
                    })
                    .with_setter(|m, v| {
                        let text = v.as_str().unwrap_or("").to_string();
                        let mut parts = text.splitn(2, ' ');
                        m.set("first", parts.next().unwrap_or(""))?;
                        m.set("last", parts.next().unwrap_or(""))
                    }),
                ),
        )
        .unwrap();

        let mut m = class.create();
        m.set("full", "Ada Lovelace").unwrap();
        assert_eq!(m.get("first"), Some(Value::from("Ada")));
        assert_eq!(m.get("full"), Some(Value::from("Ada Lovelace")));
        assert!(!m.serialize().contains_key("full"));
    }

    #[test]
    fn clone_keeps_state_but_not_listeners() {
        let mut m = class().create();
        m.set("name", "x").unwrap();
        let copy = m.clone();
        assert_eq!(copy.serialize(), m.serialize());
        assert_eq!(copy.get("created"), m.get("created"));
        assert!(copy.is_dirty());
    }

    #[test]
    fn rollback_unsets_what_was_never_set() {
        let mut m = class().create();
        m.set("enum1", "two").unwrap();
        m.set("notes", "draft").unwrap();
        assert!(m.rollback());
        assert!(!m.attributes.contains_key("enum1"));
        assert!(!m.attributes.contains_key("notes"));
        assert_eq!(m.get("enum1"), Some(Value::from("")));
    }

    #[test]
    fn serde_serialization_matches_serialize() {
        let mut m = class().create();
        m.set("name", "x").unwrap();
        assert_eq!(serde_json::to_value(&m).unwrap(), m.to_json());
    }
}
