//! Compiles a [`ModelDefinition`] into the accessor table shared by every
//! instance of a class.

use std::collections::HashMap;

use crate::error::{SchemaError, ValidationError};
use crate::schema::{Computed, ModelDefinition};
use crate::types::{self, BuiltinType};
use crate::value::Value;

#[derive(Clone)]
pub enum PropertyKind {
    /// Checked against a registered type on every assignment.
    Typed { type_name: String },
    /// Stored and serialized when set, never checked.
    Optional,
    /// Stored as an index into `labels`.
    Enumerable { labels: Vec<String> },
    /// Runtime pointer to another model; only `id_field` is persisted.
    Reference { id_field: String },
    Computed(Computed),
}

#[derive(Clone)]
pub struct PropertySpec {
    name: String,
    kind: PropertyKind,
}

impl PropertySpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// Type name reported by introspection.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            PropertyKind::Typed { type_name } => type_name,
            PropertyKind::Enumerable { .. } => BuiltinType::Number.name(),
            PropertyKind::Reference { .. } => BuiltinType::Reference.name(),
            PropertyKind::Optional | PropertyKind::Computed(_) => BuiltinType::Untyped.name(),
        }
    }

    /// Whether the value lives in the attribute map.
    pub fn is_stored(&self) -> bool {
        matches!(
            self.kind,
            PropertyKind::Typed { .. } | PropertyKind::Optional | PropertyKind::Enumerable { .. }
        )
    }

    pub fn labels(&self) -> Option<&[String]> {
        match &self.kind {
            PropertyKind::Enumerable { labels } => Some(labels),
            _ => None,
        }
    }

    /// Runs the setter checks and returns the value to store.
    pub(crate) fn admit(&self, value: Value) -> Result<Value, ValidationError> {
        match &self.kind {
            PropertyKind::Typed { type_name } => self.admit_typed(type_name, value),
            PropertyKind::Enumerable { labels } => self.admit_enumerable(labels, value),
            _ => Ok(value),
        }
    }

    fn admit_typed(&self, type_name: &str, value: Value) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(if type_name == BuiltinType::String.name() {
                Value::String(String::new())
            } else {
                Value::Null
            });
        }
        let Some(descriptor) = types::lookup(type_name) else {
            return Err(ValidationError::new(&self.name, value, type_name));
        };
        let value = descriptor.coerce(value);
        if descriptor.validate(&value) {
            Ok(value)
        } else {
            Err(ValidationError::new(&self.name, value, type_name))
        }
    }

    fn admit_enumerable(&self, labels: &[String], value: Value) -> Result<Value, ValidationError> {
        let index = match &value {
            Value::Null => return Ok(Value::Null),
            Value::String(s) if s.is_empty() => Some(0),
            Value::String(s) => labels.iter().position(|l| l == s),
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && (*n as usize) < labels.len() => {
                Some(*n as usize)
            }
            _ => None,
        };
        match index {
            Some(i) => Ok(Value::from(i)),
            None => Err(ValidationError::new(
                &self.name,
                value,
                format!("one of [{}]", labels.join(", ")),
            )),
        }
    }

    /// Whether a stored value still satisfies the property's type.
    pub(crate) fn conforms(&self, value: &Value) -> bool {
        match &self.kind {
            PropertyKind::Typed { type_name } => types::validate(type_name, value),
            PropertyKind::Enumerable { labels } => matches!(
                value,
                Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && (*n as usize) < labels.len()
            ),
            _ => true,
        }
    }

    /// Maps a stored enumerable index back to its label; `""` when unset.
    pub(crate) fn label_of(labels: &[String], stored: Option<&Value>) -> Value {
        let label = stored
            .and_then(Value::as_f64)
            .filter(|n| n.fract() == 0.0 && *n >= 0.0)
            .and_then(|n| labels.get(n as usize));
        Value::String(label.cloned().unwrap_or_default())
    }
}

/// The compiled accessor table.
#[derive(Clone, Default)]
pub struct PropertyTable {
    specs: Vec<PropertySpec>,
    index: HashMap<String, usize>,
    required: Vec<String>,
}

impl PropertyTable {
    pub fn compile(definition: &ModelDefinition) -> Result<Self, SchemaError> {
        let mut table = PropertyTable::default();

        for (name, type_name) in &definition.properties {
            if type_name == BuiltinType::Reference.name() {
                table.add_reference(name)?;
                continue;
            }
            if !types::is_registered(type_name) {
                return Err(SchemaError::UnknownType {
                    property: name.clone(),
                    type_name: type_name.clone(),
                });
            }
            table.push(
                name,
                PropertyKind::Typed {
                    type_name: type_name.clone(),
                },
            )?;
        }
        for name in &definition.optional {
            table.push(name, PropertyKind::Optional)?;
        }
        for (name, labels) in &definition.enumerables {
            if labels.is_empty() {
                return Err(SchemaError::EmptyEnumeration(name.clone()));
            }
            table.push(
                name,
                PropertyKind::Enumerable {
                    labels: labels.clone(),
                },
            )?;
        }
        for name in &definition.references {
            table.add_reference(name)?;
        }
        for (name, computed) in &definition.computed {
            table.push(name, PropertyKind::Computed(computed.clone()))?;
        }

        for name in &definition.required {
            match table.get(name) {
                Some(spec) if spec.is_stored() => table.required.push(name.clone()),
                _ => tracing::warn!(property = %name, "ignoring required name that is not a stored property"),
            }
        }

        Ok(table)
    }

    fn add_reference(&mut self, name: &str) -> Result<(), SchemaError> {
        let id_field = format!("{name}_id");
        self.push(
            &id_field,
            PropertyKind::Typed {
                type_name: BuiltinType::String.to_string(),
            },
        )?;
        self.push(name, PropertyKind::Reference { id_field })
    }

    fn push(&mut self, name: &str, kind: PropertyKind) -> Result<(), SchemaError> {
        if self.index.contains_key(name) {
            return Err(SchemaError::DuplicateProperty(name.to_string()));
        }
        self.index.insert(name.to_string(), self.specs.len());
        self.specs.push(PropertySpec {
            name: name.to_string(),
            kind,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PropertySpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertySpec> {
        self.specs.iter()
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PropertyTable {
        let def = ModelDefinition::new()
            .property("name", "string")
            .property("owner", "reference")
            .optional("notes")
            .enumerable("enum1", ["zero", "one", "two"])
            .required("name")
            .required("nonsense");
        PropertyTable::compile(&def).unwrap()
    }

    #[test]
    fn references_expand_into_an_id_field() {
        let table = table();
        assert_eq!(table.get("owner_id").unwrap().type_name(), "string");
        assert!(matches!(
            table.get("owner").unwrap().kind(),
            PropertyKind::Reference { id_field } if id_field == "owner_id"
        ));
    }

    #[test]
    fn required_keeps_only_stored_properties() {
        assert_eq!(table().required(), ["name".to_string()]);
    }

    #[test]
    fn enumerables_report_number() {
        assert_eq!(table().get("enum1").unwrap().type_name(), "number");
        assert_eq!(table().get("notes").unwrap().type_name(), "untyped");
    }

    #[test]
    fn unknown_type_fails_the_build() {
        let def = ModelDefinition::new().property("when", "timestamp");
        assert!(matches!(
            PropertyTable::compile(&def),
            Err(SchemaError::UnknownType { property, type_name }) if property == "when" && type_name == "timestamp"
        ));
    }

    #[test]
    fn duplicate_names_fail_the_build() {
        let def = ModelDefinition::new()
            .property("name", "string")
            .optional("name");
        assert!(matches!(
            PropertyTable::compile(&def),
            Err(SchemaError::DuplicateProperty(name)) if name == "name"
        ));

        let def = ModelDefinition::new()
            .property("owner_id", "string")
            .reference("owner");
        assert!(PropertyTable::compile(&def).is_err());
    }

    #[test]
    fn enumerable_admission() {
        let table = table();
        let spec = table.get("enum1").unwrap();
        assert_eq!(spec.admit(Value::from("two")).unwrap(), Value::from(2));
        assert_eq!(spec.admit(Value::from(1)).unwrap(), Value::from(1));
        assert_eq!(spec.admit(Value::from("")).unwrap(), Value::from(0));
        assert!(spec.admit(Value::from(3)).is_err());
        assert!(spec.admit(Value::from(-1)).is_err());
        assert!(spec.admit(Value::from(0.5)).is_err());
        assert!(spec.admit(Value::from("nope")).is_err());
    }

    #[test]
    fn null_typed_values_collapse() {
        let table = table();
        assert_eq!(
            table.get("name").unwrap().admit(Value::Null).unwrap(),
            Value::from("")
        );
    }
}
