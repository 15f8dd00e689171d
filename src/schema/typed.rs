//! Plain Rust structs as typed views over model instances.
//!
//! `#[derive(Schema)]` implements [`Schema`] for a struct with named
//! fields: the struct's shape becomes a [`ModelDefinition`] and each field
//! is read and written through the instance's checked setters.

use crate::error::{Result, SchemaError, ValidationError};
use crate::model::{build_class, Model, ModelClass};
use crate::schema::ModelDefinition;
use crate::value::FromValue;

pub trait Schema: Sized {
    fn definition() -> ModelDefinition;

    fn from_model(model: &Model) -> Result<Self>;

    /// Assigns every field to `model` through its setter.
    fn write_to(&self, model: &mut Model) -> Result<()>;

    fn build_class() -> Result<ModelClass, SchemaError> {
        build_class(Self::definition())
    }

    /// A new instance of `class` holding this value.
    fn to_model(&self, class: &ModelClass) -> Result<Model> {
        let mut model = class.create();
        self.write_to(&mut model)?;
        Ok(model)
    }
}

/// Reads one property as `T`.
pub fn read_field<T: FromValue>(model: &Model, name: &str) -> Result<T> {
    let value = model
        .get(name)
        .ok_or_else(|| model.class().unknown_property(name))?;
    match T::from_value(&value) {
        Some(typed) => Ok(typed),
        None => Err(ValidationError::new(name, value, std::any::type_name::<T>()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::value::Value;

    struct Tally {
        label: String,
        count: i64,
    }

    impl Schema for Tally {
        fn definition() -> ModelDefinition {
            ModelDefinition::new()
                .singular("tally")
                .property("label", "string")
                .property("count", "number")
        }

        fn from_model(model: &Model) -> Result<Self> {
            Ok(Tally {
                label: read_field(model, "label")?,
                count: read_field(model, "count")?,
            })
        }

        fn write_to(&self, model: &mut Model) -> Result<()> {
            model.set("label", self.label.clone())?;
            model.set("count", self.count)?;
            Ok(())
        }
    }

    #[test]
    fn round_trips_through_a_model() {
        let class = Tally::build_class().unwrap();
        let tally = Tally {
            label: "votes".into(),
            count: 3,
        };
        let model = tally.to_model(&class).unwrap();
        assert!(model.is_dirty());
        let back = Tally::from_model(&model).unwrap();
        assert_eq!(back.label, "votes");
        assert_eq!(back.count, 3);
    }

    #[test]
    fn read_field_reports_unknown_and_mistyped() {
        let class = Tally::build_class().unwrap();
        let mut model = class.create();
        assert!(matches!(
            read_field::<String>(&model, "missing"),
            Err(Error::Schema(SchemaError::UnknownProperty { .. }))
        ));
        model.set("count", 2.5).unwrap();
        assert!(matches!(
            read_field::<i64>(&model, "count"),
            Err(Error::Validation(_))
        ));
        assert_eq!(read_field::<Value>(&model, "count").unwrap(), Value::from(2.5));
    }
}
