use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::AdapterError;
use crate::types::BuiltinType;

/// Native column validator declared for each column of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum ColumnValidator {
    #[strum(serialize = "UTF8Type")]
    Utf8,
    #[strum(serialize = "DoubleType")]
    Double,
    #[strum(serialize = "BooleanType")]
    Boolean,
    #[strum(serialize = "DateType")]
    Date,
    #[strum(serialize = "BytesType")]
    Bytes,
}

impl ColumnValidator {
    /// Validator for a registered type name. Structured and custom types
    /// are kept as JSON text.
    pub fn for_type(type_name: &str) -> Self {
        match type_name.parse::<BuiltinType>() {
            Ok(BuiltinType::String) => ColumnValidator::Utf8,
            Ok(BuiltinType::Number) => ColumnValidator::Double,
            Ok(BuiltinType::Boolean) => ColumnValidator::Boolean,
            Ok(BuiltinType::Date) => ColumnValidator::Date,
            _ => ColumnValidator::Utf8,
        }
    }

    pub fn accepts(self, cell: &Cell) -> bool {
        matches!(
            (self, cell),
            (ColumnValidator::Utf8, Cell::Utf8(_))
                | (ColumnValidator::Double, Cell::Double(_))
                | (ColumnValidator::Boolean, Cell::Boolean(_))
                | (ColumnValidator::Date, Cell::Date(_))
                | (ColumnValidator::Bytes, Cell::Bytes(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Utf8(String),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub validator: ColumnValidator,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, validator: ColumnValidator) -> Self {
        ColumnDef {
            name: name.into(),
            validator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyDef {
    pub name: String,
    pub key_validator: ColumnValidator,
    pub columns: Vec<ColumnDef>,
}

/// Columns of one row, by name. Absent columns are null.
pub type RowData = BTreeMap<String, Cell>;

/// A connected column-store client.
#[async_trait]
pub trait ColumnStoreDriver: Send + Sync {
    /// Creates the keyspace if it does not exist.
    async fn ensure_keyspace(&self, keyspace: &str) -> Result<(), AdapterError>;

    /// Names of the families in a keyspace.
    async fn describe(&self, keyspace: &str) -> Result<Vec<String>, AdapterError>;

    /// Fails if the family already exists.
    async fn create_family(&self, keyspace: &str, family: FamilyDef) -> Result<(), AdapterError>;

    /// Writes a whole row, replacing any previous columns.
    async fn insert(
        &self,
        keyspace: &str,
        family: &str,
        row_key: &str,
        row: RowData,
    ) -> Result<(), AdapterError>;

    /// Writes the given columns only, creating the row if needed.
    async fn update(
        &self,
        keyspace: &str,
        family: &str,
        row_key: &str,
        columns: RowData,
    ) -> Result<(), AdapterError>;

    /// One entry per requested key, in order.
    async fn select(
        &self,
        keyspace: &str,
        family: &str,
        row_keys: &[String],
    ) -> Result<Vec<Option<RowData>>, AdapterError>;

    async fn select_keys(&self, keyspace: &str, family: &str) -> Result<Vec<String>, AdapterError>;

    async fn delete(&self, keyspace: &str, family: &str, row_keys: &[String])
        -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validators_follow_type_names() {
        assert_eq!(ColumnValidator::for_type("string"), ColumnValidator::Utf8);
        assert_eq!(ColumnValidator::for_type("number"), ColumnValidator::Double);
        assert_eq!(ColumnValidator::for_type("boolean"), ColumnValidator::Boolean);
        assert_eq!(ColumnValidator::for_type("date"), ColumnValidator::Date);
        assert_eq!(ColumnValidator::for_type("hash"), ColumnValidator::Utf8);
        assert_eq!(ColumnValidator::for_type("money"), ColumnValidator::Utf8);
    }

    #[test]
    fn validator_names_are_native() {
        assert_eq!(ColumnValidator::Utf8.to_string(), "UTF8Type");
        assert_eq!("DateType".parse::<ColumnValidator>().unwrap(), ColumnValidator::Date);
        let name: &'static str = ColumnValidator::Double.into();
        assert_eq!(name, "DoubleType");
    }
}
