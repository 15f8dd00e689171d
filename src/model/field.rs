use std::fmt;
use std::marker::PhantomData;

use crate::error::Result;
use crate::model::Model;
use crate::value::{FromValue, Value};

/// Typed accessor for one property of a class.
///
/// Obtained from [`ModelClass::field`](crate::ModelClass::field), which checks
/// the name once so reads and writes only deal with values.
pub struct Field<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Field<T>
where
    T: FromValue + Into<Value>,
{
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` if the current value does not convert to `T`.
    pub fn get(&self, model: &Model) -> Option<T> {
        model.get(&self.name).and_then(|v| T::from_value(&v))
    }

    pub fn set(&self, model: &mut Model, value: T) -> Result<()> {
        model.set(&self.name, value)
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
