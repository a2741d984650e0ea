//! Validity-tagged metric values.
//!
//! Every optional metric in the device and process records is a [`Field`]. A
//! field is either present with a value or absent, which lets "the driver
//! does not report this" be told apart from a legitimate zero.

use serde::{Deserialize, Serialize};

/// A metric value paired with its validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Field<T>(Option<T>);

impl<T> Field<T> {
    /// An absent field.
    pub const fn absent() -> Self {
        Field(None)
    }

    pub const fn present(value: T) -> Self {
        Field(Some(value))
    }

    /// Store `value` and mark the field present.
    pub fn set(&mut self, value: T) {
        self.0 = Some(value);
    }

    /// Mark the field absent, dropping any stored value.
    pub fn reset(&mut self) {
        self.0 = None;
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn as_ref(&self) -> Option<&T> {
        self.0.as_ref()
    }

    /// Read a field the caller knows to be present.
    ///
    /// # Panics
    ///
    /// Panics when the field is absent. Reading an absent field is a bug in
    /// the caller; use [`Field::get`] when presence is not guaranteed.
    pub fn value(&self) -> &T {
        match &self.0 {
            Some(value) => value,
            None => panic!("read of an absent metric field"),
        }
    }

    pub fn into_option(self) -> Option<T> {
        self.0
    }
}

impl<T: Copy> Field<T> {
    pub fn get(&self) -> Option<T> {
        self.0
    }
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field(None)
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        Field(value)
    }
}
