// src/connection/properties.rs

//! A typed, lock-protected attribute store owned by each connection.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A value stored against a connection by application code.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::Uint(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<Bytes> for PropertyValue {
    fn from(v: Bytes) -> Self {
        PropertyValue::Bytes(v)
    }
}

/// Extracts a concrete type from a [`PropertyValue`], failing on a kind mismatch.
macro_rules! impl_try_from_property {
    ($ty:ty, $variant:ident) => {
        impl TryFrom<PropertyValue> for $ty {
            type Error = PropertyValue;

            fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
                match value {
                    PropertyValue::$variant(v) => Ok(v),
                    other => Err(other),
                }
            }
        }
    };
}

impl_try_from_property!(bool, Bool);
impl_try_from_property!(i64, Int);
impl_try_from_property!(u64, Uint);
impl_try_from_property!(f64, Float);
impl_try_from_property!(String, Text);
impl_try_from_property!(Bytes, Bytes);

/// Per-key last-write-wins store. Readers proceed concurrently.
#[derive(Debug, Default)]
pub struct Properties {
    values: RwLock<HashMap<String, PropertyValue>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, returning the previous value if any.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.values.write().insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.values.read().get(key).cloned()
    }

    /// Returns the value under `key` converted to `T`, or `None` if it is
    /// missing or of another kind.
    pub fn get_as<T>(&self, key: &str) -> Option<T>
    where
        T: TryFrom<PropertyValue>,
    {
        self.get(key).and_then(|v| T::try_from(v).ok())
    }

    pub fn remove(&self, key: &str) -> Option<PropertyValue> {
        self.values.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}
