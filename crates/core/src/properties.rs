//! Key/value game properties (gravity constants, spawn chances, ...).
//!
//! The asset/property loader itself lives outside this workspace; the core
//! only consumes lookups with defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read-only property lookups with caller-supplied defaults.
pub trait PropertySource {
    /// Look up a string property.
    fn get_str(&self, key: &str, default: &str) -> String;
    /// Look up a float property. Integer values are coerced.
    fn get_f32(&self, key: &str, default: f32) -> f32;
    /// Look up an integer property.
    fn get_i64(&self, key: &str, default: i64) -> i64;
}

/// A single property value as found in a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    Text(String),
}

/// In-memory property table, typically deserialized from the `[properties]`
/// section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyTable {
    values: HashMap<String, PropertyValue>,
}

impl PropertyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.values.insert(key.into(), value);
    }

    /// Number of stored properties.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PropertySource for PropertyTable {
    fn get_str(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(PropertyValue::Text(text)) => text.clone(),
            _ => default.to_string(),
        }
    }

    fn get_f32(&self, key: &str, default: f32) -> f32 {
        match self.values.get(key) {
            Some(PropertyValue::Float(value)) => *value as f32,
            Some(PropertyValue::Int(value)) => *value as f32,
            _ => default,
        }
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(PropertyValue::Int(value)) => *value,
            _ => default,
        }
    }
}
