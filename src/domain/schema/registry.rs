//! SchemaRegistry for mapping mode names to their field schema and the
//! submitted-to-schema path mapping.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::Fields;
use crate::error::SchemaError;

/// Translates a path observed while walking a resource (lower-cased
/// attribute names joined by `.`) into the dotted schema path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, String>")]
pub struct Mapping(HashMap<String, String>);

impl From<HashMap<String, String>> for Mapping {
    fn from(raw: HashMap<String, String>) -> Self {
        raw.into_iter().collect()
    }
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, walked: impl Into<String>, schema: impl Into<String>) {
        self.0.insert(walked.into().to_lowercase(), schema.into());
    }

    pub fn get(&self, walked: &str) -> Option<&str> {
        self.0.get(walked).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut m = Mapping::new();
        for (k, v) in iter {
            m.insert(k, v);
        }
        m
    }
}

/// Everything the engine needs to know about one mode.
#[derive(Debug, Clone, Deserialize)]
pub struct ModeSchema {
    /// Mode name, e.g. `talent` or `forums`.
    pub mode: String,
    /// Resource name; prefix of every table name the validator emits.
    pub resource: String,
    pub editor: Fields,
    pub mapping: Mapping,
}

impl ModeSchema {
    pub fn new(mode: impl Into<String>, resource: impl Into<String>, editor: Fields, mapping: Mapping) -> Self {
        Self {
            mode: mode.into(),
            resource: resource.into(),
            editor,
            mapping,
        }
    }

    /// Decodes a mode bundle. The schema format itself belongs to the
    /// caller; JSON is provided because it is what the tests and the
    /// preflight fixtures use.
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        let schema: ModeSchema = serde_json::from_str(raw)?;
        schema.editor.check()?;
        Ok(schema)
    }
}

/// A registry that maps mode names to their schema bundles.
///
/// Loaded once at startup and shared read-only afterwards.
pub struct SchemaRegistry {
    modes: HashMap<String, Arc<ModeSchema>>,
}

impl SchemaRegistry {
    /// Creates a new empty SchemaRegistry.
    pub fn new() -> Self {
        Self { modes: HashMap::new() }
    }

    /// Registers a mode after checking its schema invariants.
    pub fn register(&mut self, schema: ModeSchema) -> Result<(), SchemaError> {
        schema.editor.check()?;
        self.modes.insert(schema.mode.clone(), Arc::new(schema));
        Ok(())
    }

    /// Retrieves a mode's schema by name.
    pub fn get(&self, mode: &str) -> Result<Arc<ModeSchema>, SchemaError> {
        self.modes
            .get(mode)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownMode(mode.to_string()))
    }

    /// Returns all registered mode names, sorted.
    pub fn list_modes(&self) -> Vec<String> {
        let mut modes: Vec<String> = self.modes.keys().cloned().collect();
        modes.sort();
        modes
    }

    /// Re-checks every registered schema.
    pub fn check_all(&self) -> Result<(), SchemaError> {
        for schema in self.modes.values() {
            schema.editor.check()?;
        }
        Ok(())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
