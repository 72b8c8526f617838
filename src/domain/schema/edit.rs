//! Mutation of an editor field tree. Used by the populator to write display
//! values into the clone of a mode's editor schema.

use chrono::{DateTime, Utc};

use super::{Field, Fields, WidgetKind};
use crate::error::SchemaError;

/// Epochs at or above this value mean "ongoing" rather than a real date.
pub const PRESENT_THRESHOLD: i64 = 9_000_000_000_000_000;

impl Fields {
    /// Finds a field and makes it visible in the editor.
    pub fn set_init(&mut self, path: &str) -> Result<&mut Field, SchemaError> {
        let f = self.field_mut(path)?;
        f.disabled = false;
        f.request_only = false;
        Ok(f)
    }

    pub fn wrap_field(&mut self, path: &str, wrap: &str) -> Result<(), SchemaError> {
        self.set_init(path)?.wrap = wrap.to_string();
        Ok(())
    }

    /// Removes the field named by the last segment of `path` from its parent.
    pub fn remove_field(&mut self, path: &str) -> Result<(), SchemaError> {
        let lower = path.to_lowercase();
        let (parent, name) = match lower.rsplit_once('.') {
            Some(split) => split,
            None => {
                let before = self.0.len();
                self.0.retain(|f| f.name != lower);
                return if self.0.len() == before {
                    Err(SchemaError::NoSuchField(path.to_string()))
                } else {
                    Ok(())
                };
            }
        };
        let parent = self.field_mut(parent)?;
        match parent.fields.iter().position(|f| f.name == name) {
            Some(i) => {
                parent.fields.remove(i);
                Ok(())
            }
            None => Err(SchemaError::NoSuchField(path.to_string())),
        }
    }

    /// Appends a fresh instance of the field at `path`.
    pub fn add_field_instance(&mut self, path: &str) -> Result<(), SchemaError> {
        let f = self.set_init(path)?;
        let mut instance = f.clone();
        instance.instances.clear();
        f.instances.push(instance);
        Ok(())
    }

    pub fn set_with_bool(&mut self, path: &str, b: bool) -> Result<(), SchemaError> {
        let f = self.set_init(path)?;
        let mut default_at = 0;
        let mut value_set = false;
        for (i, v) in f.values.iter_mut().enumerate() {
            if v.default {
                default_at = i;
            }
            v.default = v.truth == b;
            value_set |= v.default;
        }
        if !value_set {
            if let Some(v) = f.values.get_mut(default_at) {
                v.default = true;
            }
        }
        Ok(())
    }

    pub fn set_with_int(&mut self, path: &str, n: i64) -> Result<(), SchemaError> {
        let f = self.set_init(path)?;
        match f.kind {
            WidgetKind::Calendar => f.text = format_epoch(n, "%B %Y"),
            WidgetKind::Date => f.text = format_epoch(n, "%B %-d, %Y"),
            _ => f.text = n.to_string(),
        }
        Ok(())
    }

    pub fn set_with_float(&mut self, path: &str, n: f64) -> Result<(), SchemaError> {
        self.set_init(path)?.text = n.to_string();
        Ok(())
    }

    pub fn set_with_string(&mut self, path: &str, s: &str) -> Result<(), SchemaError> {
        let display = {
            let f = self.field(path)?;
            match f.kind {
                WidgetKind::Dropdown => {
                    let source = if f.reference.is_empty() {
                        f
                    } else {
                        self.field(&f.reference)?
                    };
                    source.values.iter().find(|v| v.name == s).map(|v| {
                        let text = if v.values.is_empty() {
                            v.text.clone()
                        } else {
                            let mut parts: Vec<&str> = v.values.iter().map(|n| n.text.as_str()).collect();
                            parts.push(&v.text);
                            parts.join(" ")
                        };
                        (text, v.icon.clone())
                    })
                }
                _ => None,
            }
        };

        let f = self.set_init(path)?;
        if f.kind == WidgetKind::Radio {
            let mut default_at = 0;
            let mut value_set = false;
            for (i, v) in f.values.iter_mut().enumerate() {
                if v.default {
                    default_at = i;
                }
                v.default = !value_set && v.name == s;
                value_set |= v.default;
            }
            if !value_set {
                if let Some(v) = f.values.get_mut(default_at) {
                    v.default = true;
                }
            }
            return Ok(());
        }

        match display {
            Some((text, icon)) => {
                f.text = text;
                f.icon = icon;
            }
            None => f.text = s.to_string(),
        }
        Ok(())
    }

    pub fn set_with_slice(&mut self, path: &str, items: &[String]) -> Result<(), SchemaError> {
        let kind = self.set_init(path)?.kind;
        match kind {
            WidgetKind::Checkbox => {
                let f = self.field_mut(path)?;
                for v in f.values.iter_mut() {
                    if items.iter().any(|s| *s == v.name) {
                        v.default = true;
                    }
                }
                Ok(())
            }
            WidgetKind::Tagger => {
                let f = self.field_mut(path)?;
                for s in items {
                    f.values.push(super::FieldValue {
                        text: s.clone(),
                        ..Default::default()
                    });
                }
                Ok(())
            }
            _ => {
                for (i, s) in items.iter().enumerate() {
                    self.add_field_instance(path)?;
                    self.set_with_string(&format!("{}.{}", path, i), s)?;
                }
                Ok(())
            }
        }
    }
}

fn format_epoch(n: i64, pattern: &str) -> String {
    if n >= PRESENT_THRESHOLD {
        return "Present".to_string();
    }
    match DateTime::<Utc>::from_timestamp(n, 0) {
        Some(t) => t.format(pattern).to_string(),
        None => n.to_string(),
    }
}

