//! Writes a persisted resource back into an editor field tree.
//!
//! The walk mirrors the validator's: attributes are visited in declaration
//! order and addressed by their lower-cased names. Outside a repeatable
//! group the path is matched anywhere in the editor (`*.` prefix); inside
//! one it is anchored at the instance being filled.

use tracing::debug;

use crate::domain::resource::{Attr, DateTime, Group, Resource, Value};
use crate::domain::schema::{Fields, WidgetKind};
use crate::error::{EngineError, SchemaError};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Fills `editor` (a clone of the mode's editor schema) with the values of
/// `resource`. Stored file names are shown as URLs under `prefix`.
pub fn populate(resource: &Resource, editor: &mut Fields, prefix: &str) -> Result<(), EngineError> {
    let mut p = Populator { editor, prefix };
    p.group(&Frame::default(), &resource.root())?;
    debug!(resource = %resource.name, slug = %resource.slug, "editor populated");
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Frame {
    path: Vec<String>,
    /// Inside an element of a repeatable group.
    named: bool,
}

impl Frame {
    fn current(&self) -> String {
        let path = self.path.join(".").to_lowercase();
        if self.named {
            path
        } else {
            format!("*.{path}")
        }
    }

    fn push(&self, segment: &str) -> Frame {
        let mut next = self.clone();
        next.path.push(segment.to_lowercase());
        next
    }
}

struct Populator<'e> {
    editor: &'e mut Fields,
    prefix: &'e str,
}

impl Populator<'_> {
    fn group(&mut self, frame: &Frame, g: &Group) -> Result<(), EngineError> {
        for attr in &g.attrs {
            if attr.markers.ignore_editor {
                continue;
            }
            let name = self.attr_name(frame, g, attr)?;

            if let Some(tag) = &attr.markers.editor_remove {
                self.editor.remove_field(&format!("{}.{}", frame.current(), tag))?;
            }
            if let Some(tag) = &attr.markers.editor_wrap {
                self.editor.wrap_field(&format!("{}.{}", frame.current(), name), tag)?;
            }

            match &attr.value {
                Value::Group(inner) if inner.embedded => self.group(frame, inner)?,
                value => self.value(&frame.push(&name), value)?,
            }
        }
        Ok(())
    }

    /// The editor name of `attr`: its own, or the string value of the
    /// sibling it refers to.
    fn attr_name(&self, frame: &Frame, g: &Group, attr: &Attr) -> Result<String, EngineError> {
        let Some(sibling) = &attr.markers.editor_ref else {
            return Ok(attr.name.clone());
        };
        let path = frame.push(sibling).current();
        match g.attr(sibling).map(|a| &a.value) {
            Some(Value::String(Some(s))) => Ok(s.clone()),
            Some(other) => Err(EngineError::mismatch(path, "string", other.kind_name())),
            None => Err(SchemaError::NoSuchField(path).into()),
        }
    }

    fn value(&mut self, frame: &Frame, value: &Value) -> Result<(), EngineError> {
        let path = frame.current();
        match value {
            Value::Group(g) => self.group(frame, g),
            Value::Media(m) => self.group(frame, &m.shape()),
            Value::Sequence(items) => self.sequence(frame, items),
            Value::String(s) => Ok(self.editor.set_with_string(&path, s.as_deref().unwrap_or_default())?),
            Value::Int(n) => Ok(self.editor.set_with_int(&path, n.unwrap_or_default())?),
            Value::Float(n) => Ok(self.editor.set_with_float(&path, n.unwrap_or_default())?),
            Value::Bool(b) => Ok(self.editor.set_with_bool(&path, b.unwrap_or_default())?),
            Value::Range(r) => Ok(self.editor.set_with_string(&path, &r.display())?),
            Value::File(f) => Ok(self.editor.set_with_string(&path, &f.name.url(self.prefix))?),
            Value::RichText(rt) => {
                self.editor.field_mut(&path)?.rich_text = Some(rt.clone());
                Ok(())
            }
            Value::DateTime(dt) => self.date_time(frame, dt),
        }
    }

    fn sequence(&mut self, frame: &Frame, items: &[Value]) -> Result<(), EngineError> {
        let Some(first) = items.first() else {
            return Ok(());
        };
        if let Value::String(_) = first {
            let mut strings = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => strings.push(s.clone().unwrap_or_default()),
                    other => return Err(EngineError::mismatch(frame.current(), "string", other.kind_name())),
                }
            }
            self.editor.set_with_slice(&frame.current(), &strings)?;
            return Ok(());
        }

        let named = Frame {
            named: true,
            ..frame.clone()
        };
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::Group(_) | Value::Media(_) => {
                    self.editor.add_field_instance(&named.current())?;
                    self.value(&named.push(&i.to_string()), item)?;
                }
                other => return Err(EngineError::mismatch(named.current(), "group", other.kind_name())),
            }
        }
        Ok(())
    }

    /// Date-times are edited through a date and a time child, both in the
    /// submitter's local time.
    fn date_time(&mut self, frame: &Frame, dt: &DateTime) -> Result<(), EngineError> {
        let path = frame.current();
        let (date, time) = {
            let f = self.editor.field(&path)?;
            let invalid = |reason: &str| SchemaError::Invariant {
                path: path.clone(),
                reason: reason.to_string(),
            };
            match f.fields.as_slice() {
                [d, t] if d.kind == WidgetKind::Date && t.kind == WidgetKind::Time => (d.name.clone(), t.name.clone()),
                [_, _] => return Err(invalid("date-time children must be a date then a time").into()),
                _ => return Err(invalid("date-time must have exactly two children").into()),
            }
        };
        if dt.null {
            return Ok(());
        }

        let n = dt.local();
        self.editor.set_with_int(&frame.push(&date).current(), n)?;
        self.editor.set_with_int(&frame.push(&time).current(), n.rem_euclid(SECONDS_PER_DAY))?;
        self.editor.set_with_int(&path, n)?;
        Ok(())
    }
}
