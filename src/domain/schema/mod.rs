//! Field schema: the declarative description of every form field a resource
//! may carry, its widget kind, constraints and allowed values.
//!
//! A schema is loaded once per mode and then shared read-only. The editor
//! copy handed to the populator is a clone, so the `edit` operations never
//! touch the shared instance.

use serde::{Deserialize, Serialize};

use crate::domain::resource::RichText;
use crate::error::SchemaError;

pub mod edit;
pub mod registry;

pub use registry::{Mapping, ModeSchema, SchemaRegistry};

/// Widget kinds understood by the validator and the populator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Text,
    Textarea,
    Number,
    Date,
    Time,
    Calendar,
    Checkbox,
    Radio,
    Dropdown,
    Tagger,
    File,
    Richtext,
    Range,
    #[default]
    Group,
    Hidden,
}

impl WidgetKind {
    /// Widgets whose `min`/`max` count elements rather than runes.
    pub fn counts_elements(self) -> bool {
        matches!(self, WidgetKind::Tagger | WidgetKind::Checkbox)
    }
}

/// One allowed value of a choice-constrained field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldValue {
    /// What is stored in the database.
    pub name: String,
    pub text: String,
    pub data: String,
    pub icon: String,
    pub default: bool,
    /// Truth value represented by this option of a bool widget.
    #[serde(rename = "true")]
    pub truth: bool,
    pub values: Vec<FieldValue>,
}

/// A node of the field schema. A field with children is a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Field {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WidgetKind,

    /// Runes for text widgets, elements for taggers and checkboxes,
    /// magnitude for numbers, kilobytes for files.
    pub min: i64,
    pub max: i64,

    /// Maximum and minimum number of instances of a repeatable field.
    pub add: usize,
    pub add_min: usize,

    pub optional: bool,
    /// Admin-only fields are implicitly optional.
    pub admin_only: bool,

    /// Names of regex validators applied to text input.
    pub validate: Vec<String>,
    pub values: Vec<FieldValue>,
    pub fields: Vec<Field>,
    pub instances: Vec<Field>,

    pub text: String,
    pub default: String,
    pub icon: String,
    /// Names another field which supplies this field's values.
    #[serde(rename = "ref")]
    pub reference: String,
    pub wrap: String,
    pub disabled: bool,
    pub request_only: bool,
    pub rich_text: Option<RichText>,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: WidgetKind) -> Self {
        Field {
            name: name.into(),
            kind,
            ..Field::default()
        }
    }

    pub fn is_group(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Looks up a dotted path relative to this field's children.
    pub fn find(&self, path: &str) -> Result<&Field, SchemaError> {
        let parts = split_path(path);
        let steps = locate(&self.fields, &parts).ok_or_else(|| SchemaError::NoSuchField(path.to_string()))?;
        Ok(resolve(&self.fields, &steps))
    }

    /// Direct child by name.
    pub fn child(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn value_by_name(&self, name: &str) -> Result<&FieldValue, SchemaError> {
        self.values
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| SchemaError::NoSuchValue {
                field: self.name.clone(),
                value: name.to_string(),
            })
    }

    pub fn value_by_text(&self, text: &str) -> Option<&FieldValue> {
        self.values.iter().find(|v| v.text == text)
    }

    pub fn value_names(&self) -> Vec<&str> {
        self.values.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn value_texts(&self) -> Vec<&str> {
        self.values.iter().map(|v| v.text.as_str()).collect()
    }

    pub fn value_data(&self) -> Vec<&str> {
        self.values.iter().map(|v| v.data.as_str()).collect()
    }

    /// Membership is decided by value name.
    pub fn in_values(&self, name: &str) -> bool {
        self.values.iter().any(|v| v.name == name)
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v.name == name)
    }

    /// Whether submitted strings must be drawn from `values`.
    pub fn constrains_values(&self) -> bool {
        match self.kind {
            WidgetKind::Range | WidgetKind::Checkbox | WidgetKind::Radio => true,
            WidgetKind::Dropdown => !self.values.is_empty(),
            _ => false,
        }
    }

    fn check(&self, path: &str) -> Result<(), SchemaError> {
        let path = if path.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", path, self.name)
        };
        if self.add > 0 && self.add_min > self.add {
            return Err(SchemaError::Invariant {
                path,
                reason: format!("add_min {} exceeds add {}", self.add_min, self.add),
            });
        }
        if self.max > 0 && self.min > self.max {
            return Err(SchemaError::Invariant {
                path,
                reason: format!("min {} exceeds max {}", self.min, self.max),
            });
        }
        for f in &self.fields {
            f.check(&path)?;
        }
        Ok(())
    }
}

/// Ordered top-level fields of one form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(pub Vec<Field>);

impl Fields {
    pub fn new(fields: Vec<Field>) -> Self {
        Fields(fields)
    }

    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        let fields: Fields = serde_json::from_str(raw)?;
        fields.check()?;
        Ok(fields)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.0.iter()
    }

    /// Dotted, case-insensitive lookup.
    ///
    /// A segment matches a field by name, by `*`, or by numeric position. A
    /// numeric segment following a match descends into that field's
    /// instances, any other segment into its children. Groups that cannot
    /// repeat (`add == 0`) are transparent: their children are searched as
    /// if they were siblings of the group.
    pub fn field(&self, path: &str) -> Result<&Field, SchemaError> {
        let parts = split_path(path);
        let steps = locate(&self.0, &parts).ok_or_else(|| SchemaError::NoSuchField(path.to_string()))?;
        Ok(resolve(&self.0, &steps))
    }

    pub fn field_mut(&mut self, path: &str) -> Result<&mut Field, SchemaError> {
        let parts = split_path(path);
        let steps = locate(&self.0, &parts).ok_or_else(|| SchemaError::NoSuchField(path.to_string()))?;
        Ok(resolve_mut(&mut self.0, &steps))
    }

    /// Lookup by the short id used in compact queries.
    pub fn field_by_id(&self, id: &str) -> Result<&Field, SchemaError> {
        fn walk<'a>(ff: &'a [Field], id: &str) -> Option<&'a Field> {
            for f in ff {
                if f.id == id {
                    return Some(f);
                }
                if let Some(found) = walk(&f.fields, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.0, id).ok_or_else(|| SchemaError::NoSuchId(id.to_string()))
    }

    /// Enforces `add_min <= add` and `min <= max` on every field.
    pub fn check(&self) -> Result<(), SchemaError> {
        for f in &self.0 {
            f.check("")?;
        }
        Ok(())
    }
}

impl From<Vec<Field>> for Fields {
    fn from(fields: Vec<Field>) -> Self {
        Fields(fields)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Child(usize),
    Instance(usize),
}

fn split_path(path: &str) -> Vec<String> {
    path.to_lowercase().split('.').map(str::to_string).collect()
}

fn is_index(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

fn segment_matches(field: &Field, part: &str, position: usize) -> bool {
    if part == "*" || field.name.eq_ignore_ascii_case(part) {
        return true;
    }
    part.parse::<usize>().map(|n| n == position).unwrap_or(false)
}

/// Resolves `parts` against `ff`, returning the route to the match.
/// `ff` is reached by `Step::Child` unless `in_instances` says otherwise.
fn locate(ff: &[Field], parts: &[String]) -> Option<Vec<Step>> {
    locate_in(ff, parts, false)
}

fn locate_in(ff: &[Field], parts: &[String], in_instances: bool) -> Option<Vec<Step>> {
    let (head, rest) = parts.split_first()?;
    let here = |i: usize| if in_instances { Step::Instance(i) } else { Step::Child(i) };

    for (i, f) in ff.iter().enumerate() {
        if !segment_matches(f, head, i) {
            if f.add == 0 {
                if let Some(mut tail) = locate_in(&f.fields, parts, false) {
                    tail.insert(0, here(i));
                    return Some(tail);
                }
            }
            continue;
        }
        if rest.is_empty() {
            return Some(vec![here(i)]);
        }
        let found = if is_index(&rest[0]) {
            locate_in(&f.instances, rest, true)
        } else {
            locate_in(&f.fields, rest, false)
        };
        if let Some(mut tail) = found {
            tail.insert(0, here(i));
            return Some(tail);
        }
    }
    None
}

fn resolve<'a>(ff: &'a [Field], steps: &[Step]) -> &'a Field {
    let mut current = match steps[0] {
        Step::Child(i) | Step::Instance(i) => &ff[i],
    };
    for step in &steps[1..] {
        current = match *step {
            Step::Child(i) => &current.fields[i],
            Step::Instance(i) => &current.instances[i],
        };
    }
    current
}

fn resolve_mut<'a>(ff: &'a mut [Field], steps: &[Step]) -> &'a mut Field {
    let mut current = match steps[0] {
        Step::Child(i) | Step::Instance(i) => &mut ff[i],
    };
    for step in &steps[1..] {
        current = match *step {
            Step::Child(i) => &mut current.fields[i],
            Step::Instance(i) => &mut current.instances[i],
        };
    }
    current
}
