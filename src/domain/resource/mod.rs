//! Resource value model.
//!
//! A resource is an owned tree of [`Value`]s. Aggregates are [`Group`]s of
//! named attributes in declaration order, each carrying the markers that
//! steer validation, persistence and editor population.

use serde::{Deserialize, Serialize};

pub mod media;
pub mod models;
pub mod rich_text;

pub use media::{File, FileFormat, FileName, Media};
pub use models::{Advertised, Event, Post, Profile, Project, Role, Shape};
pub use rich_text::{Paragraph, RichText, Span};

/// Closed set of value kinds the walkers dispatch on.
///
/// Scalars use `None` for an SQL null.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Option<String>),
    Int(Option<i64>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Group(Group),
    Sequence(Vec<Value>),
    File(File),
    Media(Box<Media>),
    RichText(RichText),
    Range(Range),
    DateTime(DateTime),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::String(Some(s.into()))
    }

    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Sequence(items.into_iter().map(Value::text).collect())
    }

    /// Short name of the variant, for mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Group(_) => "group",
            Value::Sequence(_) => "sequence",
            Value::File(_) => "file",
            Value::Media(_) => "media",
            Value::RichText(_) => "rich text",
            Value::Range(_) => "range",
            Value::DateTime(_) => "datetime",
        }
    }
}

/// Out-of-band directives attached to an attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Markers {
    pub ignore_validation: bool,
    pub ignore_db: bool,
    /// Skipped entirely when the resource is a reply.
    pub ignore_reply: bool,
    /// Skipped by the populator.
    pub ignore_editor: bool,
    /// Editor field whose value names the schema child to populate.
    pub editor_ref: Option<String>,
    pub editor_wrap: Option<String>,
    pub editor_remove: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub value: Value,
    pub markers: Markers,
}

impl Attr {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            markers: Markers::default(),
        }
    }

    pub fn ignore_validation(mut self) -> Self {
        self.markers.ignore_validation = true;
        self
    }

    pub fn ignore_db(mut self) -> Self {
        self.markers.ignore_db = true;
        self
    }

    pub fn ignore_reply(mut self) -> Self {
        self.markers.ignore_reply = true;
        self
    }

    pub fn ignore_editor(mut self) -> Self {
        self.markers.ignore_editor = true;
        self
    }

    /// Derived or bookkeeping data: neither validated nor shown in the editor.
    pub fn internal(self) -> Self {
        self.ignore_validation().ignore_editor()
    }

    pub fn editor_ref(mut self, field: impl Into<String>) -> Self {
        self.markers.editor_ref = Some(field.into());
        self
    }

    pub fn editor_wrap(mut self, wrap: impl Into<String>) -> Self {
        self.markers.editor_wrap = Some(wrap.into());
        self
    }

    pub fn editor_remove(mut self, field: impl Into<String>) -> Self {
        self.markers.editor_remove = Some(field.into());
        self
    }
}

/// An aggregate. An embedded group contributes its attributes to the
/// enclosing table and path without opening either.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub name: String,
    pub embedded: bool,
    pub attrs: Vec<Attr>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedded: false,
            attrs: Vec::new(),
        }
    }

    pub fn embedded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedded: true,
            attrs: Vec::new(),
        }
    }

    pub fn with(mut self, attr: Attr) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// Start/end pair drawn from a field's value list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: String,
    pub end: String,
}

impl Range {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Parses the submitted `start-end` form; a lone value is both ends.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('-') {
            Some((start, end)) => Range::new(start, end),
            None => Range::new(raw, raw),
        }
    }

    pub fn display(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

/// Epoch seconds plus the submitter's timezone offset in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTime {
    pub epoch: i64,
    pub tz_offset: i64,
    pub null: bool,
}

impl DateTime {
    pub fn at(epoch: i64) -> Self {
        Self {
            epoch,
            tz_offset: 0,
            null: false,
        }
    }

    pub fn null() -> Self {
        Self {
            epoch: 0,
            tz_offset: 0,
            null: true,
        }
    }

    /// Epoch shifted into the submitter's local time.
    pub fn local(&self) -> i64 {
        self.epoch + self.tz_offset
    }
}

/// The acting persona.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Persona {
    pub id: i64,
    pub slug: String,
    pub handle: String,
    pub admin: bool,
}

/// A submitted or persisted resource together with its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Type name; the root table and the prefix of every child table.
    pub name: String,
    pub slug: String,
    pub created: i64,
    pub updated: i64,
    pub owner: Persona,
    /// Slug of the thread being replied to.
    pub thread: Option<String>,
    pub body: Group,
}

impl Resource {
    pub fn new(name: impl Into<String>, owner: Persona, body: Group) -> Self {
        Self {
            name: name.into(),
            slug: String::new(),
            created: 0,
            updated: 0,
            owner,
            thread: None,
            body,
        }
    }

    pub fn from_shape<S: Shape>(owner: Persona, model: &S) -> Self {
        Resource::new(S::NAME, owner, model.shape())
    }

    pub fn is_reply(&self) -> bool {
        self.thread.is_some()
    }

    /// The body prefixed by the embedded base attributes shared by every
    /// resource.
    pub fn root(&self) -> Group {
        let base = Group::embedded("base")
            .with(Attr::new("slug", Value::text(self.slug.clone())).internal())
            .with(Attr::new("created", Value::Int(Some(self.created))).internal())
            .with(Attr::new("updated", Value::Int(Some(self.updated))).internal());
        let mut root = Group::new(self.name.clone()).with(Attr::new("base", Value::Group(base)));
        root.attrs.extend(self.body.attrs.iter().cloned());
        root
    }
}
