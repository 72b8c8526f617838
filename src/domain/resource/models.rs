//! Typed resource aggregates and their attribute shapes.

use super::{Attr, DateTime, Group, Media, Range, RichText, Value};

/// Contract for any typed aggregate the engine can walk.
///
/// `shape` lists the exposed attributes in declaration order; the walkers
/// never look at the Rust struct itself.
pub trait Shape {
    /// Resource name; prefix of every table the aggregate projects into.
    const NAME: &'static str;

    fn shape(&self) -> Group;
}

fn opt_text(v: &Option<String>) -> Value {
    Value::String(v.clone())
}

fn seq<T, F: Fn(&T) -> Value>(items: &[T], f: F) -> Value {
    Value::Sequence(items.iter().map(f).collect())
}

/// A talent profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub available: bool,
    pub visibility: String,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub discord: Option<String>,
    pub duration: Range,
    pub tag: Vec<String>,
    pub compensation: Vec<String>,
    pub medium: Vec<String>,
    pub language: Vec<String>,
    pub project: Vec<Project>,
    pub advertised: Vec<Advertised>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Project {
    pub name: String,
    pub link: Option<String>,
    pub team_name: Option<String>,
    pub team_link: Option<String>,
    pub start: i64,
    pub finish: i64,
    pub role: Vec<Role>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Role {
    pub name: String,
    pub comment: Option<String>,
    pub skill: Vec<String>,
    pub duty: Vec<String>,
}

/// A skill offered for hire with its portfolio examples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advertised {
    pub skill: String,
    pub example: Vec<Media>,
}

impl Shape for Profile {
    const NAME: &'static str = "profile";

    fn shape(&self) -> Group {
        Group::new(Self::NAME)
            .with(Attr::new("available", Value::Bool(Some(self.available))))
            .with(Attr::new("visibility", Value::text(self.visibility.clone())))
            .with(Attr::new("name", opt_text(&self.name)))
            .with(Attr::new("summary", opt_text(&self.summary)))
            .with(Attr::new("website", opt_text(&self.website)))
            .with(Attr::new("email", opt_text(&self.email)))
            .with(Attr::new("discord", opt_text(&self.discord)))
            .with(Attr::new("duration", Value::Range(self.duration.clone())))
            .with(Attr::new("tag", Value::strings(self.tag.iter().cloned())))
            .with(Attr::new("compensation", Value::strings(self.compensation.iter().cloned())))
            .with(Attr::new("medium", Value::strings(self.medium.iter().cloned())))
            .with(Attr::new("language", Value::strings(self.language.iter().cloned())))
            .with(Attr::new("project", seq(&self.project, |p| Value::Group(p.shape()))))
            .with(Attr::new("advertised", seq(&self.advertised, |a| Value::Group(a.shape()))))
    }
}

impl Project {
    pub fn shape(&self) -> Group {
        Group::new("project")
            .with(Attr::new("name", Value::text(self.name.clone())))
            .with(Attr::new("link", opt_text(&self.link)))
            .with(Attr::new("teamname", opt_text(&self.team_name)))
            .with(Attr::new("teamlink", opt_text(&self.team_link)))
            .with(Attr::new("start", Value::Int(Some(self.start))))
            .with(Attr::new("finish", Value::Int(Some(self.finish))))
            .with(Attr::new("role", seq(&self.role, |r| Value::Group(r.shape()))))
    }
}

impl Role {
    pub fn shape(&self) -> Group {
        Group::new("role")
            .with(Attr::new("name", Value::text(self.name.clone())))
            .with(Attr::new("comment", opt_text(&self.comment)))
            .with(Attr::new("skill", Value::strings(self.skill.iter().cloned())))
            .with(Attr::new("duty", Value::strings(self.duty.iter().cloned())))
    }
}

impl Advertised {
    pub fn shape(&self) -> Group {
        Group::new("advertised")
            .with(Attr::new("skill", Value::text(self.skill.clone())))
            .with(Attr::new(
                "example",
                seq(&self.example, |m| Value::Media(Box::new(m.clone()))),
            ))
    }
}

/// A calendar event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub visibility: String,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub body: RichText,
    pub timezone: String,
    pub start: DateTime,
    pub finish: DateTime,
    pub weekly: Option<bool>,
    pub category: Vec<String>,
    pub setting: Vec<String>,
    pub tag: Vec<String>,
}

impl Shape for Event {
    const NAME: &'static str = "event";

    fn shape(&self) -> Group {
        Group::new(Self::NAME)
            .with(Attr::new("visibility", Value::text(self.visibility.clone())))
            .with(Attr::new("name", opt_text(&self.name)))
            .with(Attr::new("summary", opt_text(&self.summary)))
            .with(Attr::new("body", Value::RichText(self.body.clone())))
            .with(Attr::new("timezone", Value::text(self.timezone.clone())))
            .with(Attr::new("start", Value::DateTime(self.start)))
            .with(Attr::new("finish", Value::DateTime(self.finish)))
            .with(Attr::new("weekly", Value::Bool(self.weekly)))
            .with(Attr::new("category", Value::strings(self.category.iter().cloned())))
            .with(Attr::new("setting", Value::strings(self.setting.iter().cloned())))
            .with(Attr::new("tag", Value::strings(self.tag.iter().cloned())))
    }
}

/// A forum or library post; the first post of a thread or a reply to one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    pub pinned: Option<bool>,
    pub locked: Option<bool>,
    pub visibility: String,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub body: RichText,
    pub category: Vec<String>,
    pub tag: Vec<String>,
}

impl Shape for Post {
    const NAME: &'static str = "post";

    fn shape(&self) -> Group {
        Group::new(Self::NAME)
            .with(Attr::new("pinned", Value::Bool(self.pinned)))
            .with(Attr::new("locked", Value::Bool(self.locked)))
            .with(Attr::new("visibility", Value::text(self.visibility.clone())))
            .with(Attr::new("name", opt_text(&self.name)).ignore_reply())
            .with(Attr::new("summary", opt_text(&self.summary)).ignore_reply())
            .with(Attr::new("body", Value::RichText(self.body.clone())))
            .with(Attr::new("category", Value::strings(self.category.iter().cloned())).ignore_reply())
            .with(Attr::new("tag", Value::strings(self.tag.iter().cloned())).ignore_reply())
    }
}
