use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key for messages that belong to no particular field.
pub const GENERAL: &str = "general";

/// User-facing validation messages keyed by schema path.
///
/// Non-empty feedback means "do not persist"; it is an outcome, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Feedback(BTreeMap<String, Vec<String>>);

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `msg` under `key`, capitalised and ending in a full stop.
    pub fn add(&mut self, key: impl Into<String>, msg: impl AsRef<str>) {
        self.0.entry(key.into()).or_default().push(sentence(msg.as_ref()));
    }

    pub fn general(msg: impl AsRef<str>) -> Self {
        let mut fb = Feedback::new();
        fb.add(GENERAL, msg);
        fb
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn merge(&mut self, other: Feedback) {
        for (k, msgs) in other.0 {
            self.0.entry(k).or_default().extend(msgs);
        }
    }
}

fn sentence(msg: &str) -> String {
    let mut chars = msg.chars();
    let mut out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => return String::new(),
    };
    if !out.ends_with('.') {
        out.push('.');
    }
    out
}
