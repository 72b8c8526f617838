use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Zero-width space: a paragraph holding only this is intentionally empty.
pub const ZERO_WIDTH_SPACE: char = '\u{200b}';

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    pub format: Vec<String>,
    pub link: Option<String>,
    pub text: String,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            format: Vec::new(),
            link: None,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paragraph {
    pub kind: String,
    pub spans: Vec<Span>,
}

impl Paragraph {
    pub fn new(kind: impl Into<String>, spans: Vec<Span>) -> Self {
        Self {
            kind: kind.into(),
            spans,
        }
    }

    /// A single span made of one zero-width space.
    pub fn is_intentionally_empty(&self) -> bool {
        match self.spans.as_slice() {
            [only] => {
                let mut chars = only.text.chars();
                chars.next() == Some(ZERO_WIDTH_SPACE) && chars.next().is_none()
            }
            _ => false,
        }
    }
}

/// Ordered paragraphs of formatted spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RichText(pub Vec<Paragraph>);

impl RichText {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.0
    }

    /// Word count over the paragraphs joined by newlines.
    pub fn words(&self) -> i64 {
        let joined = self
            .0
            .iter()
            .map(|p| p.spans.iter().map(|s| s.text.as_str()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n");
        WHITESPACE.split(&joined).count() as i64
    }
}
