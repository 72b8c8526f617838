//! File and media attachments.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Attr, Group, RichText, Value};

/// Media kind produced for every supported image format.
pub const KIND_IMAGE: &str = "image";

/// Image formats the upload pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Jpeg,
    Png,
}

impl FileFormat {
    pub fn ext(self) -> &'static str {
        match self {
            FileFormat::Jpeg => "jpeg",
            FileFormat::Png => "png",
        }
    }

    pub fn from_ext(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpeg" => Some(FileFormat::Jpeg),
            "png" => Some(FileFormat::Png),
            _ => None,
        }
    }

    pub fn kind(self) -> &'static str {
        KIND_IMAGE
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ext())
    }
}

/// Name of a file stored directly under the storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileName(pub String);

impl FileName {
    pub fn new(name: impl Into<String>) -> Self {
        FileName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Name with `suffix` inserted before the extension.
    pub fn with_suffix(&self, suffix: &str) -> FileName {
        match self.0.rsplit_once('.') {
            Some((stem, ext)) => FileName(format!("{stem}{suffix}.{ext}")),
            None => FileName(format!("{}{}", self.0, suffix)),
        }
    }

    pub fn thumb(&self) -> FileName {
        self.with_suffix("_thumb")
    }

    pub fn format(&self) -> Option<FileFormat> {
        self.0.rsplit_once('.').and_then(|(_, ext)| FileFormat::from_ext(ext))
    }

    pub fn url(&self, prefix: &str) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("{}{}", prefix, self.0)
    }

    pub fn thumb_url(&self, prefix: &str) -> String {
        if self.is_empty() {
            return String::new();
        }
        self.thumb().url(prefix)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored file name, or a freshly uploaded payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    pub name: FileName,
    pub data: Option<Vec<u8>>,
}

impl File {
    pub fn stored(name: impl Into<String>) -> Self {
        Self {
            name: FileName::new(name),
            data: None,
        }
    }

    pub fn upload(data: Vec<u8>) -> Self {
        Self {
            name: FileName::default(),
            data: Some(data),
        }
    }
}

/// A portfolio example: either a file with descriptive metadata, or rich
/// text. Never both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Media {
    pub alt_text: String,
    pub title: String,
    pub project: String,
    pub info: String,

    /// Persona handle, stamped into image metadata. Set by the validator.
    pub artist: String,
    /// Set by the validator from the sniffed or stored file.
    pub kind: String,
    pub format: String,
    /// Width over height.
    pub aspect: f64,

    pub file: File,
    pub rich_text: RichText,
}

impl Media {
    pub fn has_file(&self) -> bool {
        !self.file.name.is_empty() || self.file.data.is_some()
    }

    /// Attribute view walked after the file itself has been handled.
    pub fn shape(&self) -> Group {
        let mut g = Group::new("media")
            .with(Attr::new("alttext", Value::text(self.alt_text.clone())))
            .with(Attr::new("title", Value::text(self.title.clone())))
            .with(Attr::new("project", Value::text(self.project.clone())))
            .with(Attr::new("info", Value::text(self.info.clone())))
            .with(Attr::new("artist", Value::text(self.artist.clone())).internal().ignore_db())
            .with(Attr::new("kind", Value::text(self.kind.clone())).internal())
            .with(Attr::new("format", Value::text(self.format.clone())).internal())
            .with(Attr::new("aspect", Value::Float(Some(self.aspect))).internal());
        if self.rich_text.is_empty() {
            g.attrs.push(
                Attr::new("file", Value::File(self.file.clone()))
                    .ignore_validation()
                    .ignore_db()
                    .editor_ref("kind")
                    .editor_wrap("example")
                    .editor_remove("richtext"),
            );
        } else {
            g.attrs.push(Attr::new("richtext", Value::RichText(self.rich_text.clone())).ignore_editor());
        }
        g
    }
}
