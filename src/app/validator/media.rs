//! File and media attributes: stored names are checked and retained, uploads
//! go through the image pipeline and are written under the storage root.

use chrono::{Datelike, Utc};
use tracing::{debug, error};

use crate::domain::resource::{File, FileFormat, FileName, Media};
use crate::domain::{SqlValue, TableTree};
use crate::error::{EngineError, StorageError};
use crate::storage::files;
use crate::storage::image::{self, Prepared, Stamp};

use super::{Frame, Step, Walk};

impl<'a> Walk<'a> {
    /// Opens the media node, resolves its file (or rich text) and walks the
    /// descriptive attributes into it. A Media carrying rich text never
    /// stores a file name.
    pub(super) fn media(&mut self, frame: &Frame<'a>, m: &Media) -> Step<TableTree> {
        let mut m = m.clone();
        let mut node = TableTree::new(self.table_name(&frame.path));

        if !m.rich_text.is_empty() {
            if m.has_file() && !frame.ignore_validation {
                let src = &frame.src;
                return Err(frame.reject(format!("Media field {src:?} contains both rich text and a file.")));
            }
        } else if !frame.ignore_validation {
            let f = frame.field()?;
            if !m.file.name.is_empty() {
                let (format, aspect) = self.stored(frame, &m.file.name, "Malformed media file name")?;
                m.kind = format.kind().to_string();
                m.format = format.ext().to_string();
                m.aspect = aspect;
                node.safe_add("filename", m.file.name.as_str());
            } else if let Some(data) = m.file.data.take() {
                let stamp = self.stamp(&m);
                let (prepared, name) = self.upload(frame, &data, Some(&stamp), true)?;
                m.kind = prepared.format.kind().to_string();
                m.format = prepared.format.ext().to_string();
                m.aspect = prepared.aspect;
                m.artist = self.resource.owner.handle.clone();
                m.file.name = name;
                node.safe_add("filename", m.file.name.as_str());
            } else if !f.optional {
                let src = &frame.src;
                return Err(frame.reject(format!("Non optional Media field {src:?} contains no media.")));
            }
        } else if !m.file.name.is_empty() {
            node.safe_add("filename", m.file.name.as_str());
        }

        self.attrs(frame, &m.shape().attrs, &mut node)?;
        Ok(node)
    }

    /// A plain file field, stored as a single column holding the file name.
    pub(super) fn file(&mut self, frame: &Frame<'a>, file: &File, tbl: &mut TableTree) -> Step<()> {
        if frame.ignore_validation {
            let name = (!file.name.is_empty()).then(|| file.name.to_string());
            self.column(frame, tbl, name);
            return Ok(());
        }

        let f = frame.field()?;
        match &file.data {
            None if file.name.is_empty() => {
                if !f.optional {
                    let src = &frame.src;
                    return Err(frame.reject(format!("Non-optional field {src:?} is empty.")));
                }
                self.column(frame, tbl, SqlValue::Null);
            }
            None => {
                self.stored_plain(frame, &file.name)?;
                self.column(frame, tbl, file.name.as_str());
            }
            Some(data) => {
                let (_, name) = self.upload(frame, data, None, false)?;
                self.column(frame, tbl, name.as_str());
            }
        }
        Ok(())
    }

    fn stamp(&self, m: &Media) -> Stamp {
        let handle = &self.resource.owner.handle;
        Stamp {
            title: format!("{} by {} on {}", m.title, handle, self.config().site_name),
            author: m.info.clone(),
            copyright: format!("{} {}", handle, Utc::now().year()),
        }
    }

    /// Sniffs, checks and prepares an upload, then writes it and its
    /// thumbnail. Returns the prepared payload and the stored name.
    fn upload(
        &mut self,
        frame: &Frame<'a>,
        data: &[u8],
        stamp: Option<&Stamp>,
        media: bool,
    ) -> Step<(Prepared, FileName)> {
        let f = frame.field()?;
        let src = &frame.src;
        let cfg = &self.config().media;

        let format = image::sniff(data, &cfg.formats)
            .ok_or_else(|| frame.reject(format!("Field {src:?} contains unknown or malformed file format.")))?;
        let kind = format.kind();

        if (media || !f.values.is_empty()) && !f.values.iter().any(|v| v.name == kind || v.text == kind) {
            return Err(frame.reject(format!("Field {src:?} contains disallowed file kind {kind:?}.")));
        }

        let max = if media {
            f.child(kind).map(|c| c.max).unwrap_or(f.max)
        } else {
            f.max
        };
        let size = data.len() as i64 / 1024;
        if max > 0 && data.len() as i64 > max * 1024 {
            return Err(frame.reject(format!(
                "Field {src:?} disallows files larger than {max}KiB for kind {kind:?}, got {size}KiB."
            )));
        }

        let prepared = match stamp {
            Some(s) => image::prepare(data, format, s, cfg),
            None => image::prepare_plain(data, format, cfg),
        }
        .map_err(|e| {
            debug!(request_id = %self.ctx.request_id, src = %src, error = %e, "upload rejected");
            frame.reject(format!("Field {src:?} contains unknown or malformed file format."))
        })?;

        let name = self.write_pair(&prepared)?;
        Ok((prepared, name))
    }

    /// Writes the full image and its thumbnail under a fresh name, retrying
    /// with another name when either already exists.
    fn write_pair(&mut self, p: &Prepared) -> Step<FileName> {
        let root = self.config().storage_root.clone();
        let slug_len = self.config().slug_len;
        let slugs = self.validator.slugs.clone();

        let outcome = self.validator.disk.run(
            |attempt| -> Result<_, StorageError> {
                let name = FileName::new(format!("{}.{}", slugs.slug(slug_len), p.format.ext()));
                let full = files::resolve(&root, name.as_str())?;
                let thumb = files::resolve(&root, name.thumb().as_str())?;
                files::create_if_absent(&full, &p.full)?;
                if let Err(e) = files::create_if_absent(&thumb, &p.thumb) {
                    if let Err(left) = files::remove_written(&[full.to_string_lossy().into_owned()]) {
                        error!(file = %name, remaining = ?left, "unable to remove half-written file");
                    }
                    return Err(e);
                }
                debug!(attempt, file = %name, "upload stored");
                Ok((name, full, thumb))
            },
            StorageError::is_retryable,
        );

        match outcome {
            Ok(done) => {
                let (name, full, thumb) = done.value;
                self.record_written([
                    full.to_string_lossy().into_owned(),
                    thumb.to_string_lossy().into_owned(),
                ]);
                Ok(name)
            }
            Err(e) => {
                error!(
                    request_id = %self.ctx.request_id,
                    persona = self.resource.owner.id,
                    format = %p.format,
                    attempts = e.attempts(),
                    error = %e,
                    "unable to save upload"
                );
                Err(EngineError::DiskWrite {
                    format: p.format.ext().to_uppercase(),
                    source: e,
                }
                .into())
            }
        }
    }

    /// The format of a well-formed stored name: an alphanumeric stem and an
    /// allowed extension.
    fn stored_format(&self, name: &FileName) -> Option<FileFormat> {
        let (stem, ext) = name.as_str().split_once('.')?;
        if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        self.config().media.formats.iter().copied().find(|f| f.ext() == ext)
    }

    /// A stored media file the submission keeps. Returns its format and the
    /// recomputed aspect ratio.
    fn stored(&mut self, frame: &Frame<'a>, name: &FileName, malformed: &str) -> Step<(FileFormat, f64)> {
        let src = &frame.src;
        let format = self
            .stored_format(name)
            .ok_or_else(|| frame.reject(format!("{malformed} at {src:?}.")))?;
        let root = self.config().storage_root.clone();
        if !files::exists(&root, name.as_str())? {
            return Err(frame.reject(format!("File {name} at {src:?} does not exist.")));
        }
        let img = image::decode(&files::read(&root, name.as_str())?, format)?;
        self.record_retained(name.as_str());
        Ok((format, image::aspect(&img)))
    }

    fn stored_plain(&mut self, frame: &Frame<'a>, name: &FileName) -> Step<()> {
        let src = &frame.src;
        if self.stored_format(name).is_none() {
            return Err(frame.reject(format!("Malformed file name at {src:?}.")));
        }
        if !files::exists(&self.config().storage_root, name.as_str())? {
            return Err(frame.reject(format!("File {name} at {src:?} does not exist.")));
        }
        self.record_retained(name.as_str());
        Ok(())
    }
}
