//! The validation walk.
//!
//! A resource is walked attribute by attribute against the editor schema of
//! its mode. The walk produces the [`TableTree`] that the committer persists,
//! or stops at the first user-correctable problem and reports it as
//! [`Feedback`]. Structural mismatches between resource and schema are
//! fatal [`EngineError`]s.
//!
//! Files written to disk while walking are tracked on the tree and removed
//! again whenever the walk does not end in an accepted submission.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, warn};

use crate::domain::resource::{Attr, Group, Persona, Resource, Value};
use crate::domain::schema::{Field, ModeSchema};
use crate::domain::{Feedback, SqlValue, TableTree};
use crate::error::{EngineError, MediaError, SchemaError, StorageError};
use crate::infra::{EngineConfig, RetryPolicy, SlugSource, Tryer};
use crate::storage::files;

mod media;
mod rich_text;
pub mod rules;
mod scalar;

pub use rules::{ResourceRules, TalentRules};

/// Any Unicode control or format character.
pub(crate) static CONTROL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\pC").expect("control regex"));
/// As [`CONTROL`], but allowing newlines.
pub(crate) static CONTROL_SANS_NEWLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\n\PC]").expect("control sans newline regex"));

static DEFAULT_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("isWord", Regex::new(r"^\w+$").expect("isWord regex")),
        ("isEmail", Regex::new(r"^.+@.+\..+$").expect("isEmail regex")),
        ("isDiscord", Regex::new(r"^.+#\d{4}$").expect("isDiscord regex")),
        ("isDomain", Regex::new(r"^.*[a-zA-Z0-9-]+\.[a-zA-Z0-9]+.*$").expect("isDomain regex")),
    ]
});

/// Per-request data the walk needs beyond the resource itself.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}

/// Result of a completed walk.
///
/// When `feedback` is non-empty the tree must not be committed; any files the
/// walk wrote have already been removed and `tree.written` is empty.
#[derive(Debug, Clone)]
pub struct Validation {
    pub request_id: String,
    pub mode: String,
    pub tree: TableTree,
    pub feedback: Feedback,
    pub persona: Persona,
    /// Slug of the thread a reply belongs to.
    pub thread: Option<String>,
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        self.feedback.is_empty()
    }
}

/// Validates resources against their mode's editor schema.
pub struct Validator {
    config: Arc<EngineConfig>,
    slugs: Arc<dyn SlugSource>,
    disk: Tryer,
    patterns: HashMap<String, Regex>,
    rules: HashMap<String, Arc<dyn ResourceRules>>,
}

impl Validator {
    pub fn new(config: Arc<EngineConfig>, slugs: Arc<dyn SlugSource>) -> Self {
        let disk = Tryer::new("disk", config.retry.disk.clone());
        let patterns = DEFAULT_PATTERNS
            .iter()
            .map(|(name, re)| (name.to_string(), re.clone()))
            .collect();
        let mut rules: HashMap<String, Arc<dyn ResourceRules>> = HashMap::new();
        rules.insert("talent".to_string(), Arc::new(TalentRules));
        Self {
            config,
            slugs,
            disk,
            patterns,
            rules,
        }
    }

    /// Registers a named pattern usable from a field's `validate` list.
    pub fn with_pattern(mut self, name: impl Into<String>, re: Regex) -> Self {
        self.patterns.insert(name.into(), re);
        self
    }

    /// Mode-specific checks run after a successful walk.
    pub fn with_rules(mut self, mode: impl Into<String>, rules: Arc<dyn ResourceRules>) -> Self {
        self.rules.insert(mode.into(), rules);
        self
    }

    pub fn with_disk_policy(mut self, policy: RetryPolicy) -> Self {
        self.disk = Tryer::new("disk", policy);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn slugs(&self) -> &Arc<dyn SlugSource> {
        &self.slugs
    }

    pub fn validate(
        &self,
        resource: &Resource,
        schema: &ModeSchema,
        ctx: &RequestContext,
    ) -> Result<Validation, EngineError> {
        let mut walk = Walk {
            validator: self,
            schema,
            ctx,
            resource,
            written: Vec::new(),
            retained: Vec::new(),
        };

        let mut tree = TableTree::new(resource.name.to_lowercase());
        tree.refs = resource.owner.id;
        let outcome = walk.attrs(&Frame::root(), &resource.root().attrs, &mut tree);

        let Walk { written, retained, .. } = walk;
        tree.written = written;
        tree.retained = retained;

        let mut feedback = Feedback::new();
        match outcome {
            Ok(()) => {
                if let Some(rules) = self.rules.get(&schema.mode) {
                    match rules.check(resource, &tree, &schema.editor) {
                        Ok(fb) => feedback = fb,
                        Err(e) => return Err(discard(&mut tree, e)),
                    }
                }
            }
            Err(Fault::Rejected { key, msg }) => feedback.add(key, msg),
            Err(Fault::Fatal(e)) => {
                warn!(request_id = %ctx.request_id, mode = %schema.mode, error = %e, "validation aborted");
                return Err(discard(&mut tree, e));
            }
        }

        if !feedback.is_empty() {
            debug!(request_id = %ctx.request_id, mode = %schema.mode, "submission rejected");
            let left = std::mem::take(&mut tree.written);
            if let Err(remaining) = files::remove_written(&left) {
                error!(request_id = %ctx.request_id, remaining = remaining.len(), "unable to remove new files");
                return Err(EngineError::Cleanup { cause: None, remaining });
            }
        }

        Ok(Validation {
            request_id: ctx.request_id.clone(),
            mode: schema.mode.clone(),
            tree,
            feedback,
            persona: resource.owner.clone(),
            thread: resource.thread.clone(),
        })
    }
}

/// Removes the files `tree` wrote and returns `cause`, extended with any
/// files that could not be removed.
pub(crate) fn discard(tree: &mut TableTree, cause: EngineError) -> EngineError {
    let written = std::mem::take(&mut tree.written);
    match files::remove_written(&written) {
        Ok(()) => cause,
        Err(remaining) => EngineError::Cleanup {
            cause: Some(Box::new(cause)),
            remaining,
        },
    }
}

/// Why a walk stopped early.
pub(crate) enum Fault {
    /// User-correctable; becomes feedback under `key`.
    Rejected { key: String, msg: String },
    Fatal(EngineError),
}

impl From<EngineError> for Fault {
    fn from(e: EngineError) -> Self {
        Fault::Fatal(e)
    }
}

impl From<SchemaError> for Fault {
    fn from(e: SchemaError) -> Self {
        Fault::Fatal(e.into())
    }
}

impl From<StorageError> for Fault {
    fn from(e: StorageError) -> Self {
        Fault::Fatal(e.into())
    }
}

impl From<MediaError> for Fault {
    fn from(e: MediaError) -> Self {
        Fault::Fatal(e.into())
    }
}

pub(crate) type Step<T> = Result<T, Fault>;

/// Walk state carried into one attribute. Passed by value so siblings never
/// see each other's flags.
#[derive(Debug, Clone)]
pub(crate) struct Frame<'s> {
    /// Lower-cased attribute names from the root, without indices.
    path: Vec<String>,
    ignore_validation: bool,
    ignore_db: bool,
    /// Set for the elements of a sequence.
    element: bool,
    /// Schema path the walked path maps to.
    src: String,
    field: Option<&'s Field>,
}

impl<'s> Frame<'s> {
    fn root() -> Self {
        Self {
            path: Vec::new(),
            ignore_validation: false,
            ignore_db: false,
            element: false,
            src: String::new(),
            field: None,
        }
    }

    pub(crate) fn walked(&self) -> String {
        self.path.join(".")
    }

    /// Column name for a scalar at this frame.
    pub(crate) fn column(&self) -> String {
        self.path.last().cloned().unwrap_or_default()
    }

    pub(crate) fn field(&self) -> Step<&'s Field> {
        self.field
            .ok_or_else(|| Fault::Fatal(SchemaError::NoSuchField(self.walked()).into()))
    }

    /// Feedback at this frame's schema path.
    pub(crate) fn reject(&self, msg: impl Into<String>) -> Fault {
        Fault::Rejected {
            key: self.src.clone(),
            msg: msg.into(),
        }
    }

    fn as_element(&self) -> Self {
        Self {
            element: true,
            ..self.clone()
        }
    }
}

pub(crate) struct Walk<'a> {
    validator: &'a Validator,
    schema: &'a ModeSchema,
    ctx: &'a RequestContext,
    resource: &'a Resource,
    written: Vec<String>,
    retained: Vec<String>,
}

impl<'a> Walk<'a> {
    /// Table name for a node opened at `path`: resource name followed by the
    /// path segments.
    fn table_name(&self, path: &[String]) -> String {
        let mut parts = vec![self.resource.name.to_lowercase()];
        parts.extend(path.iter().cloned());
        parts.join("_")
    }

    /// Child frame for `attr`, with its schema field resolved.
    fn descend(&self, frame: &Frame<'a>, attr: &Attr) -> Step<Frame<'a>> {
        let embedded = matches!(&attr.value, Value::Group(g) if g.embedded);
        let mut next = Frame {
            path: frame.path.clone(),
            ignore_validation: frame.ignore_validation || attr.markers.ignore_validation,
            ignore_db: frame.ignore_db || attr.markers.ignore_db,
            element: false,
            src: frame.src.clone(),
            field: frame.field,
        };
        if !embedded {
            next.path.push(attr.name.to_lowercase());
        }
        if next.ignore_validation || next.path.is_empty() {
            return Ok(next);
        }

        let walked = next.walked();
        let src = self
            .schema
            .mapping
            .get(&walked)
            .ok_or_else(|| Fault::Fatal(EngineError::Unmapped(walked.clone())))?;
        next.field = Some(self.schema.editor.field(src)?);
        next.src = src.to_string();
        debug!(request_id = %self.ctx.request_id, walked = %walked, src = %next.src, "field mapped");
        Ok(next)
    }

    /// Walks the attributes of a group into `tbl`.
    pub(crate) fn attrs(&mut self, frame: &Frame<'a>, attrs: &[Attr], tbl: &mut TableTree) -> Step<()> {
        for attr in attrs {
            let m = &attr.markers;
            if (frame.ignore_validation || m.ignore_validation) && (frame.ignore_db || m.ignore_db) {
                continue;
            }
            if m.ignore_reply && self.resource.is_reply() {
                continue;
            }
            let next = self.descend(frame, attr)?;
            if !next.ignore_db {
                self.declare(&next, &attr.value, tbl);
            }
            self.value(&next, &attr.value, tbl)?;
        }
        Ok(())
    }

    /// Records the child table an attribute can produce, populated or not.
    fn declare(&self, frame: &Frame<'a>, value: &Value, tbl: &mut TableTree) {
        match value {
            Value::Group(g) if g.embedded => {}
            Value::Group(_) | Value::Media(_) | Value::Sequence(_) => tbl.declare_child(&self.table_name(&frame.path)),
            Value::RichText(_) => tbl.declare_child(&self.span_table()),
            _ => {}
        }
    }

    pub(crate) fn span_table(&self) -> String {
        format!("{}_span", self.resource.name.to_lowercase())
    }

    fn value(&mut self, frame: &Frame<'a>, value: &Value, tbl: &mut TableTree) -> Step<()> {
        match value {
            Value::Group(g) if g.embedded => self.attrs(frame, &g.attrs, tbl),
            Value::Group(g) => {
                let node = self.group(frame, g)?;
                if !frame.ignore_db {
                    tbl.children.push(node);
                }
                Ok(())
            }
            Value::Media(m) => {
                let node = self.media(frame, m)?;
                if !frame.ignore_db {
                    tbl.children.push(node);
                }
                Ok(())
            }
            Value::Sequence(items) => self.sequence(frame, items, tbl),
            Value::String(s) => self.string(frame, s.as_deref(), tbl),
            Value::Int(n) => self.int(frame, *n, tbl),
            Value::DateTime(dt) => self.int(frame, (!dt.null).then_some(dt.epoch), tbl),
            Value::Float(n) => self.float(frame, *n, tbl),
            Value::Bool(b) => self.bool(frame, *b, tbl),
            Value::Range(r) => self.range(frame, r, tbl),
            Value::File(f) => self.file(frame, f, tbl),
            Value::RichText(rt) => self.rich_text(frame, rt, tbl),
        }
    }

    fn group(&mut self, frame: &Frame<'a>, g: &Group) -> Step<TableTree> {
        let mut node = TableTree::new(self.table_name(&frame.path));
        self.attrs(frame, &g.attrs, &mut node)?;
        Ok(node)
    }

    fn sequence(&mut self, frame: &Frame<'a>, items: &[Value], tbl: &mut TableTree) -> Step<()> {
        if !frame.ignore_validation {
            let f = frame.field()?;
            let n = items.len();
            let src = &frame.src;
            if f.add != 0 {
                if n > f.add {
                    return Err(frame.reject(format!(
                        "Field {src:?} exceeds maximum allowed elements. Max {}, got {n}.",
                        f.add
                    )));
                }
                if n < f.add_min {
                    return Err(frame.reject(format!(
                        "Field {src:?} requires a minimum of {} elements, got {n}.",
                        f.add_min
                    )));
                }
            }
            if f.kind.counts_elements() {
                if f.max > 0 && n as i64 > f.max {
                    return Err(frame.reject(format!(
                        "Field {src:?} exceeds maximum allowed elements. Max {}, got {n}.",
                        f.max
                    )));
                }
                if (n as i64) < f.min {
                    return Err(frame.reject(format!(
                        "Field {src:?} requires a minimum of {} elements, got {n}.",
                        f.min
                    )));
                }
            }
            if !f.optional && n == 0 {
                return Err(frame.reject(format!("Non-optional field {src:?} is zero length.")));
            }
        }

        let elem = frame.as_element();
        for item in items {
            match item {
                Value::Group(_) | Value::Media(_) => self.value(&elem, item, tbl)?,
                _ => {
                    let mut row = TableTree::new(self.table_name(&frame.path));
                    self.value(&elem, item, &mut row)?;
                    if !frame.ignore_db {
                        tbl.children.push(row);
                    }
                }
            }
        }
        Ok(())
    }

    /// Appends a column at the frame's position unless persistence is off.
    pub(crate) fn column(&self, frame: &Frame<'a>, tbl: &mut TableTree, value: impl Into<SqlValue>) {
        if !frame.ignore_db {
            tbl.safe_add(frame.column(), value);
        }
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.validator.config
    }

    pub(crate) fn admin(&self) -> bool {
        self.resource.owner.admin
    }

    pub(crate) fn pattern(&self, name: &str) -> Option<&Regex> {
        self.validator.patterns.get(name)
    }

    pub(crate) fn record_written(&mut self, paths: impl IntoIterator<Item = String>) {
        self.written.extend(paths);
    }

    pub(crate) fn record_retained(&mut self, name: impl Into<String>) {
        self.retained.push(name.into());
    }
}
