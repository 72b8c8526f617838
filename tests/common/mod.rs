//! Shared fixtures: an in-memory datastore that understands the statements
//! the engine issues, deterministic slugs, generated images and schemas.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use once_cell::sync::Lazy;
use regex::Regex;

use resource_projection::domain::schema::FieldValue;
use resource_projection::infra::RetryPolicy;
use resource_projection::storage::Row;
use resource_projection::{
    Datastore, EngineConfig, Field, Fields, Mapping, ModeSchema, Persona, SlugSource, SqlValue, StoreError, TxHandle,
    WidgetKind,
};

// ---------------------------------------------------------------------------
// In-memory datastore
// ---------------------------------------------------------------------------

pub type Rec = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, Default)]
pub struct Db {
    pub tables: BTreeMap<String, Vec<Rec>>,
    next_id: i64,
}

impl Db {
    fn insert(&mut self, table: &str, mut rec: Rec) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        rec.insert("id".into(), SqlValue::Int(id));
        self.tables.entry(table.to_string()).or_default().push(rec);
        id
    }

    fn rows(&self, table: &str) -> &[Rec] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Datastore keeping every table in memory. A transaction works on a copy
/// and publishes it on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<Db>>,
    log: Arc<Mutex<Vec<String>>>,
    conflicts: Arc<AtomicUsize>,
    begins: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_persona(&self, id: i64, admin: bool) {
        let mut db = self.state.lock().unwrap();
        let rec: Rec = [
            ("id".to_string(), SqlValue::Int(id)),
            ("slug".to_string(), SqlValue::Text(format!("persona{id}"))),
            ("admin".to_string(), SqlValue::Bool(admin)),
        ]
        .into_iter()
        .collect();
        db.tables.entry("personas".into()).or_default().push(rec);
        db.next_id = db.next_id.max(id);
    }

    /// Seeds a row and returns its id.
    pub fn seed(&self, table: &str, columns: &[(&str, SqlValue)]) -> i64 {
        let rec = columns.iter().map(|(c, v)| (c.to_string(), v.clone())).collect();
        self.state.lock().unwrap().insert(table, rec)
    }

    pub fn set(&self, table: &str, id: i64, column: &str, value: SqlValue) {
        let mut db = self.state.lock().unwrap();
        let rows = db.tables.get_mut(table).expect("seeded table");
        let row = rows
            .iter_mut()
            .find(|r| r.get("id") == Some(&SqlValue::Int(id)))
            .expect("seeded row");
        row.insert(column.to_string(), value);
    }

    /// The next `n` commits fail with a serialization conflict.
    pub fn fail_commits(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: &str) -> Vec<Rec> {
        self.state.lock().unwrap().rows(table).to_vec()
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Statements that would change data.
    pub fn writes(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with("INSERT") || s.starts_with("UPDATE") || s.starts_with("DELETE"))
            .collect()
    }

    pub fn snapshot(&self) -> Db {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn TxHandle>, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let db = self.state.lock().unwrap().clone();
        Ok(Box::new(MemoryTx {
            db,
            store: self.clone(),
        }))
    }
}

pub struct MemoryTx {
    db: Db,
    store: MemoryStore,
}

static INSERT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^INSERT INTO (\w+) \(([^)]*)\) VALUES \(([^)]*)\)( RETURNING id)?$").unwrap());
static UPDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^UPDATE (\w+) SET (.+) WHERE (\w+) = \$(\d+)( RETURNING id)?$").unwrap());
static SELECT_WHERE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^SELECT ([\w, ]+) FROM (\w+) WHERE (\w+) = \$(\d+)$").unwrap());
static DELETE_WHERE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^DELETE FROM (\w+) WHERE (\w+) = \$(\d+)$").unwrap());
static FILE_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^SELECT file FROM file WHERE (\w+) = \$1((?: AND file <> \$\d+)*)$").unwrap());
static FILE_DELETE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DELETE FROM file WHERE (\w+) = \$1 AND \((.+)\)$").unwrap());
static OWNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SELECT EXISTS \(SELECT 1 FROM personas, (\w+) WHERE \(\w+\.slug = \$1 AND \w+\.ref_id = \$2\) OR \(personas\.id = \$2 AND personas\.admin = true\)\)$").unwrap()
});
static REPLIES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SELECT idx, thread FROM (\w+) WHERE thread = \(SELECT id FROM \w+ WHERE slug = \$1\) ORDER BY idx DESC$")
        .unwrap()
});
static LOCKED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SELECT EXISTS \(SELECT 1 FROM (\w+) WHERE id = \(SELECT thread FROM \w+ WHERE slug = \$1\) AND locked = true\)$")
        .unwrap()
});
static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d+)").unwrap());

fn token(tok: &str, params: &[SqlValue]) -> SqlValue {
    let tok = tok.trim();
    if tok == "NULL" {
        return SqlValue::Null;
    }
    let n: usize = tok.trim_start_matches('$').parse().unwrap_or_else(|_| panic!("bad placeholder {tok:?}"));
    params[n - 1].clone()
}

fn param(n: &str, params: &[SqlValue]) -> SqlValue {
    params[n.parse::<usize>().unwrap() - 1].clone()
}

fn field(rec: &Rec, col: &str) -> SqlValue {
    rec.get(col).cloned().unwrap_or(SqlValue::Null)
}

impl MemoryTx {
    /// Executes one statement, returning its rows and the affected count.
    fn run(&mut self, sql: &str, params: &[SqlValue]) -> (Vec<Row>, u64) {
        self.store.log.lock().unwrap().push(sql.to_string());

        if let Some(c) = FILE_SELECT.captures(sql) {
            let owner = c[1].to_string();
            let keep: Vec<SqlValue> = PARAM.captures_iter(&c[2]).map(|p| param(&p[1], params)).collect();
            let rows: Vec<Row> = self
                .db
                .rows("file")
                .iter()
                .filter(|r| field(r, &owner) == params[0] && !keep.contains(&field(r, "file")))
                .map(|r| vec![field(r, "file")])
                .collect();
            let n = rows.len() as u64;
            return (rows, n);
        }
        if let Some(c) = FILE_DELETE.captures(sql) {
            let owner = c[1].to_string();
            let names: Vec<SqlValue> = PARAM.captures_iter(&c[2]).map(|p| param(&p[1], params)).collect();
            let rows = self.db.tables.entry("file".into()).or_default();
            let before = rows.len();
            rows.retain(|r| !(field(r, &owner) == params[0] && names.contains(&field(r, "file"))));
            return (Vec::new(), (before - rows.len()) as u64);
        }
        if let Some(c) = OWNS.captures(sql) {
            let table = &c[1];
            let owns = self
                .db
                .rows(table)
                .iter()
                .any(|r| field(r, "slug") == params[0] && field(r, "ref_id") == params[1]);
            let admin = self
                .db
                .rows("personas")
                .iter()
                .any(|r| field(r, "id") == params[1] && field(r, "admin") == SqlValue::Bool(true));
            return (vec![vec![SqlValue::Bool(owns || admin)]], 1);
        }
        if let Some(c) = REPLIES.captures(sql) {
            let table = &c[1];
            let thread = self
                .db
                .rows(table)
                .iter()
                .find(|r| field(r, "slug") == params[0])
                .map(|r| field(r, "id"));
            let mut rows: Vec<Row> = match thread {
                Some(id) => self
                    .db
                    .rows(table)
                    .iter()
                    .filter(|r| field(r, "thread") == id)
                    .map(|r| vec![field(r, "idx"), field(r, "thread")])
                    .collect(),
                None => Vec::new(),
            };
            rows.sort_by_key(|r| std::cmp::Reverse(r[0].as_i64().unwrap_or(0)));
            let n = rows.len() as u64;
            return (rows, n);
        }
        if let Some(c) = LOCKED.captures(sql) {
            let table = &c[1];
            let thread = self
                .db
                .rows(table)
                .iter()
                .find(|r| field(r, "slug") == params[0])
                .map(|r| field(r, "thread"));
            let locked = self
                .db
                .rows(table)
                .iter()
                .any(|r| Some(field(r, "id")) == thread && field(r, "locked") == SqlValue::Bool(true));
            return (vec![vec![SqlValue::Bool(locked)]], 1);
        }
        if let Some(c) = INSERT.captures(sql) {
            let table = c[1].to_string();
            let cols: Vec<&str> = c[2].split(", ").collect();
            let vals: Vec<SqlValue> = c[3].split(", ").map(|t| token(t, params)).collect();
            assert_eq!(cols.len(), vals.len(), "column/value mismatch in {sql}");
            let rec: Rec = cols.into_iter().map(str::to_string).zip(vals).collect();
            let id = self.db.insert(&table, rec);
            let rows = if c.get(4).is_some() { vec![vec![SqlValue::Int(id)]] } else { Vec::new() };
            return (rows, 1);
        }
        if let Some(c) = UPDATE.captures(sql) {
            let table = c[1].to_string();
            let sets: Vec<(String, SqlValue)> = c[2]
                .split(", ")
                .map(|s| {
                    let (col, tok) = s.split_once(" = ").unwrap();
                    (col.to_string(), token(tok, params))
                })
                .collect();
            let key = c[3].to_string();
            let value = param(&c[4], params);
            let returning = c.get(5).is_some();
            let mut rows = Vec::new();
            let mut n = 0;
            for r in self.db.tables.entry(table).or_default().iter_mut() {
                if field(r, &key) == value {
                    for (col, v) in &sets {
                        r.insert(col.clone(), v.clone());
                    }
                    n += 1;
                    if returning {
                        rows.push(vec![field(r, "id")]);
                    }
                }
            }
            return (rows, n);
        }
        if let Some(c) = SELECT_WHERE.captures(sql) {
            let cols: Vec<&str> = c[1].split(", ").collect();
            let table = &c[2];
            let key = &c[3];
            let value = param(&c[4], params);
            let rows: Vec<Row> = self
                .db
                .rows(table)
                .iter()
                .filter(|r| field(r, key) == value)
                .map(|r| cols.iter().map(|col| field(r, col)).collect())
                .collect();
            let n = rows.len() as u64;
            return (rows, n);
        }
        if let Some(c) = DELETE_WHERE.captures(sql) {
            let key = c[2].to_string();
            let value = param(&c[3], params);
            let rows = self.db.tables.entry(c[1].to_string()).or_default();
            let before = rows.len();
            rows.retain(|r| field(r, &key) != value);
            return (Vec::new(), (before - rows.len()) as u64);
        }
        panic!("MemoryStore does not understand {sql:?}");
    }
}

#[async_trait]
impl TxHandle for MemoryTx {
    async fn get(&mut self, sql: &str, params: &[SqlValue]) -> Result<Row, StoreError> {
        let (rows, _) = self.run(sql, params);
        rows.into_iter().next().ok_or_else(|| StoreError::NoRow(sql.to_string()))
    }

    async fn select(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
        Ok(self.run(sql, params).0)
    }

    async fn exec(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError> {
        Ok(self.run(sql, params).1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let pending = self.store.conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.store.conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict("injected serialization failure".into()));
        }
        *self.store.state.lock().unwrap() = self.db;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Slugs, personas, configuration
// ---------------------------------------------------------------------------

/// Scripted slugs first, then `s000001`, `s000002`, ...
#[derive(Default)]
pub struct SeqSlugs {
    scripted: Mutex<VecDeque<String>>,
    n: AtomicUsize,
}

impl SeqSlugs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted<I: IntoIterator<Item = S>, S: Into<String>>(items: I) -> Self {
        Self {
            scripted: Mutex::new(items.into_iter().map(Into::into).collect()),
            n: AtomicUsize::new(0),
        }
    }
}

impl SlugSource for SeqSlugs {
    fn slug(&self, _len: usize) -> String {
        if let Some(s) = self.scripted.lock().unwrap().pop_front() {
            return s;
        }
        let n = self.n.fetch_add(1, Ordering::SeqCst) + 1;
        format!("s{n:06}")
    }
}

pub fn persona(id: i64, admin: bool) -> Persona {
    Persona {
        id,
        slug: format!("persona{id}"),
        handle: format!("handle{id}"),
        admin,
    }
}

/// Defaults rooted at `root`, retrying without delays.
pub fn config(root: &Path) -> EngineConfig {
    let mut c = EngineConfig::with_root(root);
    c.retry.tx = RetryPolicy::immediate(3);
    c.retry.disk = RetryPolicy::immediate(2);
    c
}

/// Regular files directly under `root`, sorted.
pub fn stored_files(root: &Path) -> Vec<String> {
    let mut out: Vec<String> = std::fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

fn gradient(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| Rgb([(x * 255 / w.max(1)) as u8, (y * 255 / h.max(1)) as u8, 128]))
}

pub fn png(w: u32, h: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(gradient(w, h))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

pub fn jpeg(w: u32, h: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(gradient(w, h))
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 90))
        .unwrap();
    buf
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

pub fn text(name: &str) -> Field {
    Field::new(name, WidgetKind::Text)
}

pub fn optional(mut f: Field) -> Field {
    f.optional = true;
    f
}

pub fn values(mut f: Field, names: &[&str]) -> Field {
    f.values = names
        .iter()
        .map(|n| FieldValue {
            name: n.to_string(),
            text: n.to_uppercase(),
            ..FieldValue::default()
        })
        .collect();
    f
}

pub fn group(name: &str, add: usize, fields: Vec<Field>) -> Field {
    let mut g = Field::new(name, WidgetKind::Group);
    g.add = add;
    g.fields = fields;
    g
}

/// Mapping where every walked path is its own schema path.
pub fn identity_mapping(paths: &[&str]) -> Mapping {
    paths.iter().map(|p| (*p, *p)).collect()
}

/// Talent mode: a trimmed profile editor with projects, roles and
/// advertised skills with media examples.
pub fn talent_schema() -> ModeSchema {
    let mut skill = Field::new("skill", WidgetKind::Tagger);
    skill.values = vec![
        FieldValue {
            name: "art".into(),
            text: "Character Art".into(),
            data: "image".into(),
            ..FieldValue::default()
        },
        FieldValue {
            name: "writing".into(),
            text: "Writing".into(),
            data: "text".into(),
            ..FieldValue::default()
        },
    ];
    skill.optional = true;

    let role = group("role", 2, vec![text("name"), optional(text("comment")), skill, optional(Field::new("duty", WidgetKind::Tagger))]);
    let mut start = Field::new("start", WidgetKind::Calendar);
    start.optional = true;
    let mut finish = Field::new("finish", WidgetKind::Calendar);
    finish.optional = true;
    let mut project = group(
        "project",
        3,
        vec![
            text("name"),
            optional(text("link")),
            optional(text("teamname")),
            optional(text("teamlink")),
            start,
            finish,
            role,
        ],
    );
    project.optional = true;

    let mut image = Field::new("image", WidgetKind::File);
    image.max = 2048;
    let mut example = group(
        "example",
        2,
        vec![
            optional(text("alttext")),
            optional(text("title")),
            optional(text("project")),
            optional(text("info")),
            image,
            optional(Field::new("richtext", WidgetKind::Richtext)),
        ],
    );
    example = values(example, &["image"]);
    example.values[0].text = "image".into();
    let mut advertised = group("advertised", 3, vec![text("skill"), example]);
    advertised.optional = true;

    let mut visibility = values(Field::new("visibility", WidgetKind::Radio), &["public", "private"]);
    visibility.optional = false;
    let mut available = values(Field::new("available", WidgetKind::Radio), &["yes", "no"]);
    available.values[0].truth = true;
    available.optional = true;

    let mut email = optional(text("email"));
    email.validate = vec!["isEmail".into()];
    let mut discord = optional(text("discord"));
    discord.validate = vec!["isDiscord".into()];
    let mut duration = values(Field::new("duration", WidgetKind::Range), &["week", "month", "year"]);
    duration.optional = true;
    let mut tag = Field::new("tag", WidgetKind::Tagger);
    tag.optional = true;
    tag.max = 5;
    let mut compensation = values(Field::new("compensation", WidgetKind::Checkbox), &["paid", "revshare", "unpaid"]);
    compensation.optional = true;
    let mut medium = Field::new("medium", WidgetKind::Tagger);
    medium.optional = true;
    let mut language = Field::new("language", WidgetKind::Tagger);
    language.optional = true;

    let mut name = text("name");
    name.min = 3;
    name.max = 40;
    let mut summary = optional(Field::new("summary", WidgetKind::Textarea));
    summary.max = 300;

    let details = group(
        "details",
        0,
        vec![
            available,
            visibility,
            name,
            summary,
            optional(text("website")),
            email,
            discord,
            duration,
            tag,
            compensation,
            medium,
            language,
        ],
    );
    let editor = Fields::new(vec![details, project, advertised]);
    let mapping = identity_mapping(&[
        "available",
        "visibility",
        "name",
        "summary",
        "website",
        "email",
        "discord",
        "duration",
        "tag",
        "compensation",
        "medium",
        "language",
        "project",
        "project.name",
        "project.link",
        "project.teamname",
        "project.teamlink",
        "project.start",
        "project.finish",
        "project.role",
        "project.role.name",
        "project.role.comment",
        "project.role.skill",
        "project.role.duty",
        "advertised",
        "advertised.skill",
        "advertised.example",
        "advertised.example.alttext",
        "advertised.example.title",
        "advertised.example.project",
        "advertised.example.info",
        "advertised.example.richtext",
    ]);
    ModeSchema::new("talent", "profile", editor, mapping)
}

/// Forums mode over posts.
pub fn forums_schema() -> ModeSchema {
    let mut pinned = values(Field::new("pinned", WidgetKind::Checkbox), &["pinned"]);
    pinned.admin_only = true;
    let mut locked = values(Field::new("locked", WidgetKind::Checkbox), &["locked"]);
    locked.admin_only = true;
    let mut body = Field::new("body", WidgetKind::Richtext);
    body.min = 1;
    let editor = Fields::new(vec![group(
        "post",
        0,
        vec![
            pinned,
            locked,
            values(Field::new("visibility", WidgetKind::Radio), &["public", "unlisted"]),
            text("name"),
            optional(Field::new("summary", WidgetKind::Textarea)),
            body,
            optional(Field::new("category", WidgetKind::Tagger)),
            optional(Field::new("tag", WidgetKind::Tagger)),
        ],
    )]);
    let mapping = identity_mapping(&[
        "pinned",
        "locked",
        "visibility",
        "name",
        "summary",
        "body",
        "category",
        "tag",
    ]);
    ModeSchema::new("forums", "post", editor, mapping)
}
