//! Relational projection of a validated resource.

use std::fmt;

use serde::Serialize;

/// A column value ready to be bound as a positional parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Text(s) => write!(f, "{s:?}"),
            SqlValue::Int(n) => write!(f, "{n}"),
            SqlValue::Float(n) => write!(f, "{n}"),
            SqlValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Int(n)
    }
}

impl From<f64> for SqlValue {
    fn from(n: f64) -> Self {
        SqlValue::Float(n)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One table row plus the rows of its child tables.
///
/// Children carry an implicit `ref_id` pointing at this row's generated id.
/// Only the root node uses `written` and `retained`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableTree {
    pub name: String,
    pub columns: Vec<(String, SqlValue)>,
    pub children: Vec<TableTree>,
    /// Every direct child table this node can own, populated or not.
    pub declared_children: Vec<String>,
    /// Absolute paths written to disk during validation.
    pub written: Vec<String>,
    /// Stored file names the submission keeps.
    pub retained: Vec<String>,
    /// Owning persona id; set on the root.
    pub refs: i64,
}

impl TableTree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a column, or overwrites it if already present.
    pub fn safe_add(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Appends a column without checking for an existing entry.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.columns.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        let i = self.columns.iter().position(|(c, _)| c == column)?;
        Some(self.columns.remove(i).1)
    }

    pub fn declare_child(&mut self, table: &str) {
        if !self.declared_children.iter().any(|t| t == table) {
            self.declared_children.push(table.to_string());
        }
    }

    /// Natural key of the row, when one has been assigned.
    pub fn slug(&self) -> Option<&str> {
        self.get("slug").and_then(SqlValue::as_str).filter(|s| !s.is_empty())
    }

    /// Depth-first iterator over this node and its descendants.
    pub fn walk(&self) -> Vec<&TableTree> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    /// Every child table name reachable from here, deduplicated, in
    /// depth-first order.
    pub fn table_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for node in self.walk() {
            for name in node.declared_children.iter().chain(node.children.iter().map(|c| &c.name)) {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
        }
        out
    }
}
