//! SQL over a [`TableTree`]: inserts, updates, ownership and file rows.
//!
//! Every statement is built from table and column names produced by the
//! validator, never from user input, and binds values positionally.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tracing::debug;

use super::datastore::TxHandle;
use crate::domain::resource::FileName;
use crate::domain::{SqlValue, TableTree};
use crate::error::StoreError;

/// Columns an update never touches on the root row.
const PRESERVED_ON_UPDATE: [&str; 4] = ["id", "ref_id", "slug", "created"];

/// Table recording which stored files belong to which resource.
pub const FILE_TABLE: &str = "file";

/// Placeholder list for `values`, with NULLs inlined so Postgres can infer
/// the column type. Returns the bound parameters alongside.
fn placeholders(values: impl IntoIterator<Item = SqlValue>, first: usize) -> (Vec<String>, Vec<SqlValue>) {
    let mut marks = Vec::new();
    let mut params = Vec::new();
    for v in values {
        if v.is_null() {
            marks.push("NULL".to_string());
        } else {
            params.push(v);
            marks.push(format!("${}", first + params.len() - 1));
        }
    }
    (marks, params)
}

/// Writes `node` and all of its children, returning the id of `node`'s row.
///
/// `ref_id` is the persona id for the root and the parent's id below it.
/// The root row always reports its id; child rows only when they have
/// children of their own. Childless rows report `ref_id`.
pub async fn insert_tables(
    tx: &mut dyn TxHandle,
    node: &mut TableTree,
    ref_id: i64,
    update: bool,
) -> Result<i64, StoreError> {
    write_node(tx, node, ref_id, update, true).await
}

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<i64, StoreError>> + Send + 'a>>;

fn write_node<'a>(
    tx: &'a mut dyn TxHandle,
    node: &'a mut TableTree,
    ref_id: i64,
    update: bool,
    root: bool,
) -> NodeFuture<'a> {
    Box::pin(async move {
        node.safe_add("ref_id", ref_id);

        let columns: Vec<(String, SqlValue)> = node
            .columns
            .iter()
            .filter(|(c, _)| !update || !PRESERVED_ON_UPDATE.contains(&c.as_str()))
            .cloned()
            .collect();
        let (names, values): (Vec<String>, Vec<SqlValue>) = columns.into_iter().unzip();

        let returning = root || !node.children.is_empty();
        let (marks, mut params) = placeholders(values, 1);

        let mut sql = if update {
            let slug = node
                .slug()
                .map(str::to_string)
                .ok_or_else(|| StoreError::NoRow(format!("{} has no slug", node.name)))?;
            params.push(SqlValue::Text(slug));
            let slug_mark = params.len();
            if names.is_empty() {
                format!("SELECT id FROM {} WHERE slug = ${}", node.name, slug_mark)
            } else {
                let sets: Vec<String> = names.iter().zip(&marks).map(|(c, m)| format!("{c} = {m}")).collect();
                format!("UPDATE {} SET {} WHERE slug = ${}", node.name, sets.join(", "), slug_mark)
            }
        } else {
            format!("INSERT INTO {} ({}) VALUES ({})", node.name, names.join(", "), marks.join(", "))
        };

        let id = if returning {
            if !sql.starts_with("SELECT") {
                sql.push_str(" RETURNING id");
            }
            let row = tx.get(&sql, &params).await?;
            row.first().and_then(SqlValue::as_i64).ok_or_else(|| StoreError::Decode {
                column: "id".into(),
                reason: format!("{} did not return an integer id", node.name),
            })?
        } else {
            tx.exec(&sql, &params).await?;
            ref_id
        };
        debug!(table = %node.name, id, update, "row written");

        for child in node.children.iter_mut() {
            write_node(&mut *tx, child, id, false, false).await?;
        }
        Ok(id)
    })
}

/// Id of the row in `table` whose slug is `slug`.
pub async fn id_by_slug(tx: &mut dyn TxHandle, table: &str, slug: &str) -> Result<i64, StoreError> {
    let sql = format!("SELECT id FROM {table} WHERE slug = $1");
    let row = tx.get(&sql, &[slug.into()]).await?;
    row.first().and_then(SqlValue::as_i64).ok_or_else(|| StoreError::Decode {
        column: "id".into(),
        reason: format!("{table} id is not an integer"),
    })
}

/// Deletes every row of the given child tables referencing `parent_id`.
/// Deeper tables are cleared by `ON DELETE CASCADE`.
pub async fn delete_children(tx: &mut dyn TxHandle, parent_id: i64, tables: &[String]) -> Result<u64, StoreError> {
    let mut removed = 0;
    for table in tables {
        let sql = format!("DELETE FROM {table} WHERE ref_id = $1");
        removed += tx.exec(&sql, &[parent_id.into()]).await?;
    }
    Ok(removed)
}

/// True when the persona owns the row, or is an administrator.
///
/// The admin arm rides on a cross join with `table`, so an admin gets
/// `false` while `table` has no rows at all.
pub async fn persona_owns(tx: &mut dyn TxHandle, table: &str, slug: &str, persona_id: i64) -> Result<bool, StoreError> {
    let from_where = format!(
        "FROM personas, {table} WHERE ({table}.slug = $1 AND {table}.ref_id = $2) OR (personas.id = $2 AND personas.admin = true)"
    );
    tx.exists(&from_where, &[slug.into(), persona_id.into()]).await
}

/// Records the base names of newly written files against `owner_id`.
pub async fn add_files(tx: &mut dyn TxHandle, owner: &str, owner_id: i64, written: &[String]) -> Result<(), StoreError> {
    let sql = format!("INSERT INTO {FILE_TABLE} ({owner}, file) VALUES ($1, $2)");
    for path in written {
        let base = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        tx.exec(&sql, &[owner_id.into(), base.into()]).await?;
    }
    Ok(())
}

/// Drops file rows of `owner_id` that the submission no longer retains,
/// then records the newly written files. Returns the dropped names so they
/// can be removed from disk after commit.
///
/// A retained name also keeps its `_thumb` twin.
pub async fn update_files(
    tx: &mut dyn TxHandle,
    owner: &str,
    owner_id: i64,
    retained: &[String],
    written: &[String],
) -> Result<Vec<String>, StoreError> {
    let mut params: Vec<SqlValue> = vec![owner_id.into()];
    let mut sql = format!("SELECT file FROM {FILE_TABLE} WHERE {owner} = $1");
    for name in retained {
        for keep in [name.clone(), FileName::new(name.clone()).thumb().0] {
            params.push(keep.into());
            sql.push_str(&format!(" AND file <> ${}", params.len()));
        }
    }
    let obsolete: Vec<String> = tx
        .select(&sql, &params)
        .await?
        .into_iter()
        .filter_map(|row| row.into_iter().next().and_then(|v| v.as_str().map(str::to_string)))
        .collect();

    if !obsolete.is_empty() {
        let mut params: Vec<SqlValue> = vec![owner_id.into()];
        let mut matches = Vec::new();
        for name in &obsolete {
            params.push(name.as_str().into());
            matches.push(format!("file = ${}", params.len()));
        }
        let sql = format!("DELETE FROM {FILE_TABLE} WHERE {owner} = $1 AND ({})", matches.join(" OR "));
        tx.exec(&sql, &params).await?;
    }

    add_files(tx, owner, owner_id, written).await?;
    Ok(obsolete)
}
