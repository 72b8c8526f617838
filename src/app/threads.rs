//! Forum and library threads: ordering of replies and thread locks.

use async_trait::async_trait;
use tracing::debug;

use crate::app::committer::{CommitGuard, CommitOutcome, Committer};
use crate::domain::resource::Persona;
use crate::domain::{Feedback, SqlValue, TableTree};
use crate::error::{EngineError, StoreError};
use crate::storage::TxHandle;

pub const FB_THREAD_LOCKED: &str = "Thread locked. No replies, edits, or deletions are possible.";
pub const FB_NO_THREAD: &str = "The thread being replied to does not exist.";

/// Resource name of every thread post.
pub const POST: &str = "post";

/// Commits posts through the shared committer with thread bookkeeping.
pub struct ThreadService {
    committer: Committer,
}

impl ThreadService {
    pub fn new(committer: Committer) -> Self {
        Self { committer }
    }

    pub fn committer(&self) -> &Committer {
        &self.committer
    }

    /// Opens a thread: the post is its own thread at index 1.
    pub async fn create_thread(&self, tree: &TableTree, persona: &Persona, mode: &str) -> Result<CommitOutcome, EngineError> {
        let guard = NewThread { mode };
        self.committer.create(tree, persona, &[&guard]).await
    }

    /// Appends a reply after the last post of the thread named by `thread`.
    pub async fn create_reply(
        &self,
        tree: &TableTree,
        persona: &Persona,
        mode: &str,
        thread: &str,
    ) -> Result<CommitOutcome, EngineError> {
        let guard = Reply { mode, thread };
        self.committer.create(tree, persona, &[&guard]).await
    }

    /// Replaces a post unless its thread is locked.
    pub async fn update_post(&self, tree: &TableTree, persona: &Persona, mode: &str) -> Result<CommitOutcome, EngineError> {
        let guard = Edit { mode };
        self.committer.update(tree, persona, &[&guard]).await
    }
}

fn kind_table(tree: &TableTree) -> String {
    format!("{}_kind", tree.name)
}

/// Records the mode the post was made in.
fn add_kind(tree: &mut TableTree, mode: &str) {
    let table = kind_table(tree);
    tree.declare_child(&table);
    tree.children.retain(|c| c.name != table);
    let mut row = TableTree::new(table);
    row.push("kind", mode);
    tree.children.push(row);
}

struct NewThread<'a> {
    mode: &'a str,
}

#[async_trait]
impl<'a> CommitGuard for NewThread<'a> {
    async fn before_write(
        &self,
        _tx: &mut dyn TxHandle,
        tree: &mut TableTree,
        _persona: &Persona,
    ) -> Result<Option<Feedback>, StoreError> {
        tree.safe_add("idx", 1i64);
        add_kind(tree, self.mode);
        Ok(None)
    }

    async fn after_write(&self, tx: &mut dyn TxHandle, tree: &TableTree, id: i64) -> Result<(), StoreError> {
        let sql = format!("UPDATE {} SET thread = $1 WHERE id = $1", tree.name);
        tx.exec(&sql, &[id.into()]).await?;
        Ok(())
    }
}

struct Reply<'a> {
    mode: &'a str,
    thread: &'a str,
}

#[async_trait]
impl<'a> CommitGuard for Reply<'a> {
    async fn before_write(
        &self,
        tx: &mut dyn TxHandle,
        tree: &mut TableTree,
        persona: &Persona,
    ) -> Result<Option<Feedback>, StoreError> {
        let sql = format!(
            "SELECT idx, thread FROM {t} WHERE thread = (SELECT id FROM {t} WHERE slug = $1) ORDER BY idx DESC",
            t = tree.name
        );
        let rows = tx.select(&sql, &[self.thread.into()]).await?;
        let Some(last) = rows.first() else {
            return Ok(Some(Feedback::general(FB_NO_THREAD)));
        };
        let idx = last.first().and_then(SqlValue::as_i64).unwrap_or(0);
        let thread_id = last.get(1).and_then(SqlValue::as_i64).ok_or_else(|| StoreError::Decode {
            column: "thread".into(),
            reason: "thread id is not an integer".into(),
        })?;

        let sql = format!("SELECT locked FROM {} WHERE id = $1", tree.name);
        let row = tx.get(&sql, &[thread_id.into()]).await?;
        let locked = row.first().and_then(SqlValue::as_bool).unwrap_or(false);
        if locked && !persona.admin {
            debug!(thread = %self.thread, persona = persona.id, "reply to locked thread refused");
            return Ok(Some(Feedback::general(FB_THREAD_LOCKED)));
        }

        tree.safe_add("thread", thread_id);
        tree.safe_add("idx", idx + 1);
        add_kind(tree, self.mode);
        Ok(None)
    }
}

struct Edit<'a> {
    mode: &'a str,
}

#[async_trait]
impl<'a> CommitGuard for Edit<'a> {
    async fn before_write(
        &self,
        tx: &mut dyn TxHandle,
        tree: &mut TableTree,
        persona: &Persona,
    ) -> Result<Option<Feedback>, StoreError> {
        if !persona.admin {
            let slug = tree.slug().unwrap_or_default().to_string();
            let from_where = format!(
                "FROM {t} WHERE id = (SELECT thread FROM {t} WHERE slug = $1) AND locked = true",
                t = tree.name
            );
            if tx.exists(&from_where, &[slug.into()]).await? {
                return Ok(Some(Feedback::general(FB_THREAD_LOCKED)));
            }
        }
        add_kind(tree, self.mode);
        Ok(None)
    }
}
