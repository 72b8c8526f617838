//! Persists table trees inside serializable transactions.
//!
//! Every attempt begins its own transaction and works on its own clone of
//! the tree, so a retried attempt never sees columns or slugs left behind by
//! the one before it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::resource::Persona;
use crate::domain::{Feedback, TableTree};
use crate::error::{EngineError, StoreError};
use crate::infra::{RetryPolicy, SlugSource, Tryer};
use crate::storage::{tables, Datastore, TxHandle};

/// Hook into a commit attempt. Runs inside the attempt's transaction.
#[async_trait]
pub trait CommitGuard: Send + Sync {
    /// Runs after ownership is established and before any row is written.
    /// May add columns or child rows. Returning feedback rolls the attempt
    /// back and ends the commit without writes.
    async fn before_write(
        &self,
        tx: &mut dyn TxHandle,
        tree: &mut TableTree,
        persona: &Persona,
    ) -> Result<Option<Feedback>, StoreError>;

    /// Runs after the tree has been written and its root id is known.
    async fn after_write(&self, _tx: &mut dyn TxHandle, _tree: &TableTree, _id: i64) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub id: i64,
    pub slug: String,
    /// File names no longer referenced after an update; the caller removes
    /// them from disk.
    pub obsolete_files: Vec<String>,
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitReceipt),
    Rejected(Feedback),
}

impl CommitOutcome {
    pub fn receipt(&self) -> Option<&CommitReceipt> {
        match self {
            CommitOutcome::Committed(r) => Some(r),
            CommitOutcome::Rejected(_) => None,
        }
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        match self {
            CommitOutcome::Committed(_) => None,
            CommitOutcome::Rejected(fb) => Some(fb),
        }
    }
}

/// Where an attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Begin,
    Ownership,
    Guard,
    DeleteChildren,
    Write,
    Files,
    Commit,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Begin => "begin",
            Stage::Ownership => "ownership",
            Stage::Guard => "guard",
            Stage::DeleteChildren => "delete children",
            Stage::Write => "write rows",
            Stage::Files => "reconcile files",
            Stage::Commit => "commit",
        }
    }
}

enum Written {
    Row { id: i64, obsolete: Vec<String> },
    Rejected(Feedback),
}

type Staged<T> = Result<T, (Stage, StoreError)>;

fn at<T>(stage: Stage, r: Result<T, StoreError>) -> Staged<T> {
    r.map_err(|e| (stage, e))
}

pub struct Committer {
    store: Arc<dyn Datastore>,
    tryer: Tryer,
    slugs: Arc<dyn SlugSource>,
    slug_len: usize,
}

impl Committer {
    pub fn new(store: Arc<dyn Datastore>, policy: RetryPolicy, slugs: Arc<dyn SlugSource>, slug_len: usize) -> Self {
        Self {
            store,
            tryer: Tryer::new("transaction", policy),
            slugs,
            slug_len,
        }
    }

    pub fn slugs(&self) -> &Arc<dyn SlugSource> {
        &self.slugs
    }

    /// Inserts `tree` under a freshly generated slug and registers the files
    /// it wrote.
    pub async fn create(
        &self,
        tree: &TableTree,
        persona: &Persona,
        guards: &[&dyn CommitGuard],
    ) -> Result<CommitOutcome, EngineError> {
        let done = self
            .tryer
            .run_async(
                |attempt| self.attempt(tree, persona, guards, false, attempt),
                StoreError::is_retryable,
            )
            .await?;
        let outcome = done.value;
        if let CommitOutcome::Committed(r) = &outcome {
            info!(table = %tree.name, id = r.id, slug = %r.slug, persona = persona.id, attempts = r.attempts, "resource created");
        }
        Ok(outcome)
    }

    /// Replaces the row matching the tree's slug and all of its children,
    /// then reconciles its files.
    pub async fn update(
        &self,
        tree: &TableTree,
        persona: &Persona,
        guards: &[&dyn CommitGuard],
    ) -> Result<CommitOutcome, EngineError> {
        if tree.slug().is_none() {
            return Err(EngineError::MissingSlug(tree.name.clone()));
        }
        let done = self
            .tryer
            .run_async(
                |attempt| self.attempt(tree, persona, guards, true, attempt),
                StoreError::is_retryable,
            )
            .await?;
        let outcome = done.value;
        if let CommitOutcome::Committed(r) = &outcome {
            info!(
                table = %tree.name,
                id = r.id,
                slug = %r.slug,
                persona = persona.id,
                attempts = r.attempts,
                obsolete = r.obsolete_files.len(),
                "resource updated"
            );
        }
        Ok(outcome)
    }

    async fn attempt(
        &self,
        tree: &TableTree,
        persona: &Persona,
        guards: &[&dyn CommitGuard],
        update: bool,
        attempt: usize,
    ) -> Result<CommitOutcome, StoreError> {
        let mut tree = tree.clone();
        if !update {
            tree.safe_add("slug", self.slugs.slug(self.slug_len));
        }
        let slug = tree.slug().unwrap_or_default().to_string();

        let mut tx = self.store.begin().await.map_err(|e| {
            warn!(table = %tree.name, attempt, stage = Stage::Begin.as_str(), error = %e, "commit attempt failed");
            e
        })?;

        let steps = if update {
            self.update_steps(tx.as_mut(), &mut tree, persona, guards).await
        } else {
            self.create_steps(tx.as_mut(), &mut tree, persona, guards).await
        };

        match steps {
            Ok(Written::Row { id, obsolete }) => {
                if let Err(e) = tx.commit().await {
                    warn!(table = %tree.name, attempt, stage = Stage::Commit.as_str(), error = %e, "commit attempt failed");
                    return Err(e);
                }
                Ok(CommitOutcome::Committed(CommitReceipt {
                    id,
                    slug,
                    obsolete_files: obsolete,
                    attempts: attempt,
                }))
            }
            Ok(Written::Rejected(fb)) => {
                rollback(tx, &tree.name).await;
                Ok(CommitOutcome::Rejected(fb))
            }
            Err((stage, e)) => {
                warn!(table = %tree.name, attempt, stage = stage.as_str(), error = %e, "commit attempt failed");
                rollback(tx, &tree.name).await;
                Err(e)
            }
        }
    }

    async fn create_steps(
        &self,
        tx: &mut dyn TxHandle,
        tree: &mut TableTree,
        persona: &Persona,
        guards: &[&dyn CommitGuard],
    ) -> Staged<Written> {
        for g in guards {
            if let Some(fb) = at(Stage::Guard, g.before_write(tx, tree, persona).await)? {
                return Ok(Written::Rejected(fb));
            }
        }
        let id = at(Stage::Write, tables::insert_tables(tx, tree, persona.id, false).await)?;
        at(Stage::Files, tables::add_files(tx, &tree.name, id, &tree.written).await)?;
        for g in guards {
            at(Stage::Guard, g.after_write(tx, tree, id).await)?;
        }
        Ok(Written::Row {
            id,
            obsolete: Vec::new(),
        })
    }

    async fn update_steps(
        &self,
        tx: &mut dyn TxHandle,
        tree: &mut TableTree,
        persona: &Persona,
        guards: &[&dyn CommitGuard],
    ) -> Staged<Written> {
        let slug = tree.slug().unwrap_or_default().to_string();
        if !at(Stage::Ownership, tables::persona_owns(tx, &tree.name, &slug, persona.id).await)? {
            return Ok(Written::Rejected(Feedback::general(
                "You do not have permission to edit this resource.",
            )));
        }
        for g in guards {
            if let Some(fb) = at(Stage::Guard, g.before_write(tx, tree, persona).await)? {
                return Ok(Written::Rejected(fb));
            }
        }

        let id = at(Stage::Write, tables::id_by_slug(tx, &tree.name, &slug).await)?;
        let mut children = tree.declared_children.clone();
        for c in &tree.children {
            if !children.contains(&c.name) {
                children.push(c.name.clone());
            }
        }
        at(Stage::DeleteChildren, tables::delete_children(tx, id, &children).await)?;
        at(Stage::Write, tables::insert_tables(tx, tree, persona.id, true).await)?;

        let obsolete = at(
            Stage::Files,
            tables::update_files(tx, &tree.name, id, &tree.retained, &tree.written).await,
        )?;
        for g in guards {
            at(Stage::Guard, g.after_write(tx, tree, id).await)?;
        }
        Ok(Written::Row { id, obsolete })
    }
}

async fn rollback(tx: Box<dyn TxHandle>, table: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(table, error = %e, "rollback failed");
    }
}
