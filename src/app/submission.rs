//! Entry points tying validation, population and commits together.

use std::sync::Arc;

use regex::Regex;
use tracing::{error, info};

use crate::app::committer::{CommitOutcome, Committer};
use crate::app::populator;
use crate::app::threads::{ThreadService, POST};
use crate::app::validator::{self, RequestContext, ResourceRules, Validation, Validator};
use crate::domain::resource::Resource;
use crate::domain::schema::{Fields, ModeSchema};
use crate::domain::TableTree;
use crate::error::EngineError;
use crate::infra::{EngineConfig, RandomSlugs, SlugSource};
use crate::storage::{files, Datastore};

/// Validation and population over one configuration.
pub struct Engine {
    config: Arc<EngineConfig>,
    slugs: Arc<dyn SlugSource>,
    validator: Validator,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_slugs(config, Arc::new(RandomSlugs))
    }

    pub fn with_slugs(config: EngineConfig, slugs: Arc<dyn SlugSource>) -> Self {
        let config = Arc::new(config);
        let validator = Validator::new(config.clone(), slugs.clone());
        Self {
            config,
            slugs,
            validator,
        }
    }

    pub fn with_pattern(mut self, name: impl Into<String>, re: Regex) -> Self {
        self.validator = self.validator.with_pattern(name, re);
        self
    }

    pub fn with_rules(mut self, mode: impl Into<String>, rules: Arc<dyn ResourceRules>) -> Self {
        self.validator = self.validator.with_rules(mode, rules);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn validate(&self, resource: &Resource, schema: &ModeSchema, ctx: &RequestContext) -> Result<Validation, EngineError> {
        self.validator.validate(resource, schema, ctx)
    }

    /// A populated copy of the mode's editor for `resource`.
    pub fn populate(&self, resource: &Resource, schema: &ModeSchema) -> Result<Fields, EngineError> {
        let mut editor = schema.editor.clone();
        populator::populate(resource, &mut editor, &self.config.public_prefix)?;
        Ok(editor)
    }

    /// Commits accepted validations to `store`.
    pub fn submission(&self, store: Arc<dyn Datastore>) -> Submission {
        let committer = || {
            Committer::new(
                store.clone(),
                self.config.retry.tx.clone(),
                self.slugs.clone(),
                self.config.slug_len,
            )
        };
        Submission {
            config: self.config.clone(),
            committer: committer(),
            threads: ThreadService::new(committer()),
        }
    }
}

/// Persists validations, cleaning up files whichever way the commit ends.
pub struct Submission {
    config: Arc<EngineConfig>,
    committer: Committer,
    threads: ThreadService,
}

impl Submission {
    pub async fn create(&self, v: &mut Validation) -> Result<CommitOutcome, EngineError> {
        if !v.is_accepted() {
            return Ok(CommitOutcome::Rejected(v.feedback.clone()));
        }
        let outcome = if v.tree.name == POST {
            match &v.thread {
                Some(thread) => self.threads.create_reply(&v.tree, &v.persona, &v.mode, thread).await,
                None => self.threads.create_thread(&v.tree, &v.persona, &v.mode).await,
            }
        } else {
            self.committer.create(&v.tree, &v.persona, &[]).await
        };
        self.settle(v, outcome)
    }

    pub async fn update(&self, v: &mut Validation) -> Result<CommitOutcome, EngineError> {
        if !v.is_accepted() {
            return Ok(CommitOutcome::Rejected(v.feedback.clone()));
        }
        let outcome = if v.tree.name == POST {
            self.threads.update_post(&v.tree, &v.persona, &v.mode).await
        } else {
            self.committer.update(&v.tree, &v.persona, &[]).await
        };
        self.settle(v, outcome)
    }

    /// Removes new files unless the commit went through, and obsolete files
    /// when it did.
    fn settle(&self, v: &mut Validation, outcome: Result<CommitOutcome, EngineError>) -> Result<CommitOutcome, EngineError> {
        match outcome {
            Ok(CommitOutcome::Committed(receipt)) => {
                v.tree.written.clear();
                let removed = files::remove_obsolete(&self.config.storage_root, &receipt.obsolete_files);
                if removed > 0 {
                    info!(request_id = %v.request_id, slug = %receipt.slug, removed, "obsolete files removed");
                }
                Ok(CommitOutcome::Committed(receipt))
            }
            Ok(rejected) => match remove_new(&mut v.tree) {
                Ok(()) => Ok(rejected),
                Err(remaining) => {
                    error!(request_id = %v.request_id, remaining = remaining.len(), "unable to remove new files");
                    Err(EngineError::Cleanup { cause: None, remaining })
                }
            },
            Err(e) => {
                error!(request_id = %v.request_id, table = %v.tree.name, error = %e, "commit failed");
                Err(validator::discard(&mut v.tree, e))
            }
        }
    }
}

fn remove_new(tree: &mut TableTree) -> Result<(), Vec<String>> {
    let written = std::mem::take(&mut tree.written);
    files::remove_written(&written)
}
