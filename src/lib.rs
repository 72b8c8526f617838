pub mod app;
pub mod domain;
pub mod error;
pub mod infra;
pub mod storage;

// Convenience re-exports (keeps call-sites clean)
pub use app::committer::{CommitGuard, CommitOutcome, CommitReceipt, Committer};
pub use app::populator::populate;
pub use app::submission::{Engine, Submission};
pub use app::threads::ThreadService;
pub use app::validator::{RequestContext, ResourceRules, TalentRules, Validation, Validator};
pub use domain::resource::{Attr, Group, Persona, Resource, Value};
pub use domain::schema::{Field, Fields, Mapping, ModeSchema, SchemaRegistry, WidgetKind};
pub use domain::{Feedback, SqlValue, TableTree};
pub use error::{EngineError, MediaError, RetryError, SchemaError, StorageError, StoreError};
pub use infra::{EngineConfig, RandomSlugs, RetryPolicy, SlugSource, Tryer};
pub use storage::{Datastore, PgDatastore, TxHandle};
