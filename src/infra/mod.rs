//! Configuration, retry, slug generation and logging.

pub mod config;
pub mod logging;
pub mod retry;
pub mod slug;

pub use config::{EngineConfig, RetryPolicy};
pub use retry::{Attempted, Tryer};
pub use slug::{RandomSlugs, SlugSource};
