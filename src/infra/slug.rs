//! Random identifier generation, injected wherever a fresh slug is needed.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Source of fresh slugs for resources and stored files.
pub trait SlugSource: Send + Sync {
    fn slug(&self, len: usize) -> String;
}

/// Alphanumeric slugs drawn from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSlugs;

impl SlugSource for RandomSlugs {
    fn slug(&self, len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }
}
