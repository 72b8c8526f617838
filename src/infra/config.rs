//! Centralized configuration (environment variables + defaults).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::domain::resource::FileFormat;

/// Bounded retry with exponential backoff and jitter. Times in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: usize,
    pub base_ms: u64,
    pub max_interval_ms: u64,
    /// Total sleep budget across all retries; 0 disables the cap.
    pub max_wait_ms: u64,
    pub exponent: f64,
    /// Fraction of each delay that is randomised, in `0.0..=1.0`.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn transactions() -> Self {
        Self {
            retries: 5,
            base_ms: 20,
            max_interval_ms: 1_000,
            max_wait_ms: 5_000,
            exponent: 2.0,
            jitter: 0.3,
        }
    }

    pub fn disk() -> Self {
        Self {
            retries: 2,
            base_ms: 0,
            max_interval_ms: 0,
            max_wait_ms: 0,
            exponent: 1.0,
            jitter: 0.0,
        }
    }

    /// Retries immediately; used by tests.
    pub fn immediate(retries: usize) -> Self {
        Self {
            retries,
            base_ms: 0,
            max_interval_ms: 0,
            max_wait_ms: 0,
            exponent: 1.0,
            jitter: 0.0,
        }
    }

    pub fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_ms > 0).then(|| Duration::from_millis(self.max_wait_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transactions()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub tx: RetryPolicy,
    pub disk: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            tx: RetryPolicy::transactions(),
            disk: RetryPolicy::disk(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RichTextConfig {
    pub paragraph_kinds: Vec<String>,
    pub inline_styles: Vec<String>,
    /// Rune limit per paragraph.
    pub max_paragraph: usize,
}

impl Default for RichTextConfig {
    fn default() -> Self {
        Self {
            paragraph_kinds: ["p", "h2", "h3", "ul", "ol", "blockquote", "pre"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            inline_styles: ["b", "i", "u"].iter().map(|s| s.to_string()).collect(),
            max_paragraph: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaConfig {
    pub formats: Vec<FileFormat>,
    /// Longest edge of a thumbnail in pixels.
    pub thumb_edge: u32,
    pub thumb_jpeg_quality: u8,
    /// Quality used when trying a PNG upload as JPEG.
    pub reencode_png_quality: u8,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            formats: vec![FileFormat::Jpeg, FileFormat::Png],
            thumb_edge: 320,
            thumb_jpeg_quality: 75,
            reencode_png_quality: 100,
        }
    }
}

/// Used when no root is configured.
pub const DEFAULT_STORAGE_ROOT: &str = "/var/lib/resource-projection/files";

/// Engine-wide settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory every uploaded file is written under.
    pub storage_root: PathBuf,
    /// URL prefix the populator puts before stored file names.
    pub public_prefix: String,
    pub slug_len: usize,
    /// Stamped into image metadata.
    pub site_name: String,
    pub rich_text: RichTextConfig,
    pub media: MediaConfig,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            public_prefix: "/user/".to_string(),
            slug_len: 11,
            site_name: "StoryDevs".to_string(),
            rich_text: RichTextConfig::default(),
            media: MediaConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with the given storage root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: root.into(),
            ..Self::default()
        }
    }

    /// Loads `.env` and reads the engine settings from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut c = EngineConfig::with_root(storage_root()?);
        if let Some(n) = optional_parse::<usize>("SLUG_LEN")? {
            if n == 0 {
                return Err(anyhow!("SLUG_LEN must be at least 1"));
            }
            c.slug_len = n;
        }
        if let Ok(site) = std::env::var("SITE_NAME") {
            c.site_name = site;
        }
        if let Ok(prefix) = std::env::var("PUBLIC_PREFIX") {
            c.public_prefix = prefix;
        }
        if let Some(n) = optional_parse::<usize>("RETRY_TX_ATTEMPTS")? {
            c.retry.tx.retries = n.saturating_sub(1);
        }
        if let Some(n) = optional_parse::<usize>("RETRY_DISK_ATTEMPTS")? {
            c.retry.disk.retries = n.saturating_sub(1);
        }
        Ok(c)
    }
}

/// Storage root (required, absolute).
pub fn storage_root() -> anyhow::Result<PathBuf> {
    let raw = std::env::var("STORAGE_ROOT").context("STORAGE_ROOT must be set")?;
    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(anyhow!("STORAGE_ROOT must be an absolute path, got {:?}", path));
    }
    Ok(path)
}

/// Database URL must be provided (no default) for safety.
pub fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL").context("DATABASE_URL must be set")
}

fn optional_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key} must be a valid number, got {v:?}")),
        Err(_) => Ok(None),
    }
}
