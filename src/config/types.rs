use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the gallery crawler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gallery: GalleryConfig,
    pub request: RequestConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// Which gallery to crawl and how far
#[derive(Debug, Clone, Deserialize)]
pub struct GalleryConfig {
    /// Listing URL of the gallery; the `page` query parameter is added per page
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Number of listing pages visited per run
    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    /// Posts numbered below this floor are ignored
    #[serde(rename = "min-post-id", default)]
    pub min_post_id: u64,
}

/// HTTP identity, timeouts, and politeness delays
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Sent as the `Referer` header when non-empty
    #[serde(default)]
    pub referer: String,

    /// Total timeout for a single request (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Lower bound of the randomized delay after each post (milliseconds)
    #[serde(rename = "delay-min-ms")]
    pub delay_min_ms: u64,

    /// Upper bound of the randomized delay after each post (milliseconds)
    #[serde(rename = "delay-max-ms")]
    pub delay_max_ms: u64,

    /// Minimum spacing between any two requests (milliseconds)
    #[serde(rename = "min-interval-ms", default)]
    pub min_interval_ms: u64,
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Output locations
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory holding downloaded images
    #[serde(rename = "images-dir")]
    pub images_dir: String,

    /// Directory receiving compressed post archives
    #[serde(rename = "archive-dir")]
    pub archive_dir: String,
}

/// Archival policy
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Posts older than this many days are moved to the archive
    #[serde(rename = "max-age-days", default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
        }
    }
}

fn default_max_age_days() -> u32 {
    30
}
