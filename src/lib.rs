//! Gallery crawler: an incremental crawl-and-persist pipeline for paginated forum boards
//!
//! This crate fetches listing pages of a single gallery, enriches every post stub
//! with its detail page (body, images, comments), deduplicates downloaded images
//! by content hash, and persists everything to SQLite while keeping a resumable
//! progress record.

pub mod archive;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod images;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for gallery crawler operations
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: state::CrawlState,
        to: state::CrawlState,
    },

    #[error("A crawl is already running")]
    CrawlInProgress,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised while performing an HTTP GET
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Network error for {url}: {cause}")]
    Network { url: String, cause: String },

    #[error("Failed to read body of {url}: {cause}")]
    Body { url: String, cause: String },
}

impl FetchError {
    /// HTTP status code, when the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The URL that failed
    pub fn url(&self) -> &str {
        match self {
            Self::Http { url, .. }
            | Self::Timeout { url }
            | Self::Network { url, .. }
            | Self::Body { url, .. } => url,
        }
    }
}

/// Errors raised when a document does not have the expected shape
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Missing element matching '{selector}'")]
    MissingElement { selector: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

/// Errors raised while downloading or storing an image
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Download failed: {0}")]
    Download(#[from] FetchError),

    #[error("Image body is empty: {url}")]
    Empty { url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

/// Result type alias for gallery crawler operations
pub type Result<T> = std::result::Result<T, GalleryError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, CrawlService, CrawlSummary, StopSignal};
pub use extract::{Extractor, HtmlExtractor};
pub use state::CrawlState;
pub use storage::{CrawlStatus, SqliteStorage, Storage};
