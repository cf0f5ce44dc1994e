//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Post upsert with change detection
//! - Append-only comment persistence
//! - The content-addressed image index
//! - The singleton crawl progress record
//! - Read queries used by the web layer and the archiver

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::extract::PostStub;
use crate::GalleryError;

use std::fmt;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(GalleryError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, GalleryError> {
    SqliteStorage::new(path)
}

/// Freshly extracted state of a post, ready to be upserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostData {
    pub number: String,
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub author_ip: String,
    pub date: String,
    pub views: i64,
    pub votes: i64,
    pub content: String,
}

impl PostData {
    /// Builds the upsert payload from a listing stub and the detail page body
    pub fn from_stub(stub: &PostStub, content: String) -> Self {
        Self {
            number: stub.number.to_string(),
            title: stub.title.clone(),
            author: stub.author.clone(),
            author_id: stub.author_id.clone(),
            author_ip: stub.author_ip.clone(),
            date: stub.date.clone(),
            views: stub.views,
            votes: stub.votes,
            content,
        }
    }
}

/// Represents a post row in the database
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PostRecord {
    pub id: i64,
    pub number: String,
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub author_ip: String,
    pub date: String,
    pub views: i64,
    pub votes: i64,
    pub content: String,
    pub first_seen_at: String,
    pub updated_at: String,
}

/// A post row together with aggregate counts, as shown in listings
#[derive(Debug, Clone)]
pub struct PostSummary {
    pub post: PostRecord,
    pub comment_count: u64,
    pub image_count: u64,
}

/// A post with everything attached to it
#[derive(Debug, Clone)]
pub struct PostDetailRecord {
    pub post: PostRecord,
    pub comments: Vec<CommentRecord>,
    pub images: Vec<ImageRecord>,
}

/// Represents a comment row in the database
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    pub author: String,
    pub content: String,
    pub date: String,
}

/// Represents an entry of the content-addressed image index
///
/// `file_path` is relative to the configured images directory. `post_id` is
/// the post that first introduced these bytes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub post_id: i64,
    pub file_path: String,
    pub hash: String,
}

/// Outcome of inserting into the image index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInsert {
    /// A new index row was created
    Inserted(ImageRecord),

    /// The hash was already indexed; the existing row is returned untouched
    Existing(ImageRecord),
}

impl ImageInsert {
    pub fn record(&self) -> &ImageRecord {
        match self {
            Self::Inserted(record) | Self::Existing(record) => record,
        }
    }
}

/// What an upsert did to the posts table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpsertAction {
    Inserted,
    Updated,
    Unchanged,
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Result of `Storage::upsert_post`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    pub post_id: i64,
}

/// The singleton crawl progress record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub target_url: String,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_processed: u64,
    pub status: CrawlStatus,
    pub updated_at: String,
}

/// Status of the latest crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    Running,
    Completed,
    Stopped,
}

impl CrawlStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
