//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::extract::CommentStub;
use crate::storage::{
    CommentRecord, ImageInsert, ImageRecord, PostData, PostDetailRecord, PostRecord,
    PostSummary, ProgressRecord, UpsertOutcome,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every method that writes runs in a single transaction, so two crawlers
/// sharing a database never observe a half-written post.
pub trait Storage {
    // ===== Posts =====

    /// Inserts a post or refreshes its mutable fields
    ///
    /// Looks the post up by `number`. Absent posts are inserted. Present
    /// posts are compared on views, votes and `comment_count` against the
    /// number of stored comments; if anything differs the title, date,
    /// views, votes and content are overwritten, otherwise nothing is
    /// written. `number` and the author fields are never overwritten.
    fn upsert_post(&mut self, post: &PostData, comment_count: usize)
        -> StorageResult<UpsertOutcome>;

    /// Gets a post by its site-assigned number
    fn get_post_by_number(&self, number: &str) -> StorageResult<Option<PostRecord>>;

    /// Gets a post with its comments and ordered images
    fn get_post(&self, post_id: i64) -> StorageResult<PostDetailRecord>;

    /// Lists posts newest first, 1-based `page`; also returns the total count
    fn list_posts(&self, page: u32, page_size: u32) -> StorageResult<(Vec<PostSummary>, u64)>;

    /// Gets the `limit` newest posts
    fn recent_posts(&self, limit: u32) -> StorageResult<Vec<PostRecord>>;

    /// Gets `(id, date)` for every post, used to select archival candidates
    fn post_dates(&self) -> StorageResult<Vec<(i64, String)>>;

    /// Counts all posts
    fn count_posts(&self) -> StorageResult<u64>;

    /// Removes a post, its comments and its image references in one transaction
    ///
    /// Images owned by the post that other posts still reference are handed
    /// to the earliest such post. Returns the image rows that were deleted.
    fn remove_post(&mut self, post_id: i64) -> StorageResult<Vec<ImageRecord>>;

    // ===== Comments =====

    /// Appends a comment unconditionally and returns its ID
    fn append_comment(&mut self, post_id: i64, comment: &CommentStub) -> StorageResult<i64>;

    /// Appends the comments whose `(author, content, date)` is not stored yet
    ///
    /// Returns the number of rows inserted.
    fn append_new_comments(&mut self, post_id: i64, comments: &[CommentStub])
        -> StorageResult<usize>;

    /// Gets the comments of a post in insertion order
    fn get_comments(&self, post_id: i64) -> StorageResult<Vec<CommentRecord>>;

    /// Counts the comments of a post
    fn count_comments(&self, post_id: i64) -> StorageResult<u64>;

    /// Counts all comments
    fn count_all_comments(&self) -> StorageResult<u64>;

    // ===== Images =====

    /// Looks an image up by content hash
    fn find_image_by_hash(&self, hash: &str) -> StorageResult<Option<ImageRecord>>;

    /// Inserts an index row unless the hash is already indexed
    fn insert_image(&mut self, post_id: i64, file_path: &str, hash: &str)
        -> StorageResult<ImageInsert>;

    /// Replaces the ordered image references of a post
    fn link_post_images(&mut self, post_id: i64, image_ids: &[i64]) -> StorageResult<()>;

    /// Gets the images referenced by a post, in order
    fn get_post_images(&self, post_id: i64) -> StorageResult<Vec<ImageRecord>>;

    /// Gets images owned by the post that no other post references
    fn exclusive_images(&self, post_id: i64) -> StorageResult<Vec<ImageRecord>>;

    /// Counts rows of the image index
    fn count_images(&self) -> StorageResult<u64>;

    // ===== Progress =====

    /// Overwrites the singleton progress record
    fn save_progress(&mut self, progress: &ProgressRecord) -> StorageResult<()>;

    /// Gets the progress record, if a crawl ever ran
    fn get_progress(&self) -> StorageResult<Option<ProgressRecord>>;
}
