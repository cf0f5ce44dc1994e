//! Extraction of post data from fetched documents
//!
//! Extractors are pure functions over a fetched [`Document`]. They never touch
//! the network or the database: the orchestrator fetches, the extractor maps
//! markup to typed records, and the repositories persist them.
//!
//! Missing optional fields degrade to defaults (`0` for counters, empty string
//! for text) instead of failing the whole row. Listing extraction already
//! applies the minimum post-number floor, so callers receive a filtered
//! sequence in listing order.

mod html;

pub use html::{HtmlExtractor, SiteSelectors};

use crate::ExtractError;
use url::Url;

/// A fetched page
#[derive(Debug, Clone)]
pub struct Document {
    /// Final URL the body was served from, used to resolve relative links
    pub url: Url,

    /// Decoded response body
    pub body: String,
}

impl Document {
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self {
            url,
            body: body.into(),
        }
    }
}

/// Minimal post record read from a listing row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostStub {
    /// Site-assigned post number, always positive
    pub number: u64,
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub author_ip: String,
    /// Site-formatted publish date, kept opaque
    pub date: String,
    pub views: i64,
    pub votes: i64,
    /// `None` when the row links to a script instead of a page
    pub detail_url: Option<Url>,
}

/// An image referenced from a detail page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub url: Url,
    /// Name shown by the site (attachment label or last path segment), may be empty
    pub suggested_filename: String,
}

/// A comment as extracted; it has no stable site identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommentStub {
    pub author: String,
    pub content: String,
    pub date: String,
}

/// Content of a detail page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostDetail {
    pub body_text: String,
    pub image_refs: Vec<ImageRef>,
    pub comment_stubs: Vec<CommentStub>,
    /// Link to the next page of comments, if the comments are paginated
    pub next_comment_page: Option<Url>,
}

/// One page of comments
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommentPage {
    pub comments: Vec<CommentStub>,
    pub next_page: Option<Url>,
}

/// Site-specific mapping from documents to records
///
/// One implementation is chosen per deployment. [`HtmlExtractor`] reads static
/// markup; a browser-driven extractor would implement the same trait.
pub trait Extractor: Send + Sync {
    /// Parses a listing page into stubs numbered at or above `min_post_id`, in listing order
    fn parse_listing(&self, doc: &Document, min_post_id: u64)
        -> Result<Vec<PostStub>, ExtractError>;

    /// Parses a detail page into body text, image references and the first page of comments
    fn parse_detail(&self, doc: &Document) -> Result<PostDetail, ExtractError>;

    /// Parses a follow-up comment page
    fn parse_comments(&self, doc: &Document) -> Result<CommentPage, ExtractError>;
}

/// Removes repeated `(author, content, date)` tuples, keeping first occurrences in order
pub fn dedup_comments(comments: Vec<CommentStub>) -> Vec<CommentStub> {
    let mut seen = std::collections::HashSet::new();
    comments
        .into_iter()
        .filter(|comment| seen.insert(comment.clone()))
        .collect()
}
