//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop for one gallery, including:
//! - Walking listing pages 1..=max-pages
//! - Enriching every stub with its detail page and comment pages
//! - Storing images, upserting posts and appending comments
//! - Randomized politeness delays between posts
//! - Persisting the progress record after every page
//! - Honouring a cooperative stop signal between posts and pages
//!
//! A failure on one post is logged and skipped. The only error that aborts a
//! run is a failure to persist progress.

use crate::config::{Config, RequestConfig};
use crate::crawler::Fetcher;
use crate::extract::{
    dedup_comments, CommentPage, CommentStub, Extractor, HtmlExtractor, PostDetail, PostStub,
};
use crate::images::ImageStore;
use crate::state::CrawlState;
use crate::storage::{
    open_storage, CrawlStatus, PostData, ProgressRecord, SqliteStorage, Storage, UpsertAction,
    UpsertOutcome,
};
use crate::GalleryError;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Cooperative stop flag shared between a running crawl and its controller
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the crawl to stop at the next post or page boundary
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears a previous request so the signal can be reused for a new run
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Counters for one crawl run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Listing pages fully processed
    pub pages_visited: u32,
    /// Posts that made it through the pipeline, whatever the upsert did
    pub total_processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Posts skipped because of an error
    pub failed: u64,
    pub status: CrawlStatus,
}

impl CrawlSummary {
    fn new() -> Self {
        Self {
            pages_visited: 0,
            total_processed: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            status: CrawlStatus::Running,
        }
    }

    fn record(&mut self, action: UpsertAction) {
        self.total_processed += 1;
        match action {
            UpsertAction::Inserted => self.inserted += 1,
            UpsertAction::Updated => self.updated += 1,
            UpsertAction::Unchanged => self.unchanged += 1,
        }
    }
}

/// A post that went through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedPost {
    pub number: u64,
    pub post_id: i64,
    pub action: UpsertAction,
    pub images_linked: usize,
    pub comments_added: usize,
}

/// Outcome of one listing page
#[derive(Debug, Clone)]
pub struct PageReport {
    pub page: u32,
    /// Processed posts, newest (highest number) first
    pub posts: Vec<ProcessedPost>,
    /// True when a stop request cut the page short
    pub interrupted: bool,
}

/// Pipeline step a post failed in, used as a log field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Detail,
    Extract,
    Upsert,
    Images,
    Comments,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detail => "detail",
            Self::Extract => "extract",
            Self::Upsert => "upsert",
            Self::Images => "images",
            Self::Comments => "comments",
        };
        write!(f, "{}", name)
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    base_url: Url,
    gallery_id: String,
    storage: Arc<Mutex<SqliteStorage>>,
    extractor: Arc<dyn Extractor>,
    fetcher: Fetcher,
    images: ImageStore,
    stop: StopSignal,
    state: CrawlState,
    summary: CrawlSummary,
}

impl Coordinator {
    /// Creates a coordinator over an already opened store
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `storage` - Shared store handle
    /// * `extractor` - Site-specific extractor
    /// * `stop` - Signal checked between posts and pages
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(GalleryError)` - Invalid base URL, HTTP client or images directory
    pub fn new(
        config: Config,
        storage: Arc<Mutex<SqliteStorage>>,
        extractor: Arc<dyn Extractor>,
        stop: StopSignal,
    ) -> Result<Self, GalleryError> {
        let base_url = Url::parse(&config.gallery.base_url)?;
        let gallery_id = gallery_id(&base_url);
        let fetcher = Fetcher::new(&config.request)?;
        let images = ImageStore::new(&config.output.images_dir)?;

        Ok(Self {
            config: Arc::new(config),
            base_url,
            gallery_id,
            storage,
            extractor,
            fetcher,
            images,
            stop,
            state: CrawlState::Idle,
            summary: CrawlSummary::new(),
        })
    }

    /// Opens the configured database and uses the static HTML extractor
    pub fn open(config: Config, stop: StopSignal) -> Result<Self, GalleryError> {
        let storage = open_storage(Path::new(&config.output.database_path))?;
        Self::new(
            config,
            Arc::new(Mutex::new(storage)),
            Arc::new(HtmlExtractor::default()),
            stop,
        )
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn summary(&self) -> &CrawlSummary {
        &self.summary
    }

    pub fn storage(&self) -> Arc<Mutex<SqliteStorage>> {
        Arc::clone(&self.storage)
    }

    /// Runs the crawl over every configured listing page
    ///
    /// Progress is written once at the start, after each completed page,
    /// and once more with the final status.
    pub async fn run(&mut self) -> Result<CrawlSummary, GalleryError> {
        let total_pages = self.config.gallery.max_pages;
        tracing::info!(
            gallery = %self.gallery_id,
            "Starting crawl of {} ({} pages, floor {})",
            self.base_url,
            total_pages,
            self.config.gallery.min_post_id
        );

        let mut completed_page = 0;
        let mut stopped_early = false;
        self.save_progress(completed_page, CrawlStatus::Running)?;

        for page in 1..=total_pages {
            if self.stop.is_stop_requested() {
                stopped_early = true;
                break;
            }

            match self.crawl_page(page).await {
                Ok(report) if report.interrupted => {
                    stopped_early = true;
                    break;
                }
                Ok(report) => {
                    tracing::info!(
                        gallery = %self.gallery_id,
                        "Page {}/{} done: {} posts processed",
                        page,
                        total_pages,
                        report.posts.len()
                    );
                }
                Err(e @ GalleryError::InvalidTransition { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(gallery = %self.gallery_id, "Skipping listing page {}: {}", page, e);
                }
            }

            completed_page = page;
            self.summary.pages_visited += 1;
            self.save_progress(completed_page, CrawlStatus::Running)?;
        }

        // A stop raised after the last post of the last page changes nothing
        let (final_state, status) = if stopped_early {
            (CrawlState::Stopped, CrawlStatus::Stopped)
        } else {
            (CrawlState::Completed, CrawlStatus::Completed)
        };
        self.state = self.state.transition(final_state)?;
        self.summary.status = status;
        self.save_progress(completed_page, status)?;

        tracing::info!(
            gallery = %self.gallery_id,
            "Crawl {}: {} processed ({} inserted, {} updated, {} unchanged, {} failed)",
            status,
            self.summary.total_processed,
            self.summary.inserted,
            self.summary.updated,
            self.summary.unchanged,
            self.summary.failed
        );

        Ok(self.summary.clone())
    }

    /// Fetches one listing page and processes its posts in listing order
    ///
    /// The returned posts are sorted by number, highest first.
    pub async fn crawl_page(&mut self, page: u32) -> Result<PageReport, GalleryError> {
        self.state = self.state.transition(CrawlState::Paginating { page })?;

        let url = page_url(&self.base_url, page);
        let doc = self.fetcher.fetch(&url).await?;
        let stubs = self
            .extractor
            .parse_listing(&doc, self.config.gallery.min_post_id)?;

        self.state = self.state.transition(CrawlState::ProcessingPosts { page })?;
        tracing::debug!(gallery = %self.gallery_id, "Page {} lists {} posts", page, stubs.len());

        let mut posts = Vec::with_capacity(stubs.len());
        let mut interrupted = false;

        for stub in &stubs {
            if self.stop.is_stop_requested() {
                tracing::info!(gallery = %self.gallery_id, "Stop requested, leaving page {}", page);
                interrupted = true;
                break;
            }

            match self.process_post(stub).await {
                Ok(processed) => {
                    tracing::info!(
                        gallery = %self.gallery_id,
                        post = stub.number,
                        "Post {} {}",
                        stub.number,
                        processed.action
                    );
                    self.summary.record(processed.action);
                    posts.push(processed);
                }
                Err((stage, e)) => {
                    self.summary.failed += 1;
                    tracing::warn!(
                        gallery = %self.gallery_id,
                        post = stub.number,
                        stage = %stage,
                        "Skipping post: {}",
                        e
                    );
                }
            }

            let delay = jitter_delay(&self.config.request);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        posts.sort_by(|a, b| b.number.cmp(&a.number));

        Ok(PageReport {
            page,
            posts,
            interrupted,
        })
    }

    async fn process_post(&self, stub: &PostStub) -> Result<ProcessedPost, (Stage, GalleryError)> {
        let (detail, comments) = match &stub.detail_url {
            Some(url) => self.fetch_detail(stub, url).await?,
            None => {
                tracing::debug!(post = stub.number, "No detail link, storing listing fields only");
                (PostDetail::default(), Vec::new())
            }
        };

        let comments = dedup_comments(comments);
        let data = PostData::from_stub(stub, detail.body_text.clone());

        let outcome = self
            .storage
            .lock()
            .unwrap()
            .upsert_post(&data, comments.len())
            .map_err(|e| (Stage::Upsert, GalleryError::from(e)))?;

        let mut processed = ProcessedPost {
            number: stub.number,
            post_id: outcome.post_id,
            action: outcome.action,
            images_linked: 0,
            comments_added: 0,
        };

        if outcome.action == UpsertAction::Unchanged {
            return Ok(processed);
        }

        processed.images_linked = self.store_images(stub, outcome, &detail).await?;

        processed.comments_added = self
            .storage
            .lock()
            .unwrap()
            .append_new_comments(outcome.post_id, &comments)
            .map_err(|e| (Stage::Comments, GalleryError::from(e)))?;

        Ok(processed)
    }

    /// Fetches the detail page and every linked comment page
    async fn fetch_detail(
        &self,
        stub: &PostStub,
        url: &Url,
    ) -> Result<(PostDetail, Vec<CommentStub>), (Stage, GalleryError)> {
        let doc = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| (Stage::Detail, GalleryError::from(e)))?;

        let mut detail = self
            .extractor
            .parse_detail(&doc)
            .map_err(|e| (Stage::Extract, GalleryError::from(e)))?;

        let mut comments = std::mem::take(&mut detail.comment_stubs);
        let mut visited: HashSet<Url> = HashSet::new();
        visited.insert(url.clone());
        visited.insert(doc.url.clone());

        let mut next = detail.next_comment_page.take();
        while let Some(comment_url) = next {
            if !visited.insert(comment_url.clone()) {
                break;
            }

            match self.fetch_comment_page(&comment_url).await {
                Ok(page) => {
                    tracing::debug!(
                        post = stub.number,
                        "Comment page {} has {} comments",
                        comment_url,
                        page.comments.len()
                    );
                    comments.extend(page.comments);
                    next = page.next_page;
                }
                Err(e) => {
                    tracing::warn!(
                        gallery = %self.gallery_id,
                        post = stub.number,
                        stage = %Stage::Comments,
                        "Stopping comment pagination: {}",
                        e
                    );
                    next = None;
                }
            }
        }

        Ok((detail, comments))
    }

    async fn fetch_comment_page(
        &self,
        url: &Url,
    ) -> Result<CommentPage, GalleryError> {
        let doc = self.fetcher.fetch(url).await?;
        Ok(self.extractor.parse_comments(&doc)?)
    }

    /// Stores the images of a post and records their order
    ///
    /// Images are only fetched for new posts, or for updated posts that have
    /// none linked yet. A failed image is left out of the list.
    async fn store_images(
        &self,
        stub: &PostStub,
        outcome: UpsertOutcome,
        detail: &PostDetail,
    ) -> Result<usize, (Stage, GalleryError)> {
        if detail.image_refs.is_empty() {
            return Ok(0);
        }

        if outcome.action == UpsertAction::Updated {
            let linked = self
                .storage
                .lock()
                .unwrap()
                .get_post_images(outcome.post_id)
                .map_err(|e| (Stage::Images, GalleryError::from(e)))?;
            if !linked.is_empty() {
                return Ok(linked.len());
            }
        }

        let mut image_ids: Vec<i64> = Vec::with_capacity(detail.image_refs.len());
        for (position, image) in detail.image_refs.iter().enumerate() {
            let stored = self
                .images
                .store(
                    &self.fetcher,
                    &self.storage,
                    outcome.post_id,
                    stub.number,
                    position + 1,
                    image,
                )
                .await;

            match stored {
                Ok(stored) => {
                    if stored.deduplicated {
                        tracing::debug!(post = stub.number, "Image {} reuses {}", image.url, stored.hash);
                    }
                    if !image_ids.contains(&stored.image_id) {
                        image_ids.push(stored.image_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        gallery = %self.gallery_id,
                        post = stub.number,
                        stage = %Stage::Images,
                        "Leaving out image {}: {}",
                        image.url,
                        e
                    );
                }
            }
        }

        self.storage
            .lock()
            .unwrap()
            .link_post_images(outcome.post_id, &image_ids)
            .map_err(|e| (Stage::Images, GalleryError::from(e)))?;

        Ok(image_ids.len())
    }

    fn save_progress(&self, current_page: u32, status: CrawlStatus) -> Result<(), GalleryError> {
        let progress = ProgressRecord {
            target_url: self.base_url.to_string(),
            current_page,
            total_pages: self.config.gallery.max_pages,
            total_processed: self.summary.total_processed,
            status,
            updated_at: String::new(),
        };

        if let Err(e) = self.storage.lock().unwrap().save_progress(&progress) {
            tracing::error!(gallery = %self.gallery_id, "Failed to save progress: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Builds the URL of a listing page by setting its `page` query parameter
pub fn page_url(base: &Url, page: u32) -> Url {
    let pairs: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("page", &page.to_string());
    url
}

/// The gallery identifier used in log fields: the `id` query parameter, or the host
fn gallery_id(base: &Url) -> String {
    base.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .or_else(|| base.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Picks a delay uniformly from the configured range
fn jitter_delay(config: &RequestConfig) -> Duration {
    if config.delay_max_ms == 0 {
        return Duration::ZERO;
    }
    let low = config.delay_min_ms.min(config.delay_max_ms);
    let millis = rand::thread_rng().gen_range(low..=config.delay_max_ms);
    Duration::from_millis(millis)
}
