//! Background crawl jobs and the read interface
//!
//! `CrawlService` is the handle an admin or web layer holds: it starts at most
//! one crawl at a time on the tokio runtime, lets callers poll progress or ask
//! for a stop, and answers read queries against the same store.

use crate::config::Config;
use crate::crawler::{Coordinator, CrawlSummary, StopSignal};
use crate::extract::Extractor;
use crate::storage::{
    PostDetailRecord, PostRecord, PostSummary, ProgressRecord, SqliteStorage, Storage,
};
use crate::GalleryError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use url::Url;

/// A crawl that was accepted and is running in the background
#[derive(Debug)]
pub struct JobAccepted {
    pub target_url: Url,
    pub handle: JoinHandle<Result<CrawlSummary, GalleryError>>,
}

/// Clears the running flag when the job ends, even if it panics
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CrawlService {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    extractor: Arc<dyn Extractor>,
    stop: StopSignal,
    running: Arc<AtomicBool>,
}

impl CrawlService {
    pub fn new(
        config: Config,
        storage: Arc<Mutex<SqliteStorage>>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            extractor,
            stop: StopSignal::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts a crawl of `target_url` in the background
    ///
    /// The configured gallery settings apply except for the base URL.
    /// Must be called from within a tokio runtime.
    ///
    /// # Returns
    ///
    /// * `Ok(JobAccepted)` - The job was spawned
    /// * `Err(GalleryError::CrawlInProgress)` - Another crawl is still running
    /// * `Err(GalleryError)` - The URL or the crawler setup is invalid
    pub fn start_crawl(&self, target_url: &str) -> Result<JobAccepted, GalleryError> {
        let target = Url::parse(target_url)?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(GalleryError::CrawlInProgress);
        }
        let guard = RunningGuard(Arc::clone(&self.running));

        let mut config = (*self.config).clone();
        config.gallery.base_url = target.to_string();

        self.stop.reset();
        let mut coordinator = Coordinator::new(
            config,
            Arc::clone(&self.storage),
            Arc::clone(&self.extractor),
            self.stop.clone(),
        )?;

        tracing::info!("Accepted crawl job for {}", target);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let result = coordinator.run().await;
            if let Err(e) = &result {
                tracing::error!("Crawl job failed: {}", e);
            }
            result
        });

        Ok(JobAccepted {
            target_url: target,
            handle,
        })
    }

    /// Returns true while a background crawl is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks the running crawl, if any, to stop at the next post boundary
    pub fn request_stop(&self) {
        if self.is_running() {
            tracing::info!("Stop requested");
            self.stop.request_stop();
        }
    }

    pub fn get_progress(&self) -> Result<Option<ProgressRecord>, GalleryError> {
        Ok(self.storage.lock().unwrap().get_progress()?)
    }

    pub fn list_posts(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<PostSummary>, u64), GalleryError> {
        Ok(self.storage.lock().unwrap().list_posts(page, page_size)?)
    }

    pub fn get_post(&self, post_id: i64) -> Result<PostDetailRecord, GalleryError> {
        Ok(self.storage.lock().unwrap().get_post(post_id)?)
    }

    pub fn recent_posts(&self, limit: u32) -> Result<Vec<PostRecord>, GalleryError> {
        Ok(self.storage.lock().unwrap().recent_posts(limit)?)
    }
}
