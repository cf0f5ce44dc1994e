//! Crawler module for gallery fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with a minimum request interval
//! - The per-gallery crawl loop and its progress bookkeeping
//! - Background crawl jobs and the read interface

mod coordinator;
mod fetcher;
mod service;

pub use coordinator::{
    page_url, Coordinator, CrawlSummary, PageReport, ProcessedPost, StopSignal,
};
pub use fetcher::{build_http_client, Fetcher};
pub use service::{CrawlService, JobAccepted};

use crate::config::Config;
use crate::GalleryError;

/// Runs a complete crawl with the configured database and the static HTML extractor
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `stop` - Signal the caller can raise to end the crawl early
///
/// # Returns
///
/// * `Ok(CrawlSummary)` - Crawl finished or stopped cleanly
/// * `Err(GalleryError)` - Setup failed or progress could not be saved
pub async fn crawl(config: Config, stop: StopSignal) -> Result<CrawlSummary, GalleryError> {
    let mut coordinator = Coordinator::open(config, stop)?;
    coordinator.run().await
}
