//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::storage::{PostRecord, ProgressRecord, Storage};
use crate::GalleryError;

/// Number of newest posts listed in the statistics
const RECENT_POSTS: u32 = 5;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub total_posts: u64,
    pub total_comments: u64,

    /// Distinct image files in the index
    pub total_images: u64,

    /// Latest progress record, if a crawl ever ran
    pub progress: Option<ProgressRecord>,

    /// Newest posts by number
    pub recent_posts: Vec<PostRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(GalleryError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics, GalleryError> {
    Ok(CrawlStatistics {
        total_posts: storage.count_posts()?,
        total_comments: storage.count_all_comments()?,
        total_images: storage.count_images()?,
        progress: storage.get_progress()?,
        recent_posts: storage.recent_posts(RECENT_POSTS)?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Posts: {}", stats.total_posts);
    println!("  Comments: {}", stats.total_comments);
    println!("  Stored images: {}", stats.total_images);
    println!();

    match &stats.progress {
        Some(progress) => {
            let percentage = if progress.total_pages > 0 {
                (progress.current_page as f64 / progress.total_pages as f64) * 100.0
            } else {
                0.0
            };
            println!("Last Crawl:");
            println!("  Target: {}", progress.target_url);
            println!("  Status: {}", progress.status);
            println!(
                "  Pages: {} / {} ({:.1}%)",
                progress.current_page, progress.total_pages, percentage
            );
            println!("  Posts processed: {}", progress.total_processed);
            println!("  Updated at: {}", progress.updated_at);
        }
        None => println!("No crawl has run yet."),
    }
    println!();

    if !stats.recent_posts.is_empty() {
        println!("Recent Posts:");
        for post in &stats.recent_posts {
            println!(
                "  #{} {} ({}, {} views, {} votes)",
                post.number, post.title, post.author, post.views, post.votes
            );
        }
    }
}
