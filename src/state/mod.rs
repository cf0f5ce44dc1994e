//! State module for tracking crawl progress
//!
//! `CrawlState` is the state machine a single gallery crawl walks through:
//! `Idle -> Paginating -> ProcessingPosts -> (Paginating | Completed)`, with
//! `Stopped` reachable from any active state when an operator asks for it.

mod crawl_state;

pub use crawl_state::CrawlState;
