/// Crawl state definitions for a single gallery run
///
/// This module defines the states the orchestrator moves through and which
/// transitions between them are legal.
use crate::GalleryError;
use std::fmt;

/// Represents the current position of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    /// No listing page has been requested yet
    Idle,

    /// The listing page `page` is being fetched and parsed
    Paginating { page: u32 },

    /// Posts of listing page `page` are being enriched and persisted
    ProcessingPosts { page: u32 },

    /// Every planned page has been visited
    Completed,

    /// An operator asked the run to stop before it finished
    Stopped,
}

impl CrawlState {
    /// Returns true if the run can make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }

    /// Returns true while the run is still walking pages
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// The listing page this state refers to, if any
    pub fn page(&self) -> Option<u32> {
        match self {
            Self::Paginating { page } | Self::ProcessingPosts { page } => Some(*page),
            _ => None,
        }
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    ///
    /// | From | To |
    /// |------|----|
    /// | Idle | Paginating { 1 }, Completed, Stopped |
    /// | Paginating { p } | ProcessingPosts { p }, Paginating { p + 1 }, Completed, Stopped |
    /// | ProcessingPosts { p } | Paginating { p + 1 }, Completed, Stopped |
    /// | Completed, Stopped | nothing |
    ///
    /// `Paginating { p } -> Paginating { p + 1 }` happens when a listing page
    /// cannot be fetched or parsed and is skipped.
    pub fn can_transition_to(&self, next: &CrawlState) -> bool {
        match (self, next) {
            (Self::Idle, Self::Paginating { page }) => *page == 1,
            (Self::Paginating { page: a }, Self::ProcessingPosts { page: b }) => a == b,
            (Self::Paginating { page: a }, Self::Paginating { page: b }) => *b == a + 1,
            (Self::ProcessingPosts { page: a }, Self::Paginating { page: b }) => *b == a + 1,
            (from, Self::Completed | Self::Stopped) => from.is_active(),
            _ => false,
        }
    }

    /// Performs a transition, rejecting illegal moves
    pub fn transition(self, next: CrawlState) -> Result<CrawlState, GalleryError> {
        if self.can_transition_to(&next) {
            Ok(next)
        } else {
            Err(GalleryError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Paginating { page } => write!(f, "paginating(page={})", page),
            Self::ProcessingPosts { page } => write!(f, "processing_posts(page={})", page),
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
