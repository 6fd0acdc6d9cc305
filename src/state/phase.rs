/// Controller phase definitions
///
/// A run moves `Idle → FetchingPage → ParsingPage → ProcessingItems → PageDone`
/// once per listing page, and ends in `Stopped`.
use std::fmt;

/// Represents where the controller currently is inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CrawlPhase {
    /// No page has been requested yet
    #[default]
    Idle,

    /// Waiting on the listing page response
    FetchingPage,

    /// Extracting post summaries from the listing markup
    ParsingPage,

    /// Enriching, normalizing and storing posts one by one
    ProcessingItems,

    /// The current page is finished; the next one may start
    PageDone,

    /// The run is over (terminal)
    Stopped,
}

impl CrawlPhase {
    /// Returns true if no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns true if `next` is a legal successor of this phase
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;

        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Idle, FetchingPage) => true,
            (FetchingPage, ParsingPage) => true,
            // A failed fetch skips straight to the next page
            (FetchingPage, PageDone) => true,
            (ParsingPage, ProcessingItems) => true,
            (ParsingPage, PageDone) => true,
            (ProcessingItems, PageDone) => true,
            (PageDone, FetchingPage) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingPage => "fetching_page",
            Self::ParsingPage => "parsing_page",
            Self::ProcessingItems => "processing_items",
            Self::PageDone => "page_done",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
