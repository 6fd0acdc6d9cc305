//! State module for tracking run progress
//!
//! # Components
//!
//! - `CrawlPhase`: where the controller is inside one run
//! - `StopReason`: why a run ended

mod phase;
mod stop_reason;

// Re-export main types
pub use phase::CrawlPhase;
pub use stop_reason::StopReason;
