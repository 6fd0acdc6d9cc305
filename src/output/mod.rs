//! Output module for reporting harvest results
//!
//! This module handles:
//! - Loading store statistics and recent run history
//! - Rendering them for the terminal

pub mod stats;

pub use stats::{load_statistics, print_statistics, render_statistics, HarvestStatistics};
