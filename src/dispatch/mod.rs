//! Dispatch module for routing records to downstream analysis
//!
//! This module contains:
//! - Trigger rules deciding which records are worth analyzing
//! - The fire-and-forget `AnalysisDispatcher` seam used by the harvester
//! - A queue-backed dispatcher with a retrying worker pool
//! - Redispatch of records that were stored but never analyzed

mod queue;
mod redispatch;
mod trigger;

pub use queue::{
    AnalysisHandler, AnalysisOutcome, DispatchError, DispatchWorkers, LogDispatcher,
    QueueDispatcher, WebhookHandler, WorkerSettings,
};
pub use redispatch::redispatch_pending;
pub use trigger::{TriggerReason, TriggerRules};

/// Hands record ids to the analysis stage
///
/// `dispatch` is one-way and must return without waiting on the analysis
/// itself. Delivery is at-least-once; the analysis stage guards against
/// repeats with the record's `analyzed` flag.
pub trait AnalysisDispatcher: Send + Sync {
    fn dispatch(&self, record_id: &str);
}
