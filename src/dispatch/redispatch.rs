//! Redispatch of stored records that never reached analysis

use crate::dispatch::{AnalysisDispatcher, TriggerRules};
use crate::storage::{KeywordSource, RecordStore, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Re-evaluates unanalyzed records ingested since `cutoff` and dispatches hits
///
/// Covers records whose dispatch was lost (process exit, closed queue, or a
/// keyword added after they were stored). Returns the number dispatched.
pub fn redispatch_pending(
    store: &dyn RecordStore,
    keywords: &dyn KeywordSource,
    rules: &TriggerRules,
    dispatcher: &dyn AnalysisDispatcher,
    cutoff: DateTime<Utc>,
) -> StoreResult<usize> {
    let pending = store.unanalyzed_since(cutoff)?;
    tracing::info!(pending = pending.len(), %cutoff, "Re-evaluating unanalyzed records");

    let mut dispatched = 0;
    for record in &pending {
        let current = keywords.list_keywords().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Keyword source unavailable, matching without keywords");
            BTreeSet::new()
        });

        if let Some(reason) = rules.evaluate(record, &current) {
            tracing::debug!(record_id = %record.natural_key, %reason, "Redispatching record");
            dispatcher.dispatch(&record.natural_key);
            dispatched += 1;
        }
    }

    tracing::info!(dispatched, "Redispatch complete");
    Ok(dispatched)
}
