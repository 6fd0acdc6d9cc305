//! Queue-backed dispatch with a worker pool
//!
//! `QueueDispatcher::dispatch` only pushes the record id onto an unbounded
//! channel. Workers pull ids, skip records that are already analyzed, call
//! the `AnalysisHandler` with bounded retries and exponential backoff, and
//! mark successful records as analyzed.

use crate::config::DispatchConfig;
use crate::dispatch::AnalysisDispatcher;
use crate::record::CanonicalRecord;
use crate::storage::{RecordStore, StoreError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors raised while analyzing a dispatched record
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Analysis request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analysis endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of a successful analysis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisOutcome {
    /// Identifier of the analysis result, stored as the record's `analysis_ref`
    pub analysis_ref: Option<String>,
}

/// Performs the analysis of one record
#[async_trait]
pub trait AnalysisHandler: Send + Sync {
    async fn analyze(&self, record: &CanonicalRecord) -> Result<AnalysisOutcome, DispatchError>;
}

/// Worker pool sizing and retry behaviour
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub workers: usize,

    /// Total attempts per record, including the first
    pub max_attempts: u32,

    /// Pause after the first failure; doubled after each further failure
    pub base_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
        }
    }
}

impl From<&DispatchConfig> for WorkerSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            workers: config.workers as usize,
            max_attempts: config.max_retries,
            base_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

/// Dispatcher that enqueues record ids for the worker pool
#[derive(Debug, Clone)]
pub struct QueueDispatcher {
    sender: mpsc::UnboundedSender<String>,
}

/// Handles to the running workers
///
/// Workers exit once every `QueueDispatcher` clone is dropped and the queue
/// is drained, or as soon as the cancellation token fires.
pub struct DispatchWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl DispatchWorkers {
    /// Waits for every worker to exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Dispatch worker panicked");
            }
        }
    }
}

impl QueueDispatcher {
    /// Starts the worker pool and returns the dispatcher feeding it
    pub fn spawn(
        store: Arc<dyn RecordStore>,
        handler: Arc<dyn AnalysisHandler>,
        settings: WorkerSettings,
        cancel: CancellationToken,
    ) -> (Self, DispatchWorkers) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let worker_count = settings.workers.max(1);

        tracing::info!(
            workers = worker_count,
            max_attempts = settings.max_attempts,
            "Starting dispatch workers"
        );

        let handles = (0..worker_count)
            .map(|worker| {
                let worker = Worker {
                    id: worker,
                    store: Arc::clone(&store),
                    handler: Arc::clone(&handler),
                    settings: settings.clone(),
                    receiver: Arc::clone(&receiver),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        (Self { sender }, DispatchWorkers { handles })
    }
}

impl AnalysisDispatcher for QueueDispatcher {
    fn dispatch(&self, record_id: &str) {
        if self.sender.send(record_id.to_string()).is_err() {
            // Record stays unanalyzed; a redispatch picks it up later
            tracing::warn!(record_id, "Dispatch queue closed, record not queued");
        }
    }
}

/// What happened to one dispatched id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Analyzed,
    AlreadyAnalyzed,
    Missing,
    Failed,
    Cancelled,
}

struct Worker {
    id: usize,
    store: Arc<dyn RecordStore>,
    handler: Arc<dyn AnalysisHandler>,
    settings: WorkerSettings,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    id = receiver.recv() => id,
                }
            };

            let Some(record_id) = next else {
                break;
            };

            let outcome = self.process(&record_id).await;
            tracing::debug!(
                worker = self.id,
                record_id = %record_id,
                ?outcome,
                "Dispatch job finished"
            );
        }

        tracing::debug!(worker = self.id, "Dispatch worker stopped");
    }

    async fn process(&self, record_id: &str) -> JobOutcome {
        let record = match self.store.get(record_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(record_id, "Dispatched record not found in store");
                return JobOutcome::Missing;
            }
            Err(e) => {
                tracing::error!(record_id, error = %e, "Failed to load dispatched record");
                return JobOutcome::Failed;
            }
        };

        if record.analyzed {
            tracing::debug!(record_id, "Record already analyzed, skipping");
            return JobOutcome::AlreadyAnalyzed;
        }

        let attempts = self.settings.max_attempts.max(1);
        let mut delay = self.settings.base_delay;

        for attempt in 1..=attempts {
            match self.handler.analyze(&record).await {
                Ok(outcome) => {
                    return match self
                        .store
                        .mark_analyzed(record_id, outcome.analysis_ref.as_deref())
                    {
                        Ok(_) => {
                            tracing::info!(record_id, attempt, "Record analyzed");
                            JobOutcome::Analyzed
                        }
                        Err(e) => {
                            tracing::error!(
                                record_id,
                                error = %e,
                                "Failed to mark record analyzed"
                            );
                            JobOutcome::Failed
                        }
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        record_id,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Analysis attempt failed"
                    );
                    if attempt < attempts {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return JobOutcome::Cancelled,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        tracing::error!(record_id, attempts, "Giving up on analysis");
        JobOutcome::Failed
    }
}

/// Posts records as JSON to an analysis service
///
/// The service may answer with `{"analysis_id": "..."}`; any other 2xx body
/// is accepted without a reference.
pub struct WebhookHandler {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    analysis_id: Option<serde_json::Value>,
}

impl WebhookHandler {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AnalysisHandler for WebhookHandler {
    async fn analyze(&self, record: &CanonicalRecord) -> Result<AnalysisOutcome, DispatchError> {
        let response = self.client.post(&self.endpoint).json(record).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let analysis_ref = serde_json::from_str::<WebhookResponse>(&body)
            .ok()
            .and_then(|r| r.analysis_id)
            .and_then(|id| match id {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Ok(AnalysisOutcome { analysis_ref })
    }
}

/// Dispatcher used when no analysis endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl AnalysisDispatcher for LogDispatcher {
    fn dispatch(&self, record_id: &str) {
        tracing::info!(record_id, "No analysis endpoint configured, record left for later");
    }
}
