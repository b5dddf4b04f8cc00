//! Bounded hand-off between the HTTP layer and the pipeline.
//!
//! The webhook handler only enqueues; a single pool task pulls jobs and runs at
//! most `workers` of them at a time. Every outcome, error, and panic is logged
//! here and nowhere else.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::pipeline::{Orchestrator, Outcome, PipelineError};
use crate::webhook::{EventKind, InboundEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Work queue is full")]
    QueueFull,

    #[error("Work queue is closed")]
    Closed,
}

/// One accepted delivery.
#[derive(Debug)]
pub struct Job {
    /// `X-GitHub-Delivery`, for correlating logs
    pub delivery: String,
    pub kind: EventKind,
    pub event: InboundEvent,
}

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: &InboundEvent) -> Result<Outcome, PipelineError>;
}

#[async_trait]
impl EventHandler for Orchestrator {
    async fn handle(&self, event: &InboundEvent) -> Result<Outcome, PipelineError> {
        Orchestrator::handle(self, event).await
    }
}

/// Sending half of the queue; cheap to clone into request handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
}

impl Dispatcher {
    /// A queue holding at most `capacity` pending jobs.
    pub fn bounded(capacity: usize) -> (Dispatcher, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Dispatcher { tx }, rx)
    }

    /// Enqueue without waiting; a full queue is refused rather than buffered.
    pub fn submit(&self, job: Job) -> Result<(), DispatchError> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => {
                warn!(delivery = %job.delivery, "work queue full, dropping delivery");
                DispatchError::QueueFull
            }
            TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

/// The running pool. Ends once every [`Dispatcher`] is dropped and the queue
/// is drained.
pub struct WorkerPool {
    handle: JoinHandle<()>,
}

impl WorkerPool {
    pub fn start(
        rx: mpsc::Receiver<Job>,
        handler: Arc<dyn EventHandler>,
        workers: usize,
    ) -> WorkerPool {
        let handle = tokio::spawn(run_pool(rx, handler, workers.max(1)));
        WorkerPool { handle }
    }

    /// Wait up to `grace` for queued and in-flight jobs. Returns false if the
    /// grace period ran out first.
    pub async fn drain(self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "worker pool terminated abnormally");
                true
            }
            Err(_) => false,
        }
    }
}

async fn run_pool(mut rx: mpsc::Receiver<Job>, handler: Arc<dyn EventHandler>, workers: usize) {
    let limit = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();
    info!(workers, "worker pool started");

    while let Some(job) = rx.recv().await {
        let Ok(permit) = limit.clone().acquire_owned().await else {
            break;
        };
        // reap finished tasks so the set does not grow without bound
        while running.try_join_next().is_some() {}

        let handler = handler.clone();
        let span = info_span!("job", delivery = %job.delivery, kind = %job.kind);
        running.spawn(
            async move {
                let _permit = permit;
                let event = job.event;
                // inner task so a panicking pipeline surfaces as a JoinError
                let result = tokio::spawn(async move { handler.handle(&event).await }).await;
                log_completion(result);
            }
            .instrument(span),
        );
    }

    debug!(in_flight = running.len(), "queue closed, waiting for in-flight jobs");
    while running.join_next().await.is_some() {}
    info!("worker pool stopped");
}

fn log_completion(result: Result<Result<Outcome, PipelineError>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(Outcome::Skipped(reason))) => debug!(%reason, "event skipped"),
        Ok(Ok(outcome)) => info!(?outcome, "event processed"),
        Ok(Err(e)) => error!(kind = e.kind(), error = %e, "pipeline failed"),
        Err(e) if e.is_panic() => error!(error = %e, "pipeline panicked"),
        Err(e) => warn!(error = %e, "pipeline cancelled"),
    }
}
