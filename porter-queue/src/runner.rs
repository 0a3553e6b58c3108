//! Bounded batch processing.

use crate::error::QueueResult;
use crate::worker::{JobOutcome, Worker};
use porter_config::WorkerSettings;
use porter_log::info;
use serde::Serialize;

/// Outcome of one [`BatchRunner::run_batch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed_count: usize,
    pub results: Vec<JobOutcome>,
}

impl BatchReport {
    pub fn completed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_completed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, JobOutcome::Failed { .. }))
            .count()
    }

    pub fn dead_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_dead()).count()
    }
}

/// Drains up to N jobs sequentially per invocation.
///
/// Meant to be driven by an external trigger (cron, a timer, a request);
/// the runner itself never sleeps or polls.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    worker: Worker,
    default_batch_size: usize,
}

impl BatchRunner {
    pub fn new(worker: Worker) -> Self {
        Self {
            worker,
            default_batch_size: WorkerSettings::default().batch_size,
        }
    }

    pub fn from_settings(worker: Worker, settings: &WorkerSettings) -> Self {
        Self::new(worker).with_batch_size(settings.batch_size)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size;
        self
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Process at most `batch_size` jobs, stopping at the first empty claim.
    ///
    /// Handler failures are part of the report. A store error aborts the
    /// batch and is returned.
    pub async fn run_batch(&self, batch_size: usize, queue: Option<&str>) -> QueueResult<BatchReport> {
        let mut report = BatchReport::default();

        for _ in 0..batch_size {
            match self.worker.process_next(queue).await? {
                Some(outcome) => {
                    report.processed_count += 1;
                    report.results.push(outcome);
                }
                None => break,
            }
        }

        if report.processed_count > 0 {
            info!(
                "Batch finished";
                worker = self.worker.id(),
                processed = report.processed_count,
                completed = report.completed_count(),
                failed = report.failed_count(),
                dead = report.dead_count()
            );
        }
        Ok(report)
    }

    /// [`run_batch`](Self::run_batch) with the configured batch size.
    pub async fn run_default(&self, queue: Option<&str>) -> QueueResult<BatchReport> {
        self.run_batch(self.default_batch_size, queue).await
    }
}
