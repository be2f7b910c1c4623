//! Record sources and concurrent runs

use std::sync::Arc;
use tokio::task::JoinSet;

use super::batch::{LoadBatch, LoadOutcome, LoadRun};
use super::loader::BatchLoader;
use crate::status::RunStatus;

/// Supplier of a run's batches in sequence order
///
/// Sources must be able to start again from any sequence number so a run
/// can resume after its last acknowledged batch.
pub trait RecordSource: Send + Sync {
    /// Batches with `seq >= from_seq`, in ascending order
    fn batches_from(&self, from_seq: u64) -> Box<dyn Iterator<Item = LoadBatch> + Send + '_>;
}

impl RecordSource for Vec<LoadBatch> {
    fn batches_from(&self, from_seq: u64) -> Box<dyn Iterator<Item = LoadBatch> + Send + '_> {
        Box::new(
            self.iter()
                .filter(move |batch| batch.seq >= from_seq)
                .cloned(),
        )
    }
}

/// A run together with the batches it loads
pub struct LoadJob {
    pub run: LoadRun,
    pub source: Box<dyn RecordSource>,
}

impl LoadJob {
    pub fn new(run: LoadRun, source: impl RecordSource + 'static) -> Self {
        Self {
            run,
            source: Box::new(source),
        }
    }
}

/// Runs independent load jobs at the same time
///
/// Each job gets its own task; the jobs share only the connection pool, so
/// one job's failure or cancellation never touches another.
#[derive(Clone)]
pub struct LoadEngine {
    loader: Arc<BatchLoader>,
}

impl LoadEngine {
    pub fn new(loader: BatchLoader) -> Self {
        Self {
            loader: Arc::new(loader),
        }
    }

    pub fn loader(&self) -> &BatchLoader {
        &self.loader
    }

    /// Run every job to completion and return outcomes in job order
    pub async fn run_concurrently(&self, jobs: Vec<LoadJob>) -> Vec<LoadOutcome> {
        let run_ids: Vec<String> = jobs.iter().map(|job| job.run.run_id.clone()).collect();
        let mut outcomes: Vec<Option<LoadOutcome>> = vec![None; jobs.len()];

        let mut tasks = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let loader = Arc::clone(&self.loader);
            tasks.spawn(async move {
                let LoadJob { mut run, source } = job;
                let outcome = loader.load(&mut run, source.batches_from(0)).await;
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::error!("Load task ended abnormally: {}", e),
            }
        }

        outcomes
            .into_iter()
            .zip(run_ids)
            .map(|(outcome, run_id)| {
                outcome.unwrap_or_else(|| {
                    LoadOutcome::aborted(
                        &run_id,
                        RunStatus::Failed,
                        "load task ended abnormally".to_string(),
                    )
                })
            })
            .collect()
    }
}
