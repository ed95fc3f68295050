//! Batch retrieval of experiment documents.
//!
//! Each accession runs the full fetch, normalize, flatten and filter pipeline
//! on its own. A failing accession is dropped from the aggregate table and
//! never fails the batch; [`fetch_batch_detailed`] additionally reports which
//! accessions were dropped and why.

use std::thread;
use std::time::Instant;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::EncodeClient;
use crate::domain::Dispatch;
use crate::error::EncodeError;
use crate::filters::TableFilter;
use crate::normalize::{ResultTable, to_table};
use crate::query::BiosampleQuery;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub dispatch: Dispatch,
    pub filter: TableFilter,
    /// Upper bound on worker threads; defaults to the available parallelism.
    pub workers: Option<usize>,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub accession: String,
    pub error: EncodeError,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub table: ResultTable,
    pub failures: Vec<BatchFailure>,
}

/// Fetches one experiment and returns its filtered rows. Errors surface to the caller.
pub fn fetch_sample_table<C: EncodeClient>(
    client: &C,
    accession: &str,
    filter: &TableFilter,
) -> Result<ResultTable, EncodeError> {
    let query = BiosampleQuery::new(accession)?;
    let raw = client.fetch(&query.path(), &query.parameters())?;
    if is_empty_document(&raw) {
        return Err(EncodeError::EmptyResponse(accession.to_string()));
    }
    Ok(filter.apply(to_table(raw)))
}

fn is_empty_document(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Aggregate rows of every accession that succeeded; failures are dropped.
pub fn fetch_batch<C, S>(
    client: &C,
    accessions: &[S],
    options: &BatchOptions,
) -> Result<ResultTable, EncodeError>
where
    C: EncodeClient,
    S: AsRef<str> + Sync,
{
    Ok(fetch_batch_detailed(client, accessions, options)?.table)
}

pub fn fetch_batch_detailed<C, S>(
    client: &C,
    accessions: &[S],
    options: &BatchOptions,
) -> Result<BatchOutcome, EncodeError>
where
    C: EncodeClient,
    S: AsRef<str> + Sync,
{
    if accessions.is_empty() {
        return Err(EncodeError::EmptyBatch);
    }

    let start = Instant::now();
    let results = match options.dispatch {
        Dispatch::Sequential => run_sequential(client, accessions, &options.filter),
        Dispatch::Parallel => {
            let workers = worker_count(options.workers, accessions.len());
            run_parallel(client, accessions, &options.filter, workers)?
        }
    };

    let mut outcome = BatchOutcome::default();
    for (index, result) in results {
        let accession = accessions[index].as_ref();
        match result {
            Ok(table) => outcome.table.append(table),
            Err(error) => {
                warn!(accession, error = %error, "batch.drop");
                outcome.failures.push(BatchFailure {
                    accession: accession.to_string(),
                    error,
                });
            }
        }
    }

    info!(
        dispatch = %options.dispatch,
        accessions = accessions.len(),
        rows = outcome.table.len(),
        dropped = outcome.failures.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "batch.done"
    );
    Ok(outcome)
}

pub fn worker_count(limit: Option<usize>, jobs: usize) -> usize {
    let available = thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    limit.unwrap_or(available).min(jobs).max(1)
}

type IndexedResult = (usize, Result<ResultTable, EncodeError>);

fn run_sequential<C, S>(client: &C, accessions: &[S], filter: &TableFilter) -> Vec<IndexedResult>
where
    C: EncodeClient,
    S: AsRef<str>,
{
    accessions
        .iter()
        .enumerate()
        .map(|(index, accession)| {
            (
                index,
                fetch_sample_table(client, accession.as_ref(), filter),
            )
        })
        .collect()
}

// Dedicated pool sized to the batch; indexed collection keeps input order.
fn run_parallel<C, S>(
    client: &C,
    accessions: &[S],
    filter: &TableFilter,
    workers: usize,
) -> Result<Vec<IndexedResult>, EncodeError>
where
    C: EncodeClient,
    S: AsRef<str> + Sync,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("encode-batch-{index}"))
        .build()
        .map_err(|err| EncodeError::WorkerPool(err.to_string()))?;

    Ok(pool.install(|| {
        accessions
            .par_iter()
            .enumerate()
            .map(|(index, accession)| {
                (
                    index,
                    fetch_sample_table(client, accession.as_ref(), filter),
                )
            })
            .collect::<Vec<_>>()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_bounded_by_jobs() {
        assert_eq!(worker_count(Some(8), 3), 3);
        assert_eq!(worker_count(Some(2), 10), 2);
        assert_eq!(worker_count(Some(0), 10), 1);
        assert!(worker_count(None, 1) == 1);
    }

    #[test]
    fn empty_documents() {
        assert!(is_empty_document(&Value::Null));
        assert!(is_empty_document(&serde_json::json!({})));
        assert!(!is_empty_document(&serde_json::json!({"files": []})));
    }
}
