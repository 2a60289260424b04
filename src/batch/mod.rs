//! Batch evaluation over labelled query samples.
//!
//! Recognition runs on a fixed pool of worker threads. Every worker builds its
//! own [`WorkerContext`] (fingerprinter, full matcher loaded from the store,
//! cache handle) once at startup and reuses it for each job; nothing is shared
//! between workers, so a failing worker cannot disturb the others. Results are
//! delivered in completion order.

pub mod cache;

use crate::db::DbError;
use crate::fingerprint::decode::{self, DecodeError};
use crate::fingerprint::{FingerprintConfig, FingerprintError, Fingerprinter, HashTable};
use crate::matcher::{InMemoryMatcher, MatcherConfig, MatcherError};
use cache::{CacheError, HashCache};
use crossbeam_channel::{Receiver, Sender, unbounded};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use thiserror::Error;

/// Label reported when a sample matches nothing.
pub const NO_MATCH: &str = "no_match";

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Matcher error: {0}")]
    Matcher(#[from] MatcherError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("Worker {worker} failed to start: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: Box<BatchError>,
    },
    #[error("{}: {source}", path.display())]
    Sample {
        path: PathBuf,
        #[source]
        source: Box<BatchError>,
    },
}

impl From<DbError> for BatchError {
    fn from(e: DbError) -> Self {
        Self::Matcher(MatcherError::Db(e))
    }
}

/// A query file with its expected label.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSample {
    pub path: PathBuf,
    /// Normalized track key the sample should be identified as.
    pub expected: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub path: PathBuf,
    pub expected: String,
    /// `None` when no vote was cast.
    pub predicted: Option<String>,
    pub category: String,
    pub votes: u64,
    /// Whether the hashes came from the cache.
    pub cached: bool,
}

impl BatchOutcome {
    pub fn predicted_label(&self) -> &str {
        self.predicted.as_deref().unwrap_or(NO_MATCH)
    }

    pub fn is_correct(&self) -> bool {
        self.predicted.as_deref() == Some(self.expected.as_str())
    }
}

/// Everything a batch run needs to build worker contexts.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub db_path: PathBuf,
    pub cache_dir: PathBuf,
    pub workers: usize,
    pub fingerprint: FingerprintConfig,
    pub matcher: MatcherConfig,
    /// Recompute hashes even when a cache entry exists.
    pub refresh: bool,
}

/// Per-worker state, built once and reused for every job the worker takes.
pub struct WorkerContext {
    fingerprinter: Fingerprinter,
    matcher: InMemoryMatcher,
    cache: HashCache,
    refresh: bool,
}

impl WorkerContext {
    pub fn new(options: &BatchOptions) -> Result<Self, BatchError> {
        let fingerprinter = Fingerprinter::new(options.fingerprint.clone())
            .map_err(FingerprintError::from)?;
        let matcher = InMemoryMatcher::open(
            &options.db_path,
            options.matcher.clone(),
            &options.fingerprint,
        )?;
        let cache = HashCache::new(&options.cache_dir)?;
        Ok(Self {
            fingerprinter,
            matcher,
            cache,
            refresh: options.refresh,
        })
    }

    pub fn recognize(&self, sample: &BatchSample) -> Result<BatchOutcome, BatchError> {
        let (table, cached) =
            extract_cached(&self.fingerprinter, &self.cache, &sample.path, self.refresh)?;
        let best = self.matcher.best(&table);
        Ok(BatchOutcome {
            path: sample.path.clone(),
            expected: sample.expected.clone(),
            votes: best.as_ref().map_or(0, |m| m.votes),
            predicted: best.map(|m| m.track),
            category: sample.category.clone(),
            cached,
        })
    }
}

fn extract_cached(
    fingerprinter: &Fingerprinter,
    cache: &HashCache,
    path: &Path,
    refresh: bool,
) -> Result<(HashTable, bool), BatchError> {
    cache
        .get_or_extract(path, refresh, || -> Result<HashTable, BatchError> {
            let samples = decode::load_audio(path, fingerprinter.config().sample_rate)?;
            Ok(fingerprinter.hash_table(&samples)?)
        })
        .map_err(|e| BatchError::Sample {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
}

#[derive(Debug, Default)]
pub struct WarmupResult {
    pub extracted: u64,
    pub cached: u64,
    pub failed: u64,
}

/// Populate the hash cache for `samples` without scoring anything.
///
/// Extraction runs on a rayon pool sharing one fingerprinter. Files that fail
/// are logged and counted; a later recognition pass reports them again.
pub fn warmup_cache(
    samples: &[BatchSample],
    options: &BatchOptions,
) -> Result<WarmupResult, BatchError> {
    let fingerprinter =
        Fingerprinter::new(options.fingerprint.clone()).map_err(FingerprintError::from)?;
    let cache = HashCache::new(&options.cache_dir)?;

    let pb = ProgressBar::new(samples.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message("Extracting...");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()?;

    let results: Vec<Result<bool, BatchError>> = pool.install(|| {
        use rayon::prelude::*;
        samples
            .par_iter()
            .map(|sample| {
                let result = extract_cached(&fingerprinter, &cache, &sample.path, options.refresh)
                    .map(|(_, cached)| cached);
                pb.inc(1);
                result
            })
            .collect()
    });

    let mut summary = WarmupResult::default();
    for result in results {
        match result {
            Ok(true) => summary.cached += 1,
            Ok(false) => summary.extracted += 1,
            Err(e) => {
                log::warn!("Warmup failed: {}", e);
                summary.failed += 1;
            }
        }
    }

    pb.finish_with_message(format!(
        "Done: {} extracted, {} cached, {} failed",
        summary.extracted, summary.cached, summary.failed
    ));
    Ok(summary)
}

/// In-flight batch recognition; yields results as workers complete them.
///
/// Dropping the run stops handing out results and waits for the workers to
/// finish their current job.
pub struct BatchRun {
    results: Option<Receiver<Result<BatchOutcome, BatchError>>>,
    handles: Vec<JoinHandle<()>>,
}

impl Iterator for BatchRun {
    type Item = Result<BatchOutcome, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.results.as_ref()?.recv().ok()
    }
}

impl Drop for BatchRun {
    fn drop(&mut self) {
        // Closing the result channel makes workers stop after their current job
        self.results.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Batch worker panicked");
            }
        }
    }
}

/// Recognize every sample on `options.workers` threads.
pub fn batch_recognize(samples: Vec<BatchSample>, options: &BatchOptions) -> BatchRun {
    let workers = options.workers.max(1);
    let (job_tx, job_rx) = unbounded::<BatchSample>();
    let (out_tx, out_rx) = unbounded::<Result<BatchOutcome, BatchError>>();

    log::info!("Recognizing {} samples with {} workers", samples.len(), workers);
    for sample in samples {
        // receiver is alive in this scope
        job_tx.send(sample).ok();
    }
    drop(job_tx);

    let mut handles = Vec::with_capacity(workers);
    for wid in 0..workers {
        let rx = job_rx.clone();
        let tx = out_tx.clone();
        let options = options.clone();
        handles.push(std::thread::spawn(move || worker_loop(wid, &options, rx, tx)));
    }
    drop(out_tx);

    BatchRun {
        results: Some(out_rx),
        handles,
    }
}

/// Warm the cache, then run [`batch_recognize`] over the same samples.
pub fn batch_recognize_fast(
    samples: Vec<BatchSample>,
    options: &BatchOptions,
) -> Result<BatchRun, BatchError> {
    warmup_cache(&samples, options)?;
    let options = BatchOptions {
        refresh: false,
        ..options.clone()
    };
    Ok(batch_recognize(samples, &options))
}

fn worker_loop(
    wid: usize,
    options: &BatchOptions,
    rx: Receiver<BatchSample>,
    tx: Sender<Result<BatchOutcome, BatchError>>,
) {
    let ctx = match WorkerContext::new(options) {
        Ok(ctx) => ctx,
        Err(e) => {
            log::error!("Worker {} could not start: {}", wid, e);
            tx.send(Err(BatchError::Worker {
                worker: wid,
                source: Box::new(e),
            }))
            .ok();
            return;
        }
    };
    log::debug!("Worker {} ready", wid);

    while let Ok(sample) = rx.recv() {
        if tx.send(ctx.recognize(&sample)).is_err() {
            break;
        }
    }
}

/// Accuracy counters for one category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryStats {
    pub total: u64,
    pub correct: u64,
}

impl CategoryStats {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Aggregated batch results, overall and per category.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub overall: CategoryStats,
    pub no_match: u64,
    pub errors: u64,
    pub categories: BTreeMap<String, CategoryStats>,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &BatchOutcome) {
        let correct = outcome.is_correct() as u64;
        let cat = self.categories.entry(outcome.category.clone()).or_default();
        cat.total += 1;
        cat.correct += correct;
        self.overall.total += 1;
        self.overall.correct += correct;
        if outcome.predicted.is_none() {
            self.no_match += 1;
        }
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }
}
