use crate::db::models::FingerprintRecord;
use crate::db::{Database, DbError};
use crate::fingerprint::decode::{self, DecodeError};
use crate::fingerprint::{FingerprintError, Fingerprinter};
use crate::scanner::{self, filename::normalize_track_key};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Indexing aborted at {}: {source}", path.display())]
    Aborted {
        path: PathBuf,
        #[source]
        source: Box<IndexError>,
    },
}

/// What one unreadable file does to a corpus run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log a warning, count the failure and continue.
    #[default]
    Skip,
    /// Stop the run at the first failing file.
    Abort,
}

#[derive(Debug, Default)]
pub struct IndexResult {
    pub indexed: u64,
    pub failed: u64,
    pub records: u64,
}

/// Rebuild `db` from every audio file under `root`.
///
/// Files are processed one at a time in path order. Each file's records are
/// committed as one batch, so a failing file never leaves partial rows behind.
/// Store errors always abort.
pub fn build_index(
    db: &Database,
    root: &Path,
    fingerprinter: &Fingerprinter,
    policy: FailurePolicy,
) -> std::result::Result<IndexResult, IndexError> {
    db.rebuild(fingerprinter.config())?;

    let files = scanner::collect_audio_files(root);
    let mut result = IndexResult::default();
    if files.is_empty() {
        log::warn!("No audio files found under {}", root.display());
        return Ok(result);
    }

    log::info!("Indexing {} files", files.len());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    for path in &files {
        match index_file(db, path, fingerprinter) {
            Ok(n) => {
                result.indexed += 1;
                result.records += n as u64;
            }
            Err(e @ IndexError::Db(_)) => {
                pb.abandon();
                return Err(e);
            }
            Err(e) => match policy {
                FailurePolicy::Skip => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    result.failed += 1;
                }
                FailurePolicy::Abort => {
                    pb.abandon();
                    return Err(IndexError::Aborted {
                        path: path.clone(),
                        source: Box::new(e),
                    });
                }
            },
        }
        pb.inc(1);
        pb.set_message(format!("{} indexed, {} failed", result.indexed, result.failed));
    }

    pb.finish_with_message(format!(
        "Done: {} indexed, {} failed, {} records",
        result.indexed, result.failed, result.records
    ));

    Ok(result)
}

/// Decode, fingerprint and store one file under its normalized track key.
pub fn index_file(
    db: &Database,
    path: &Path,
    fingerprinter: &Fingerprinter,
) -> std::result::Result<usize, IndexError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let track = normalize_track_key(&file_name);

    log::debug!("Indexing {} as {:?}", file_name, track);

    let samples = decode::load_audio(path, fingerprinter.config().sample_rate)?;
    index_samples(db, &track, &samples, fingerprinter)
}

/// Fingerprint an already-decoded waveform and append it as one batch.
pub fn index_samples(
    db: &Database,
    track: &str,
    samples: &[f32],
    fingerprinter: &Fingerprinter,
) -> std::result::Result<usize, IndexError> {
    let records: Vec<FingerprintRecord> = fingerprinter
        .hashes(samples)?
        .into_iter()
        .map(|(hash, time)| FingerprintRecord::new(hash, track, time))
        .collect();
    if records.is_empty() {
        log::warn!("No landmarks found for {:?}", track);
    }
    Ok(db.insert_batch(&records)?)
}
