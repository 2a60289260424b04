//! In-memory voting matcher over a loaded fingerprint index.
//!
//! The matcher is a read-only snapshot: document frequencies, IDF weights and
//! the exclusion set are computed once at load time. Rebuild the index and load
//! a fresh matcher to see new data.

use crate::db::models::FingerprintRecord;
use crate::db::{Database, DbError};
use crate::fingerprint::hashing::LandmarkHash;
use crate::fingerprint::{FingerprintConfig, FingerprintError, Fingerprinter, HashTable};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),
}

/// How a matching hash adds to a track's score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Each increment counts 1 per query occurrence.
    #[default]
    Votes,
    /// Each increment is scaled by the hash's IDF weight.
    Idf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Hashes found in more distinct tracks than this never vote.
    pub exclusion_threshold: usize,
    pub scoring: ScoringMode,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            exclusion_threshold: 5,
            scoring: ScoringMode::Votes,
        }
    }
}

impl MatcherConfig {
    /// Replace the scoring mode when `scoring` is given.
    pub fn with_scoring(mut self, scoring: Option<ScoringMode>) -> Self {
        if let Some(scoring) = scoring {
            self.scoring = scoring;
        }
        self
    }
}

/// How a single clip is scored against a stored index.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryMethod {
    /// Load the index into an [`InMemoryMatcher`] and keep the best `top`.
    Matcher { config: MatcherConfig, top: usize },
    /// Count matching stored records in the store itself. No exclusion set
    /// and no weighting.
    StoreVote,
}

/// A scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub track: String,
    /// Raw vote count, regardless of scoring mode.
    pub votes: u64,
    /// Ranking score: equals `votes` in [`ScoringMode::Votes`].
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    track: u32,
    time: f64,
}

#[derive(Debug)]
struct Entry {
    postings: Vec<Posting>,
    df: u32,
    idf: f64,
    excluded: bool,
}

#[derive(Debug)]
pub struct InMemoryMatcher {
    config: MatcherConfig,
    tracks: Vec<String>,
    entries: HashMap<LandmarkHash, Entry>,
}

impl InMemoryMatcher {
    /// Open the store at `path` and load it, see [`InMemoryMatcher::load`].
    pub fn open(
        path: &Path,
        config: MatcherConfig,
        fingerprint: &FingerprintConfig,
    ) -> Result<Self, MatcherError> {
        let db = Database::open_existing(path)?;
        Self::load(&db, config, fingerprint)
    }

    /// Load every record of `db` into memory.
    ///
    /// Warns when the index was built with different extraction parameters,
    /// since its hashes would not be comparable with the query's.
    pub fn load(
        db: &Database,
        config: MatcherConfig,
        fingerprint: &FingerprintConfig,
    ) -> Result<Self, MatcherError> {
        warn_mismatches(db, fingerprint)?;

        let mut builder = Builder::default();
        let n = db.for_each_record(|r| builder.push(r))?;
        let matcher = builder.finish(config);
        log::info!(
            "Loaded {} records: {} hashes, {} tracks, {} excluded",
            n,
            matcher.hash_count(),
            matcher.track_count(),
            matcher.excluded_count()
        );
        Ok(matcher)
    }

    pub fn from_records(
        records: impl IntoIterator<Item = FingerprintRecord>,
        config: MatcherConfig,
    ) -> Self {
        let mut builder = Builder::default();
        for r in records {
            builder.push(r);
        }
        builder.finish(config)
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Distinct tracks in the snapshot.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Distinct hashes in the snapshot.
    pub fn hash_count(&self) -> usize {
        self.entries.len()
    }

    pub fn excluded_count(&self) -> usize {
        self.entries.values().filter(|e| e.excluded).count()
    }

    /// Number of distinct tracks holding `hash`.
    pub fn document_frequency(&self, hash: &LandmarkHash) -> usize {
        self.entries.get(hash).map_or(0, |e| e.df as usize)
    }

    /// `ln(N / df)`, or `None` for a hash absent from the index.
    pub fn idf(&self, hash: &LandmarkHash) -> Option<f64> {
        self.entries.get(hash).map(|e| e.idf)
    }

    pub fn is_excluded(&self, hash: &LandmarkHash) -> bool {
        self.entries.get(hash).is_some_and(|e| e.excluded)
    }

    /// Stored `(track, anchor time)` pairs under `hash`.
    pub fn postings(&self, hash: &LandmarkHash) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries
            .get(hash)
            .into_iter()
            .flat_map(|e| e.postings.iter())
            .map(|p| (self.tracks[p.track as usize].as_str(), p.time))
    }

    /// Up to `k` candidates, best first.
    ///
    /// Order is score, then votes, then track key ascending. Tracks that
    /// received no votes are never returned.
    pub fn rank(&self, query: &HashTable, k: usize) -> Vec<Match> {
        let mut votes = vec![0u64; self.tracks.len()];
        let mut scores = vec![0f64; self.tracks.len()];

        // Fixed accumulation order keeps weighted scores reproducible
        let mut hashes: Vec<&LandmarkHash> = query.hashes().collect();
        hashes.sort_unstable();

        for hash in hashes {
            let Some(entry) = self.entries.get(hash) else {
                continue;
            };
            if entry.excluded {
                continue;
            }
            let occurrences = query.occurrences(hash) as u64;
            let increment = match self.config.scoring {
                ScoringMode::Votes => occurrences as f64,
                ScoringMode::Idf => occurrences as f64 * entry.idf,
            };
            for posting in &entry.postings {
                let t = posting.track as usize;
                votes[t] += occurrences;
                scores[t] += increment;
            }
        }

        let mut ranked: Vec<Match> = votes
            .into_iter()
            .zip(scores)
            .enumerate()
            .filter(|(_, (v, _))| *v > 0)
            .map(|(t, (votes, score))| Match {
                track: self.tracks[t].clone(),
                votes,
                score,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.votes.cmp(&a.votes))
                .then_with(|| a.track.cmp(&b.track))
        });
        ranked.truncate(k);
        ranked
    }

    /// The single best candidate, or `None` when no vote was cast.
    pub fn best(&self, query: &HashTable) -> Option<Match> {
        self.rank(query, 1).into_iter().next()
    }

    /// Fingerprint `samples` and return the best match.
    ///
    /// Silence or a clip with no indexed hashes is `Ok(None)`, not an error.
    pub fn recognize(
        &self,
        fingerprinter: &Fingerprinter,
        samples: &[f32],
    ) -> Result<Option<Match>, MatcherError> {
        let table = fingerprinter.hash_table(samples)?;
        Ok(self.best(&table))
    }
}

/// Identify a decoded clip against the index at `db_path`.
///
/// Candidates come best first; an empty list means no vote was cast.
pub fn identify(
    db_path: &Path,
    fingerprinter: &Fingerprinter,
    samples: &[f32],
    method: &QueryMethod,
) -> Result<Vec<Match>, MatcherError> {
    let table = fingerprinter.hash_table(samples)?;
    log::info!("{} distinct query hashes", table.len());

    match method {
        QueryMethod::Matcher { config, top } => {
            let matcher = InMemoryMatcher::open(db_path, config.clone(), fingerprinter.config())?;
            Ok(matcher.rank(&table, *top))
        }
        QueryMethod::StoreVote => {
            let db = Database::open_existing(db_path)?;
            warn_mismatches(&db, fingerprinter.config())?;
            Ok(db
                .lookup_vote(table.hashes())?
                .map(|v| Match {
                    score: v.votes as f64,
                    track: v.track,
                    votes: v.votes,
                })
                .into_iter()
                .collect())
        }
    }
}

fn warn_mismatches(db: &Database, fingerprint: &FingerprintConfig) -> Result<(), DbError> {
    for m in db.config_mismatches(fingerprint)? {
        log::warn!(
            "Index built with {} = {}, querying with {}",
            m.key,
            m.stored,
            m.current
        );
    }
    Ok(())
}

#[derive(Default)]
struct Builder {
    track_ids: HashMap<String, u32>,
    tracks: Vec<String>,
    postings: HashMap<LandmarkHash, Vec<Posting>>,
}

impl Builder {
    fn push(&mut self, record: FingerprintRecord) {
        let track = match self.track_ids.get(&record.track) {
            Some(&id) => id,
            None => {
                let id = self.tracks.len() as u32;
                self.tracks.push(record.track.clone());
                self.track_ids.insert(record.track, id);
                id
            }
        };
        self.postings.entry(record.hash).or_default().push(Posting {
            track,
            time: record.time,
        });
    }

    fn finish(self, config: MatcherConfig) -> InMemoryMatcher {
        let n = self.tracks.len().max(1) as f64;
        let mut scratch: Vec<u32> = Vec::new();

        let entries = self
            .postings
            .into_iter()
            .map(|(hash, postings)| {
                scratch.clear();
                scratch.extend(postings.iter().map(|p| p.track));
                scratch.sort_unstable();
                scratch.dedup();
                let df = scratch.len() as u32;
                let entry = Entry {
                    postings,
                    df,
                    idf: (n / df as f64).ln(),
                    excluded: df as usize > config.exclusion_threshold,
                };
                (hash, entry)
            })
            .collect();

        InMemoryMatcher {
            config,
            tracks: self.tracks,
            entries,
        }
    }
}
