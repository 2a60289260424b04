use crate::fingerprint::hashing::LandmarkHash;

/// One stored `(hash, track, anchor time)` row.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintRecord {
    pub hash: LandmarkHash,
    pub track: String,
    pub time: f64,
}

impl FingerprintRecord {
    pub fn new(hash: LandmarkHash, track: impl Into<String>, time: f64) -> Self {
        Self {
            hash,
            track: track.into(),
            time,
        }
    }
}

/// Winner of a store-side vote: stored-record occurrences among the query hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteResult {
    pub track: String,
    pub votes: u64,
}

/// Summary counts for a built index.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub records: i64,
    pub distinct_hashes: i64,
    pub tracks: i64,
    /// RFC 3339 build timestamp, if the index carries metadata.
    pub built_at: Option<String>,
}

/// A stored parameter that differs from the one in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMismatch {
    pub key: String,
    pub stored: String,
    pub current: String,
}
