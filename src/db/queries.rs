use super::models::{ConfigMismatch, FingerprintRecord, IndexStats, VoteResult};
use super::{Database, DbError, Result};
use crate::fingerprint::FingerprintConfig;
use crate::fingerprint::hashing::LandmarkHash;
use rusqlite::params;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Bound parameters per `IN (...)` lookup, under SQLite's variable limit.
const LOOKUP_CHUNK: usize = 500;

impl Database {
    /// Append records in one transaction; either all land or none do.
    pub fn insert_batch(&self, records: &[FingerprintRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO fingerprints (hash, track, time) VALUES (?1, ?2, ?3)",
            )?;
            for r in records {
                stmt.execute(params![r.hash.to_string(), r.track, r.time])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Store-side vote over the distinct query hashes.
    ///
    /// Each stored record whose hash is in the query counts once for its track.
    /// Returns `None` when nothing matches; ties go to the smallest track key.
    pub fn lookup_vote<'a>(
        &self,
        hashes: impl IntoIterator<Item = &'a LandmarkHash>,
    ) -> Result<Option<VoteResult>> {
        let distinct: BTreeSet<String> = hashes.into_iter().map(|h| h.to_string()).collect();
        let distinct: Vec<String> = distinct.into_iter().collect();
        let mut counts: HashMap<String, u64> = HashMap::new();

        for chunk in distinct.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT track, COUNT(*) FROM fingerprints
                 WHERE hash IN ({placeholders})
                 GROUP BY track"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (track, n) = row?;
                *counts.entry(track).or_insert(0) += n as u64;
            }
        }

        Ok(counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(track, votes)| VoteResult { track, votes }))
    }

    /// Stream every stored record, in insertion order.
    pub fn for_each_record(&self, mut f: impl FnMut(FingerprintRecord)) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare("SELECT hash, track, time FROM fingerprints ORDER BY rowid")?;
        let mut rows = stmt.query([])?;
        let mut n = 0u64;
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            let hash = text.parse::<LandmarkHash>().map_err(|e| DbError::Corrupt(format!("{e}")))?;
            f(FingerprintRecord {
                hash,
                track: row.get(1)?,
                time: row.get(2)?,
            });
            n += 1;
        }
        Ok(n)
    }

    pub fn load_records(&self) -> Result<Vec<FingerprintRecord>> {
        let mut records = Vec::new();
        self.for_each_record(|r| records.push(r))?;
        Ok(records)
    }

    /// Build metadata written by [`Database::rebuild`]. Empty for legacy stores.
    pub fn read_meta(&self) -> Result<BTreeMap<String, String>> {
        if !self.has_table("index_meta")? {
            return Ok(BTreeMap::new());
        }
        let mut stmt = self.conn.prepare("SELECT key, value FROM index_meta")?;
        let meta = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(meta)
    }

    /// Parameters recorded at build time that disagree with `config`.
    pub fn config_mismatches(&self, config: &FingerprintConfig) -> Result<Vec<ConfigMismatch>> {
        let meta = self.read_meta()?;
        Ok(config
            .meta_entries()
            .into_iter()
            .filter_map(|(key, current)| {
                let stored = meta.get(key)?;
                (*stored != current).then(|| ConfigMismatch {
                    key: key.to_string(),
                    stored: stored.clone(),
                    current,
                })
            })
            .collect())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let (records, distinct_hashes, tracks) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT hash), COUNT(DISTINCT track) FROM fingerprints",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let built_at = self.read_meta()?.remove("built_at");
        Ok(IndexStats {
            records,
            distinct_hashes,
            tracks,
            built_at,
        })
    }
}
