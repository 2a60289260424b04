use crate::fingerprint::HashTable;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Bumped whenever the on-disk entry layout changes; older entries are misses.
const CACHE_VERSION: u32 = 1;

const ENTRY_SUFFIX: &str = ".json";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Cache encode error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct EntryRef<'a> {
    version: u32,
    table: &'a HashTable,
}

#[derive(Deserialize)]
struct Entry {
    version: u32,
    table: HashTable,
}

/// On-disk memo of extracted hash tables, keyed by audio file name.
///
/// Only the file name is part of the key: two files with the same name share
/// an entry, and an entry is not invalidated when the audio changes.
#[derive(Debug, Clone)]
pub struct HashCache {
    dir: PathBuf,
}

impl HashCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn entry_path(&self, audio: &Path) -> PathBuf {
        let name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.dir.join(format!("{name}{ENTRY_SUFFIX}"))
    }

    /// Cached table for `audio`. Unreadable or stale entries are misses.
    pub fn get(&self, audio: &Path) -> Option<HashTable> {
        let path = self.entry_path(audio);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Unreadable cache entry {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice::<Entry>(&bytes) {
            Ok(entry) if entry.version == CACHE_VERSION => Some(entry.table),
            Ok(entry) => {
                log::debug!(
                    "Ignoring cache entry {} with version {}",
                    path.display(),
                    entry.version
                );
                None
            }
            Err(e) => {
                log::warn!("Corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Store `table` for `audio`. Readers never observe a partial entry.
    pub fn put(&self, audio: &Path, table: &HashTable) -> Result<(), CacheError> {
        let path = self.entry_path(audio);
        let tmp = self.dir.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let bytes = serde_json::to_vec(&EntryRef {
            version: CACHE_VERSION,
            table,
        })?;
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            fs::remove_file(&tmp).ok();
            return Err(e.into());
        }
        Ok(())
    }

    /// Cached table for `audio`, or the result of `extract`, which is then stored.
    ///
    /// `refresh` ignores any existing entry. A failed store only logs.
    pub fn get_or_extract<E>(
        &self,
        audio: &Path,
        refresh: bool,
        extract: impl FnOnce() -> Result<HashTable, E>,
    ) -> Result<(HashTable, bool), E> {
        if !refresh {
            if let Some(table) = self.get(audio) {
                return Ok((table, true));
            }
        }
        let table = extract()?;
        if let Err(e) = self.put(audio, &table) {
            log::warn!("Could not cache hashes for {}: {}", audio.display(), e);
        }
        Ok((table, false))
    }

    /// Remove every entry. Returns how many were deleted.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_entry = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ENTRY_SUFFIX) || n.starts_with(".tmp-"));
            if is_entry && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        log::info!("Cleared {} cache entries from {}", removed, self.dir.display());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::hashing::LandmarkHash;
    use std::convert::Infallible;

    fn table() -> HashTable {
        [
            (LandmarkHash::new(1000, 1200, 15), 0.25),
            (LandmarkHash::new(1000, 1200, 15), 3.5),
            (LandmarkHash::new(640, 880, 42), 1.0),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path().join("cache")).unwrap();
        let audio = Path::new("/music/clean/Song A.wav");

        assert!(cache.get(audio).is_none());
        cache.put(audio, &table()).unwrap();
        assert_eq!(cache.get(audio), Some(table()));
        assert_eq!(cache.entry_path(audio), dir.path().join("cache/Song A.wav.json"));
    }

    #[test]
    fn test_key_is_file_name_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path()).unwrap();
        cache.put(Path::new("/a/clip.mp3"), &table()).unwrap();
        assert_eq!(cache.get(Path::new("/elsewhere/clip.mp3")), Some(table()));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss_and_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path()).unwrap();
        let audio = Path::new("clip.wav");
        fs::write(cache.entry_path(audio), b"{ not json").unwrap();

        assert!(cache.get(audio).is_none());
        let (got, hit) = cache
            .get_or_extract(audio, false, || Ok::<_, Infallible>(table()))
            .unwrap();
        assert!(!hit);
        assert_eq!(got, table());
        // the recomputed table replaced the corrupt entry
        assert_eq!(cache.get(audio), Some(table()));
    }

    #[test]
    fn test_stale_version_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path()).unwrap();
        let audio = Path::new("clip.wav");
        fs::write(cache.entry_path(audio), br#"{"version":0,"table":{}}"#).unwrap();
        assert!(cache.get(audio).is_none());
    }

    #[test]
    fn test_hit_skips_extraction_unless_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path()).unwrap();
        let audio = Path::new("clip.wav");
        cache.put(audio, &table()).unwrap();

        let (_, hit) = cache
            .get_or_extract(audio, false, || -> Result<HashTable, String> {
                Err("should not run".into())
            })
            .unwrap();
        assert!(hit);

        let (fresh, hit) = cache
            .get_or_extract(audio, true, || Ok::<_, Infallible>(HashTable::new()))
            .unwrap();
        assert!(!hit);
        assert!(fresh.is_empty());
        assert_eq!(cache.get(audio), Some(HashTable::new()));
    }

    #[test]
    fn test_extraction_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path()).unwrap();
        let result = cache.get_or_extract(Path::new("x.wav"), false, || Err("decode failed"));
        assert_eq!(result.unwrap_err(), "decode failed");
        assert!(cache.get(Path::new("x.wav")).is_none());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::new(dir.path()).unwrap();
        cache.put(Path::new("a.wav"), &table()).unwrap();
        cache.put(Path::new("b.wav"), &table()).unwrap();
        fs::write(dir.path().join("keep.txt"), b"unrelated").unwrap();

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.get(Path::new("a.wav")).is_none());
        assert!(dir.path().join("keep.txt").exists());
    }
}
