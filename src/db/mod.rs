pub mod models;
pub mod queries;

use rusqlite::{Connection, OpenFlags, params};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::fingerprint::FingerprintConfig;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Fingerprint database not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("Database has no fingerprint table (was it built with build-index?)")]
    NoSchema,
    #[error("Corrupt fingerprint record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// SQLite side files that belong to a database at `path`.
pub fn side_files(path: &Path) -> [PathBuf; 2] {
    let with_suffix = |suffix: &str| {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    [with_suffix("-wal"), with_suffix("-shm")]
}

pub struct Database {
    pub conn: Connection,
}

impl Database {
    /// Open or create a store for writing.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open a store that must already exist and carry the fingerprint table.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(DbError::Missing(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self { conn };
        if !db.has_table("fingerprints")? {
            return Err(DbError::NoSchema);
        }
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for concurrent readers during batch runs
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: fingerprint records + build metadata
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS fingerprints (
                hash   TEXT,
                track  TEXT,
                time   REAL
            );
            CREATE INDEX IF NOT EXISTS idx_hash ON fingerprints(hash);

            CREATE TABLE IF NOT EXISTS index_meta (
                key    TEXT PRIMARY KEY,
                value  TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Drop every record and start an empty index built with `config`.
    ///
    /// The only supported mutation besides appending batches.
    pub fn rebuild(&self, config: &FingerprintConfig) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "
            DROP TABLE IF EXISTS fingerprints;
            CREATE TABLE fingerprints (
                hash   TEXT,
                track  TEXT,
                time   REAL
            );
            CREATE INDEX idx_hash ON fingerprints(hash);
            DELETE FROM index_meta;
            ",
        )?;
        {
            let mut stmt = tx.prepare("INSERT INTO index_meta (key, value) VALUES (?1, ?2)")?;
            for (key, value) in config.meta_entries() {
                stmt.execute(params![key, value])?;
            }
            stmt.execute(params!["built_at", chrono::Utc::now().to_rfc3339()])?;
        }
        tx.commit()?;
        log::info!("Fingerprint index reset");
        Ok(())
    }

    fn has_table(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
