pub mod batch;
pub mod config;
pub mod db;
pub mod fingerprint;
pub mod indexer;
pub mod matcher;
pub mod scanner;

#[cfg(test)]
pub(crate) mod testutil;

/// Audio file extensions we index and query
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "ogg", "m4a", "aac"];

/// Application name for XDG paths
pub const APP_NAME: &str = "earmark";
