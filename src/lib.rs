//! # Sasmap - SAS program dependency mapper
//!
//! Pattern-based fact extraction and impact analysis over legacy SAS corpora.
//!
//! Sasmap provides:
//! - Rule-driven extraction of table operations, includes, macro calls and
//!   credential findings from SAS source
//! - Macro-variable and LIBNAME resolution into fully-qualified table names
//! - SQLite-backed fact store with incremental re-scan
//! - Transitive downstream/upstream impact queries over the dependency graph

pub mod config;
pub mod extract;
pub mod output;
pub mod query;
pub mod remote;
pub mod resolve;
pub mod rules;
pub mod scan;
pub mod storage;

// Re-exports for convenient access
pub use extract::MatchRecord;
pub use query::QueryEngine;
pub use remote::{FileMeta, LocalFs, RemoteFs};
pub use resolve::DbEngine;
pub use rules::{RuleCategory, RuleSet};
pub use scan::{ScanStats, Scanner};
pub use storage::FactStore;

/// Result type alias for Sasmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Sasmap operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rule error: {0}")]
    Rule(String),

    #[error("Invalid value: {0}")]
    Invalid(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}
