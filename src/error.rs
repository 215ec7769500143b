//! Error taxonomy for the store, ingestion, and reporting layers

use thiserror::Error;

/// Errors from the dictionary and fact stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A dictionary id did not resolve. Dictionary entries are never
    /// deleted, so this indicates a corrupted database, not bad input.
    #[error("{dictionary} id {id} does not resolve")]
    NotFound { dictionary: &'static str, id: i64 },

    /// A stored fact row holds a value the schema should have made
    /// impossible.
    #[error("corrupt fact row {id}: {detail}")]
    Corrupt { id: i64, detail: String },

    /// An insert carried a reference the store could not resolve.
    #[error("unresolvable reference in request insert")]
    ReferentialIntegrity { source: sqlx::Error },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Errors raised while ingesting raw log records.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The record is structurally unusable. The ingest loop skips it and
    /// keeps going; everything else aborts the file.
    #[error("malformed record: {reason}")]
    Malformed { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the reporting engine.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unknown report {0:?}")]
    UnknownReport(String),

    #[error("invalid report parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
