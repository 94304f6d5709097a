//! Data layer for the linked-selection engine
//!
//! Binary point decoding, result materialization into render-ready buffers,
//! and a SQLite-backed analytical engine with a CSV loader.

pub mod config;
pub mod geometry;
pub mod materialize;
pub mod schema;
pub mod sources;

use arrow::error::ArrowError;
use tokio::task::JoinError;
use thiserror::Error;

// Re-exports
pub use config::LoadConfig;
pub use geometry::{decode_point, encode_point};
pub use materialize::{ChartKey, ChartSeries, RenderBuffer, RenderMaterializer, RenderSchema, ResultDecoder, SeriesDecoder};
pub use sources::SqliteEngine;

/// Failures while loading, querying or decoding
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("CSV parsing error: {0}")]
    Csv(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Input has no header row")]
    MissingHeader,

    #[error("Result is missing column '{0}'")]
    MissingColumn(String),

    #[error("Column '{column}' has type {found}, expected {expected}")]
    ColumnType {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("Join error: {0}")]
    Join(#[from] JoinError),

    #[error("{0}")]
    Unsupported(String),
}

impl From<csv::Error> for DataError {
    fn from(error: csv::Error) -> Self {
        match error.kind() {
            csv::ErrorKind::Io(io_err) => DataError::Io(std::io::Error::new(io_err.kind(), error.to_string())),
            _ => DataError::Csv(error.to_string()),
        }
    }
}
