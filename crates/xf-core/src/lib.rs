//! Core of the linked-selection engine
//!
//! This crate provides the typed filter expressions, the SQL compiler, the
//! shared selection store and the analytical engine boundary.

pub mod config;
pub mod events;
pub mod expression;
pub mod predicate;
pub mod query;
pub mod selection;

// Re-export commonly used types
pub use config::{BrushConfig, ColumnMapping, DatasetConfig, SessionConfig};
pub use events::EventBus;
pub use expression::{Column, Expression, ExpressionError, Literal};
pub use predicate::{NumericRange, SpatialColumns};
pub use query::{ColumnType, CompiledSql, Projection, Query, SqlCompiler};
pub use selection::{Clause, SelectionConsumer, SelectionError, SelectionStore, SurfaceId};
pub use data::AnalyticalEngine;

pub mod data {
    use crate::query::Query;

    /// Executes table-scoped queries and returns column-oriented results
    #[async_trait::async_trait]
    pub trait AnalyticalEngine: Send + Sync {
        /// Run a query. The batch follows the query's projection order.
        async fn query(&self, query: &Query) -> anyhow::Result<arrow::record_batch::RecordBatch>;

        /// Get total row count of the table
        async fn row_count(&self) -> anyhow::Result<usize>;

        /// Name of the logical table
        fn table_name(&self) -> &str;
    }
}
