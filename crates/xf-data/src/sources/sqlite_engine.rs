//! SQLite analytical engine implementation

use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMillisecondBuilder,
};
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;
use tracing::debug;
use xf_core::query::quote_ident;
use xf_core::{ColumnType, CompiledSql, Literal, Query};

use crate::geometry::encode_point;
use crate::materialize::parse_timestamp_millis;
use crate::DataError;

/// Analytical engine over a single SQLite table.
///
/// Registers `ST_Point(lon, lat)` (binary point encoding) and
/// `ST_AsWKB(geom)` so map queries can project a spatial column.
#[derive(Clone)]
pub struct SqliteEngine {
    conn: Arc<Mutex<Connection>>,
    table_name: String,
}

impl SqliteEngine {
    /// Open a database file
    pub fn open<P: AsRef<Path>>(path: P, table_name: impl Into<String>) -> Result<Self, DataError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn, table_name.into())
    }

    /// Open a private in-memory database
    pub fn in_memory(table_name: impl Into<String>) -> Result<Self, DataError> {
        Self::from_connection(Connection::open_in_memory()?, table_name.into())
    }

    fn from_connection(conn: Connection, table_name: String) -> Result<Self, DataError> {
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table_name,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Run raw SQL statements, e.g. for seeding a table
    pub fn execute_batch(&self, sql: &str) -> Result<(), DataError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Run a closure with exclusive access to the connection
    pub(crate) fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, DataError>,
    ) -> Result<R, DataError> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Count rows in table
    fn count_rows(conn: &Connection, table_name: &str) -> Result<usize, DataError> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table_name));
        let count: i64 = conn.query_row(&query, [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    /// Execute a compiled query and build one Arrow column per projection
    fn run_query(
        conn: &Connection,
        compiled: &CompiledSql,
        schema: Arc<Schema>,
        types: &[ColumnType],
    ) -> Result<RecordBatch, DataError> {
        let mut stmt = conn.prepare(&compiled.sql)?;
        let params: Vec<Value> = compiled.params.iter().map(literal_value).collect();

        let mut builders: Vec<ColumnBuilder> = types.iter().map(|ty| ColumnBuilder::new(*ty)).collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            for (col_idx, builder) in builders.iter_mut().enumerate() {
                builder.append(row.get_ref(col_idx)?);
            }
        }

        let arrays: Vec<ArrayRef> = builders.into_iter().map(ColumnBuilder::finish).collect();
        Ok(RecordBatch::try_new(schema, arrays)?)
    }
}

#[async_trait]
impl xf_core::data::AnalyticalEngine for SqliteEngine {
    async fn query(&self, query: &Query) -> anyhow::Result<RecordBatch> {
        if query.projections().is_empty() {
            return Err(DataError::Unsupported("query projects no columns".to_string()).into());
        }

        let compiled = query.compile();
        let schema = query.schema();
        let types: Vec<ColumnType> = query.projections().iter().map(|p| p.column_type()).collect();
        debug!("Executing SQL: {} ({} params)", compiled.sql, compiled.params.len());

        let conn = self.conn.clone();
        let batch = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            Self::run_query(&conn, &compiled, schema, &types)
        })
        .await
        .map_err(DataError::from)??;

        Ok(batch)
    }

    async fn row_count(&self) -> anyhow::Result<usize> {
        let conn = self.conn.clone();
        let table = self.table_name.clone();
        let count = tokio::task::spawn_blocking(move || Self::count_rows(&conn.lock(), &table))
            .await
            .map_err(DataError::from)??;
        Ok(count)
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }
}

fn register_spatial_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("ST_Point", 2, FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC, |ctx| {
        let lon = ctx.get::<Option<f64>>(0)?;
        let lat = ctx.get::<Option<f64>>(1)?;
        Ok(match (lon, lat) {
            (Some(lon), Some(lat)) => Some(encode_point(lon, lat).to_vec()),
            _ => None,
        })
    })?;

    conn.create_scalar_function("ST_AsWKB", 1, flags, |ctx| ctx.get::<Option<Vec<u8>>>(0))?;

    Ok(())
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Text(text) => Value::Text(text.clone()),
        Literal::Int(value) => Value::Integer(*value),
        Literal::Float(value) => Value::Real(*value),
    }
}

/// Typed Arrow builder fed from SQLite values
enum ColumnBuilder {
    Float64(Float64Builder),
    Int64(Int64Builder),
    Utf8(StringBuilder),
    Binary(BinaryBuilder),
    Timestamp(TimestampMillisecondBuilder),
}

impl ColumnBuilder {
    fn new(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Float64 => ColumnBuilder::Float64(Float64Builder::new()),
            ColumnType::Int64 => ColumnBuilder::Int64(Int64Builder::new()),
            ColumnType::Utf8 => ColumnBuilder::Utf8(StringBuilder::new()),
            ColumnType::Binary => ColumnBuilder::Binary(BinaryBuilder::new()),
            ColumnType::TimestampMillis => ColumnBuilder::Timestamp(TimestampMillisecondBuilder::new()),
        }
    }

    /// Append one value, coercing across SQLite storage classes. Values that
    /// cannot be coerced are appended as nulls.
    fn append(&mut self, value: ValueRef<'_>) {
        match self {
            ColumnBuilder::Float64(builder) => builder.append_option(match value {
                ValueRef::Real(f) => Some(f),
                ValueRef::Integer(i) => Some(i as f64),
                ValueRef::Text(s) => std::str::from_utf8(s).ok().and_then(|s| s.trim().parse().ok()),
                _ => None,
            }),
            ColumnBuilder::Int64(builder) => builder.append_option(match value {
                ValueRef::Integer(i) => Some(i),
                ValueRef::Real(f) => Some(f as i64),
                ValueRef::Text(s) => std::str::from_utf8(s).ok().and_then(|s| s.trim().parse().ok()),
                _ => None,
            }),
            ColumnBuilder::Utf8(builder) => match value {
                ValueRef::Text(s) => builder.append_value(String::from_utf8_lossy(s)),
                ValueRef::Integer(i) => builder.append_value(i.to_string()),
                ValueRef::Real(f) => builder.append_value(f.to_string()),
                _ => builder.append_null(),
            },
            ColumnBuilder::Binary(builder) => match value {
                ValueRef::Blob(bytes) => builder.append_value(bytes),
                _ => builder.append_null(),
            },
            ColumnBuilder::Timestamp(builder) => builder.append_option(match value {
                ValueRef::Integer(i) => Some(i),
                ValueRef::Real(f) => Some(f as i64),
                ValueRef::Text(s) => std::str::from_utf8(s).ok().and_then(parse_timestamp_millis),
                _ => None,
            }),
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            ColumnBuilder::Float64(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Int64(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Utf8(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Binary(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Timestamp(mut b) => Arc::new(b.finish()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, BinaryArray, Int64Array, StringArray};
    use xf_core::data::AnalyticalEngine;
    use xf_core::predicate::{categorical_in, circular_distance, METERS_PER_DEGREE};
    use xf_core::Expression;
    use crate::geometry::decode_point;

    fn seeded() -> SqliteEngine {
        let engine = SqliteEngine::in_memory("wildfires").unwrap();
        engine
            .execute_batch(
                "CREATE TABLE wildfires (Longitude REAL, Latitude REAL, Acres REAL, DateTime INTEGER, Cause TEXT, FireName TEXT, Month INTEGER);
                 INSERT INTO wildfires VALUES (-120.0, 38.0, 150.0, 1593561600000, 'Human', 'LONE CREEK', 7);
                 INSERT INTO wildfires VALUES (-119.0, 38.5, 20.0, NULL, 'Natural', NULL, 8);
                 INSERT INTO wildfires VALUES (-100.0, 40.0, 12000.0, 1596240000000, 'Human', 'BIG ONE', 8);",
            )
            .unwrap();
        engine
    }

    fn ids_query(filter: Option<Expression>) -> Query {
        Query::table("wildfires").column("FireName", ColumnType::Utf8).filter(filter)
    }

    #[tokio::test]
    async fn test_point_projection_round_trips() {
        let engine = seeded();
        let query = Query::table("wildfires")
            .point("Longitude", "Latitude", "wkb_geometry")
            .column("DateTime", ColumnType::TimestampMillis)
            .order_by("Acres");
        let batch = engine.query(&query).await.unwrap();

        let geometry = batch.column(0).as_any().downcast_ref::<BinaryArray>().unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(decode_point(geometry.value(0)), Some((-119.0, 38.5)));
        assert!(batch.column(1).is_null(0));
    }

    #[tokio::test]
    async fn test_never_returns_zero_rows() {
        let engine = seeded();
        let never = categorical_in("Cause", &[] as &[&str], &["Human", "Natural"]);
        let batch = engine.query(&ids_query(never)).await.unwrap();
        assert_eq!(batch.num_rows(), 0);

        let all = categorical_in("Cause", &["Human", "Natural"], &["Human", "Natural"]);
        assert!(all.is_none());
        assert_eq!(engine.query(&ids_query(all)).await.unwrap().num_rows(), 3);
    }

    #[tokio::test]
    async fn test_hostile_text_is_bound_not_spliced() {
        let engine = seeded();
        let filter = categorical_in("Cause", &["Human' OR '1'='1"], &[]);
        let batch = engine.query(&ids_query(filter)).await.unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(engine.row_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_circular_distance_boundary() {
        let engine = SqliteEngine::in_memory("points").unwrap();
        let near = 999.0 / METERS_PER_DEGREE;
        let far = 1001.0 / METERS_PER_DEGREE;
        engine
            .execute_batch(&format!(
                "CREATE TABLE points (Longitude REAL, Latitude REAL, Name TEXT);
                 INSERT INTO points VALUES ({near}, 0.0, 'east-999');
                 INSERT INTO points VALUES ({far}, 0.0, 'east-1001');
                 INSERT INTO points VALUES (0.0, -{near}, 'south-999');
                 INSERT INTO points VALUES (0.0, {far}, 'north-1001');"
            ))
            .unwrap();

        let query = Query::table("points")
            .column("Name", ColumnType::Utf8)
            .filter(Some(circular_distance(0.0, 0.0, 1000.0)))
            .order_by("Name");
        let batch = engine.query(&query).await.unwrap();
        let names = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();

        let found: Vec<&str> = (0..names.len()).map(|i| names.value(i)).collect();
        assert_eq!(found, vec!["east-999", "south-999"]);
    }

    #[tokio::test]
    async fn test_grouped_counts() {
        let engine = seeded();
        let query = Query::table("wildfires")
            .column_as("Month", "key", ColumnType::Int64)
            .count("count")
            .group_by("Month")
            .order_by("Month");
        let batch = engine.query(&query).await.unwrap();
        let counts = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(counts.value(0), 1);
        assert_eq!(counts.value(1), 2);
    }
}
