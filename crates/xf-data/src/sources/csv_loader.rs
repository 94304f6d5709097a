use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::ReaderBuilder;
use rusqlite::types::Value;
use tracing::{debug, info};
use xf_core::query::quote_ident;

use crate::config::LoadConfig;
use crate::materialize::parse_timestamp_millis;
use crate::schema::{DetectedColumn, SchemaDetector, StorageType};
use crate::sources::SqliteEngine;
use crate::DataError;

/// Load a delimited file into the engine's table, replacing it if present.
/// Returns the number of rows inserted.
pub async fn load_csv(engine: &SqliteEngine, path: &Path, config: &LoadConfig) -> Result<usize, DataError> {
    let engine = engine.clone();
    let path = path.to_path_buf();
    let config = config.clone();

    tokio::task::spawn_blocking(move || {
        let file = File::open(&path)?;
        info!("Loading {} into table '{}'", path.display(), engine.table_name());
        load_csv_reader(&engine, BufReader::new(file), &config)
    })
    .await?
}

/// Load delimited text from any reader. Blocking.
pub fn load_csv_reader<R: Read>(engine: &SqliteEngine, reader: R, config: &LoadConfig) -> Result<usize, DataError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(config.delimiter)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if headers.is_empty() {
        return Err(DataError::MissingHeader);
    }

    let mut records = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        records.push(record.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    let detector = SchemaDetector::new().with_sample_size(config.sample_size);
    let columns = detector.detect_from_samples(&headers, &records, &config.null_config);
    for column in &columns {
        debug!(
            "Column '{}' -> {} ({} nulls in sample)",
            column.name,
            column.storage.sql_type(),
            column.stats.null_count
        );
    }

    let table = engine.table_name().to_string();
    engine.with_connection(|conn| {
        conn.execute_batch(&create_table_sql(&table, &columns))?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert = format!("INSERT INTO {} VALUES ({})", quote_ident(&table), placeholders);

        for chunk in records.chunks(config.batch_size.max(1)) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&insert)?;
                for record in chunk {
                    let values = columns
                        .iter()
                        .enumerate()
                        .map(|(idx, column)| field_value(record.get(idx).map(String::as_str), column, config));
                    stmt.execute(rusqlite::params_from_iter(values))?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    })?;

    info!("Loaded {} rows into '{}'", records.len(), table);
    Ok(records.len())
}

fn create_table_sql(table: &str, columns: &[DetectedColumn]) -> String {
    let definitions = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.storage.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({definitions});",
        table = quote_ident(table)
    )
}

fn field_value(raw: Option<&str>, column: &DetectedColumn, config: &LoadConfig) -> Value {
    let raw = match raw {
        Some(raw) if !config.null_config.is_null(raw) => raw.trim(),
        _ => return Value::Null,
    };

    let parsed = match column.storage {
        StorageType::Integer => raw.parse::<i64>().ok().map(Value::Integer),
        StorageType::Real => raw.parse::<f64>().ok().map(Value::Real),
        StorageType::Timestamp => parse_timestamp_millis(raw).map(Value::Integer),
        StorageType::Text => None,
    };
    // Rows past the sample may not fit the detected type; keep them as text
    parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xf_core::data::AnalyticalEngine;
    use xf_core::{ColumnType, Query};
    use arrow::array::{Array, Float64Array, TimestampMillisecondArray};

    const FIRES: &str = "\
FireName,Longitude,Latitude,Acres,DateTime,Cause
lone creek,-120.5,38.25,150.5,2020-07-01 10:00:00,Human
,-119.0,38.5,N/A,2020-08-03,Natural
big one,-100.0,40.0,12000,,Undetermined
";

    #[tokio::test]
    async fn test_loads_rows_with_typed_columns() {
        let engine = SqliteEngine::in_memory("wildfires").unwrap();
        let rows = load_csv_reader(&engine, FIRES.as_bytes(), &LoadConfig::default()).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(engine.row_count().await.unwrap(), 3);

        let query = Query::table("wildfires")
            .column("Acres", ColumnType::Float64)
            .column("DateTime", ColumnType::TimestampMillis)
            .order_by("Longitude");
        let batch = engine.query(&query).await.unwrap();

        let acres = batch.column(0).as_any().downcast_ref::<Float64Array>().unwrap();
        let times = batch.column(1).as_any().downcast_ref::<TimestampMillisecondArray>().unwrap();
        // Ordered by longitude: -120.5, -119.0, -100.0
        assert_eq!(acres.value(0), 150.5);
        assert!(acres.is_null(1));
        assert_eq!(acres.value(2), 12000.0);
        assert_eq!(times.value(0), 1_593_597_600_000);
        assert!(times.is_null(2));
    }

    #[test]
    fn test_reload_replaces_table() {
        let engine = SqliteEngine::in_memory("wildfires").unwrap();
        load_csv_reader(&engine, FIRES.as_bytes(), &LoadConfig::default()).unwrap();
        let rows = load_csv_reader(&engine, "FireName,Acres\nsolo,1\n".as_bytes(), &LoadConfig::default()).unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_missing_header_is_an_error() {
        let engine = SqliteEngine::in_memory("wildfires").unwrap();
        let result = load_csv_reader(&engine, "".as_bytes(), &LoadConfig::default());
        assert!(result.is_err());
    }
}
