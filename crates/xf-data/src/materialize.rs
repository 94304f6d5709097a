//! Result materialization
//!
//! Converts column-oriented query results into row-aligned typed buffers.
//! Each decoder checks the columns it needs up front: a missing or
//! ill-typed column is a [`DataError`], while bad values inside a present
//! column fall back to documented defaults.

use std::collections::HashMap;

use arrow::array::{
    Array, ArrayRef, BinaryArray, Date32Array, Date64Array, Float32Array, Float64Array,
    GenericBinaryArray, Int32Array, Int64Array, LargeBinaryArray, OffsetSizeTrait, StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use tracing::debug;
use xf_core::ColumnMapping;

use crate::geometry::decode_point;
use crate::DataError;

/// Row count above which geometry decoding is spread across threads
const PARALLEL_DECODE_ROWS: usize = 16_384;

/// Category used when the category value is missing
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Decodes a query result into a surface's data
pub trait ResultDecoder: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// `Ok(None)` means the result had no rows.
    fn decode(&self, batch: &RecordBatch) -> Result<Option<Self::Output>, DataError>;

    /// Logical row count of a decoded output
    fn rows(output: &Self::Output) -> usize;
}

/// Row-aligned buffers consumed by the map surface.
///
/// Every per-row vector has `count` entries (`positions` has `2 * count`),
/// and index `i` refers to the same row everywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderBuffer {
    pub count: usize,
    /// Interleaved `lon, lat` pairs. Rows whose geometry failed to decode are `0, 0`.
    pub positions: Vec<f64>,
    /// Size measure; missing values are `0`
    pub measure: Vec<f32>,
    /// Epoch milliseconds; `0` means the date is unknown
    pub timestamp: Vec<i64>,
    /// Index into `categories` per row
    pub category_codes: Vec<u32>,
    /// Distinct categories in first-seen order
    pub categories: Vec<String>,
    /// Title-cased display labels; missing text is empty
    pub labels: Vec<String>,
    /// Rows whose geometry could not be decoded
    pub invalid_geometry: usize,
}

impl RenderBuffer {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn position(&self, row: usize) -> Option<(f64, f64)> {
        (row < self.count).then(|| (self.positions[row * 2], self.positions[row * 2 + 1]))
    }

    pub fn category(&self, row: usize) -> Option<&str> {
        let code = *self.category_codes.get(row)? as usize;
        self.categories.get(code).map(String::as_str)
    }
}

/// Result columns the map buffer is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSchema {
    pub geometry: String,
    pub measure: String,
    pub timestamp: String,
    pub category: String,
    pub label: String,
}

impl RenderSchema {
    /// Name of the encoded point column produced by map queries
    pub const GEOMETRY_COLUMN: &'static str = "wkb_geometry";

    pub fn from_columns(columns: &ColumnMapping) -> Self {
        Self {
            geometry: Self::GEOMETRY_COLUMN.to_string(),
            measure: columns.measure.clone(),
            timestamp: columns.timestamp.clone(),
            category: columns.category.clone(),
            label: columns.label.clone(),
        }
    }
}

impl Default for RenderSchema {
    fn default() -> Self {
        Self::from_columns(&ColumnMapping::default())
    }
}

/// Builds a [`RenderBuffer`] from a map query result
#[derive(Debug, Clone, Default)]
pub struct RenderMaterializer {
    schema: RenderSchema,
}

impl RenderMaterializer {
    pub fn new(schema: RenderSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &RenderSchema {
        &self.schema
    }

    pub fn materialize(&self, batch: &RecordBatch) -> Result<Option<RenderBuffer>, DataError> {
        let geometry = required(batch, &self.schema.geometry)?;
        let measure = required(batch, &self.schema.measure)?;
        let timestamp = required(batch, &self.schema.timestamp)?;
        let category = text_column(required(batch, &self.schema.category)?, &self.schema.category)?;
        let label = text_column(required(batch, &self.schema.label)?, &self.schema.label)?;

        let count = batch.num_rows();
        if count == 0 {
            return Ok(None);
        }

        let mut positions = vec![0.0f64; count * 2];
        let invalid_geometry = match geometry.data_type() {
            DataType::Binary => decode_positions(downcast::<BinaryArray>(geometry)?, &mut positions),
            DataType::LargeBinary => decode_positions(downcast::<LargeBinaryArray>(geometry)?, &mut positions),
            other => {
                return Err(DataError::ColumnType {
                    column: self.schema.geometry.clone(),
                    expected: "binary point",
                    found: other.to_string(),
                })
            }
        };
        if invalid_geometry > 0 {
            debug!("{} of {} rows had undecodable geometry", invalid_geometry, count);
        }

        let measure = numeric_f32(measure, &self.schema.measure)?;
        let timestamp = timestamp_millis(timestamp, &self.schema.timestamp)?;

        let mut categories: Vec<String> = Vec::new();
        let mut lookup: HashMap<&str, u32> = HashMap::new();
        let mut category_codes = Vec::with_capacity(count);
        for row in 0..count {
            let value = if category.is_null(row) { UNKNOWN_CATEGORY } else { category.value(row) };
            let code = *lookup.entry(value).or_insert_with(|| {
                categories.push(value.to_string());
                (categories.len() - 1) as u32
            });
            category_codes.push(code);
        }

        let labels = (0..count)
            .map(|row| if label.is_null(row) { String::new() } else { title_case(label.value(row)) })
            .collect();

        Ok(Some(RenderBuffer {
            count,
            positions,
            measure,
            timestamp,
            category_codes,
            categories,
            labels,
            invalid_geometry,
        }))
    }
}

impl ResultDecoder for RenderMaterializer {
    type Output = RenderBuffer;

    fn decode(&self, batch: &RecordBatch) -> Result<Option<RenderBuffer>, DataError> {
        self.materialize(batch)
    }

    fn rows(output: &RenderBuffer) -> usize {
        output.count
    }
}

/// Key of one chart bin
#[derive(Debug, Clone, PartialEq)]
pub enum ChartKey {
    Number(f64),
    Text(String),
}

/// Per-bin row counts for an aggregate chart
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartSeries {
    pub keys: Vec<ChartKey>,
    pub counts: Vec<u64>,
}

impl ChartSeries {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn count_for(&self, key: &ChartKey) -> u64 {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|idx| self.counts[idx])
            .unwrap_or(0)
    }
}

/// Decodes `key` / `count` aggregate results
#[derive(Debug, Clone)]
pub struct SeriesDecoder {
    key: String,
    count: String,
}

impl SeriesDecoder {
    pub const KEY_COLUMN: &'static str = "key";
    pub const COUNT_COLUMN: &'static str = "count";
}

impl Default for SeriesDecoder {
    fn default() -> Self {
        Self {
            key: Self::KEY_COLUMN.to_string(),
            count: Self::COUNT_COLUMN.to_string(),
        }
    }
}

impl ResultDecoder for SeriesDecoder {
    type Output = ChartSeries;

    fn decode(&self, batch: &RecordBatch) -> Result<Option<ChartSeries>, DataError> {
        let key = required(batch, &self.key)?;
        let count = required(batch, &self.count)?;
        let counts_array = match count.data_type() {
            DataType::Int64 => downcast::<Int64Array>(count)?,
            other => {
                return Err(DataError::ColumnType {
                    column: self.count.clone(),
                    expected: "Int64",
                    found: other.to_string(),
                })
            }
        };

        let rows = batch.num_rows();
        if rows == 0 {
            return Ok(None);
        }

        let keys: Vec<ChartKey> = match key.data_type() {
            DataType::Utf8 => {
                let array = downcast::<StringArray>(key)?;
                (0..rows)
                    .map(|i| {
                        let text = if array.is_null(i) { UNKNOWN_CATEGORY } else { array.value(i) };
                        ChartKey::Text(text.to_string())
                    })
                    .collect()
            }
            DataType::Int64 | DataType::Int32 | DataType::Float64 | DataType::Float32 => {
                let values = numeric_f64(key, &self.key)?;
                values.into_iter().map(ChartKey::Number).collect()
            }
            other => {
                return Err(DataError::ColumnType {
                    column: self.key.clone(),
                    expected: "text or numeric key",
                    found: other.to_string(),
                })
            }
        };

        // A missing key and a literal Unknown share one bin
        let mut series = ChartSeries { keys: Vec::with_capacity(rows), counts: Vec::with_capacity(rows) };
        for (i, key) in keys.into_iter().enumerate() {
            let count = if counts_array.is_null(i) { 0 } else { counts_array.value(i).max(0) as u64 };
            match series.keys.iter().position(|k| *k == key) {
                Some(idx) => series.counts[idx] += count,
                None => {
                    series.keys.push(key);
                    series.counts.push(count);
                }
            }
        }

        Ok(Some(series))
    }

    fn rows(output: &ChartSeries) -> usize {
        output.keys.len()
    }
}

/// Lower-case the text, then upper-case the first character of each word
/// ("LONE CREEK" becomes "Lone Creek"). Word characters are Unicode
/// alphanumerics and `_`, so accented letters never start a new word
/// ("ÉLAN" becomes "Élan", not "éLan").
pub fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_word = false;
    for ch in raw.chars().flat_map(char::to_lowercase) {
        let word_char = ch.is_alphanumeric() || ch == '_';
        if word_char && !in_word {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        in_word = word_char;
    }
    out
}

/// Parse a textual timestamp into epoch milliseconds (UTC).
pub fn parse_timestamp_millis(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(millis) = text.parse::<i64>() {
        return Some(millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y/%m/%d %H:%M:%S", "%m/%d/%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
        }
    }
    None
}

fn required<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, DataError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| DataError::MissingColumn(name.to_string()))
}

fn downcast<T: 'static>(column: &ArrayRef) -> Result<&T, DataError> {
    column
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| DataError::Unsupported(format!("unexpected array layout for {}", column.data_type())))
}

fn text_column<'a>(column: &'a ArrayRef, name: &str) -> Result<&'a StringArray, DataError> {
    match column.data_type() {
        DataType::Utf8 => downcast::<StringArray>(column),
        other => Err(DataError::ColumnType {
            column: name.to_string(),
            expected: "Utf8",
            found: other.to_string(),
        }),
    }
}

fn decode_positions<O: OffsetSizeTrait>(geometry: &GenericBinaryArray<O>, positions: &mut [f64]) -> usize {
    let decode_row = |row: usize, slot: &mut [f64]| -> usize {
        let decoded = if geometry.is_null(row) { None } else { decode_point(geometry.value(row)) };
        match decoded {
            Some((lon, lat)) => {
                slot[0] = lon;
                slot[1] = lat;
                0
            }
            None => 1,
        }
    };

    if geometry.len() >= PARALLEL_DECODE_ROWS {
        positions
            .par_chunks_mut(2)
            .enumerate()
            .map(|(row, slot)| decode_row(row, slot))
            .sum()
    } else {
        positions
            .chunks_mut(2)
            .enumerate()
            .map(|(row, slot)| decode_row(row, slot))
            .sum()
    }
}

fn numeric_f64(column: &ArrayRef, name: &str) -> Result<Vec<f64>, DataError> {
    let rows = column.len();
    macro_rules! collect {
        ($array:ty) => {{
            let array = downcast::<$array>(column)?;
            (0..rows)
                .map(|i| if array.is_null(i) { 0.0 } else { array.value(i) as f64 })
                .collect()
        }};
    }

    Ok(match column.data_type() {
        DataType::Float64 => collect!(Float64Array),
        DataType::Float32 => collect!(Float32Array),
        DataType::Int64 => collect!(Int64Array),
        DataType::Int32 => collect!(Int32Array),
        other => {
            return Err(DataError::ColumnType {
                column: name.to_string(),
                expected: "numeric",
                found: other.to_string(),
            })
        }
    })
}

fn numeric_f32(column: &ArrayRef, name: &str) -> Result<Vec<f32>, DataError> {
    Ok(numeric_f64(column, name)?.into_iter().map(|v| v as f32).collect())
}

fn timestamp_millis(column: &ArrayRef, name: &str) -> Result<Vec<i64>, DataError> {
    let rows = column.len();
    match column.data_type() {
        DataType::Int64 => {
            let array = downcast::<Int64Array>(column)?;
            Ok((0..rows).map(|i| if array.is_null(i) { 0 } else { array.value(i) }).collect())
        }
        DataType::Timestamp(unit, _) => {
            let raw = cast(column, &DataType::Int64)?;
            let array = downcast::<Int64Array>(&raw)?;
            let to_millis = |v: i64| match unit {
                TimeUnit::Second => v.saturating_mul(1000),
                TimeUnit::Millisecond => v,
                TimeUnit::Microsecond => v / 1_000,
                TimeUnit::Nanosecond => v / 1_000_000,
            };
            Ok((0..rows).map(|i| if array.is_null(i) { 0 } else { to_millis(array.value(i)) }).collect())
        }
        DataType::Date32 => {
            let array = downcast::<Date32Array>(column)?;
            Ok((0..rows)
                .map(|i| if array.is_null(i) { 0 } else { array.value(i) as i64 * 86_400_000 })
                .collect())
        }
        DataType::Date64 => {
            let array = downcast::<Date64Array>(column)?;
            Ok((0..rows).map(|i| if array.is_null(i) { 0 } else { array.value(i) }).collect())
        }
        DataType::Utf8 => {
            let array = downcast::<StringArray>(column)?;
            Ok((0..rows)
                .map(|i| {
                    if array.is_null(i) {
                        0
                    } else {
                        parse_timestamp_millis(array.value(i)).unwrap_or(0)
                    }
                })
                .collect())
        }
        other => Err(DataError::ColumnType {
            column: name.to_string(),
            expected: "timestamp",
            found: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use arrow::array::{BinaryBuilder, Float64Builder, Int64Builder, StringBuilder, TimestampMillisecondBuilder};
    use arrow::datatypes::{Field, Schema};
    use crate::geometry::encode_point;

    struct Row {
        point: Option<Vec<u8>>,
        acres: Option<f64>,
        time: Option<i64>,
        cause: Option<&'static str>,
        name: Option<&'static str>,
    }

    fn batch(rows: &[Row]) -> RecordBatch {
        let mut geometry = BinaryBuilder::new();
        let mut acres = Float64Builder::new();
        let mut time = TimestampMillisecondBuilder::new();
        let mut cause = StringBuilder::new();
        let mut name = StringBuilder::new();
        for row in rows {
            geometry.append_option(row.point.as_deref());
            acres.append_option(row.acres);
            time.append_option(row.time);
            cause.append_option(row.cause);
            name.append_option(row.name);
        }

        let schema = Schema::new(vec![
            Field::new("wkb_geometry", DataType::Binary, true),
            Field::new("Acres", DataType::Float64, true),
            Field::new("DateTime", DataType::Timestamp(TimeUnit::Millisecond, None), true),
            Field::new("Cause", DataType::Utf8, true),
            Field::new("FireName", DataType::Utf8, true),
        ]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(geometry.finish()),
            Arc::new(acres.finish()),
            Arc::new(time.finish()),
            Arc::new(cause.finish()),
            Arc::new(name.finish()),
        ];
        RecordBatch::try_new(Arc::new(schema), columns).unwrap()
    }

    #[test]
    fn test_zero_rows_is_none() {
        let result = RenderMaterializer::default().materialize(&batch(&[])).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_null_timestamp_defaults_to_zero() {
        let rows = [Row {
            point: Some(encode_point(-120.0, 38.0).to_vec()),
            acres: Some(1200.0),
            time: None,
            cause: Some("Human"),
            name: Some("LONE CREEK"),
        }];
        let buffer = RenderMaterializer::default().materialize(&batch(&rows)).unwrap().unwrap();

        assert_eq!(buffer.count, 1);
        assert_eq!(buffer.timestamp[0], 0);
        assert_eq!(buffer.position(0), Some((-120.0, 38.0)));
        assert_eq!(buffer.measure[0], 1200.0);
        assert_eq!(buffer.category(0), Some("Human"));
        assert_eq!(buffer.labels[0], "Lone Creek");
    }

    #[test]
    fn test_bad_rows_are_zero_filled_not_fatal() {
        let rows = [
            Row { point: Some(vec![1, 2, 3]), acres: None, time: Some(5), cause: None, name: None },
            Row {
                point: Some(encode_point(10.0, 20.0).to_vec()),
                acres: Some(7.5),
                time: Some(1_600_000_000_000),
                cause: Some("Natural"),
                name: Some("o'brien fire"),
            },
            Row { point: None, acres: Some(3.0), time: None, cause: Some("Natural"), name: Some("") },
        ];
        let buffer = RenderMaterializer::default().materialize(&batch(&rows)).unwrap().unwrap();

        assert_eq!(buffer.count, 3);
        assert_eq!(buffer.positions.len(), 6);
        assert_eq!(buffer.invalid_geometry, 2);
        assert_eq!(buffer.position(0), Some((0.0, 0.0)));
        assert_eq!(buffer.position(1), Some((10.0, 20.0)));
        assert_eq!(buffer.measure, vec![0.0, 7.5, 3.0]);
        assert_eq!(buffer.category(0), Some(UNKNOWN_CATEGORY));
        assert_eq!(buffer.categories, vec!["Unknown".to_string(), "Natural".to_string()]);
        assert_eq!(buffer.category_codes, vec![0, 1, 1]);
        assert_eq!(buffer.labels, vec!["".to_string(), "O'Brien Fire".to_string(), "".to_string()]);
    }

    #[test]
    fn test_missing_column_is_decode_error() {
        let schema = Schema::new(vec![Field::new("Acres", DataType::Float64, true)]);
        let mut acres = Float64Builder::new();
        acres.append_value(1.0);
        let batch = RecordBatch::try_new(Arc::new(schema), vec![Arc::new(acres.finish()) as ArrayRef]).unwrap();

        let err = RenderMaterializer::default().materialize(&batch).unwrap_err();
        assert!(matches!(err, DataError::MissingColumn(ref c) if c == "wkb_geometry"));
    }

    #[test]
    fn test_series_decoder() {
        let schema = Schema::new(vec![
            Field::new("key", DataType::Int64, true),
            Field::new("count", DataType::Int64, true),
        ]);
        let mut key = Int64Builder::new();
        let mut count = Int64Builder::new();
        for (k, c) in [(6, 40), (7, 55)] {
            key.append_value(k);
            count.append_value(c);
        }
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(key.finish()) as ArrayRef, Arc::new(count.finish()) as ArrayRef],
        )
        .unwrap();

        let series = SeriesDecoder::default().decode(&batch).unwrap().unwrap();
        assert_eq!(series.keys, vec![ChartKey::Number(6.0), ChartKey::Number(7.0)]);
        assert_eq!(series.total(), 95);
        assert_eq!(series.count_for(&ChartKey::Number(7.0)), 55);
    }

    #[test]
    fn test_missing_and_literal_unknown_share_a_bin() {
        let schema = Schema::new(vec![
            Field::new("key", DataType::Utf8, true),
            Field::new("count", DataType::Int64, true),
        ]);
        let mut key = StringBuilder::new();
        key.append_null();
        key.append_value("Human");
        key.append_value("Unknown");
        let mut count = Int64Builder::new();
        for c in [2, 5, 3] {
            count.append_value(c);
        }
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(key.finish()) as ArrayRef, Arc::new(count.finish()) as ArrayRef],
        )
        .unwrap();

        let series = SeriesDecoder::default().decode(&batch).unwrap().unwrap();
        assert_eq!(
            series.keys,
            vec![ChartKey::Text(UNKNOWN_CATEGORY.to_string()), ChartKey::Text("Human".to_string())]
        );
        assert_eq!(series.counts, vec![5, 5]);
    }

    #[test]
    fn test_title_case_and_timestamp_parsing() {
        assert_eq!(title_case("LONE CREEK"), "Lone Creek");
        assert_eq!(title_case("mc-fire 2"), "Mc-Fire 2");
        assert_eq!(title_case(""), "");
        assert_eq!(title_case("élan"), "Élan");
        assert_eq!(title_case("SAN JOSÉ RIDGE"), "San José Ridge");

        assert_eq!(parse_timestamp_millis("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_timestamp_millis("1970-01-01 00:00:01"), Some(1_000));
        assert_eq!(parse_timestamp_millis("2020-07-01T00:00:00Z"), Some(1_593_561_600_000));
        assert_eq!(parse_timestamp_millis("not a date"), None);
    }
}
