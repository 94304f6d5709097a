//! Map surface styling and query

use chrono::DateTime;
use xf_core::{ColumnType, DatasetConfig, Query};
use xf_data::{RenderBuffer, RenderSchema};

use crate::query_client::QueryTemplate;

/// RGBA color, unpremultiplied
pub type Rgba = [u8; 4];

/// Measure breakpoints (exclusive upper bounds) and their marker sizes
const SIZE_STEPS: [(f32, f32); 9] = [
    (100.0, 5.0),
    (500.0, 8.0),
    (2_500.0, 12.0),
    (10_000.0, 18.0),
    (50_000.0, 26.0),
    (100_000.0, 34.0),
    (250_000.0, 42.0),
    (500_000.0, 48.0),
    (1_000_000.0, 52.0),
];

/// Marker size for measures at or above the last breakpoint
pub const MEGA_MARKER_SIZE: f32 = 55.0;

/// Marker size in pixels for a row's measure. Monotonic step function.
pub fn marker_size(measure: f32) -> f32 {
    SIZE_STEPS
        .iter()
        .find(|(bound, _)| measure < *bound)
        .map(|(_, size)| *size)
        .unwrap_or(MEGA_MARKER_SIZE)
}

/// Marker color keyed by category
pub fn category_color(category: &str) -> Rgba {
    match category {
        "Natural" => [34, 139, 34, 140],
        "Human" => [220, 20, 60, 140],
        "Undetermined" => [128, 128, 128, 120],
        _ => [169, 169, 169, 100],
    }
}

/// Hover details for one map row
#[derive(Debug, Clone, PartialEq)]
pub struct Tooltip {
    /// Omitted when the row has no label
    pub name: Option<String>,
    pub acres: String,
    pub cause: String,
    pub date: String,
}

/// Tooltip for `row`. None while brushing, or when the row is out of range.
pub fn tooltip(buffer: &RenderBuffer, row: usize, brushing: bool) -> Option<Tooltip> {
    if brushing || row >= buffer.count {
        return None;
    }

    let name = buffer.labels.get(row).filter(|l| !l.is_empty()).cloned();
    Some(Tooltip {
        name,
        acres: format!("{} acres", format_thousands(buffer.measure[row] as f64)),
        cause: buffer.category(row).unwrap_or_default().to_string(),
        date: format_date(buffer.timestamp[row]),
    })
}

/// Whole number with `,` thousands separators ("12,345")
pub fn format_thousands(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        grouped.insert(0, '-');
    }
    grouped
}

/// "Jul 1, 2020"; a zero timestamp reads "Date unknown"
pub fn format_date(millis: i64) -> String {
    if millis == 0 {
        return "Date unknown".to_string();
    }
    match DateTime::from_timestamp_millis(millis) {
        Some(dt) => dt.format("%b %-d, %Y").to_string(),
        None => "Date unknown".to_string(),
    }
}

/// Query template for the map layer
pub fn map_query(dataset: &DatasetConfig) -> QueryTemplate {
    let table = dataset.table.clone();
    let columns = dataset.columns.clone();
    Box::new(move |filter| {
        Query::table(table.clone())
            .point(columns.longitude.as_str(), columns.latitude.as_str(), RenderSchema::GEOMETRY_COLUMN)
            .column(columns.measure.as_str(), ColumnType::Float64)
            .column(columns.timestamp.as_str(), ColumnType::TimestampMillis)
            .column(columns.category.as_str(), ColumnType::Utf8)
            .column(columns.label.as_str(), ColumnType::Utf8)
            .filter(filter.cloned())
    })
}
