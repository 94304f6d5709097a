use std::collections::HashSet;

use crate::config::NullConfig;
use crate::materialize::parse_timestamp_millis;

/// Storage type chosen for a loaded column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Integer,
    Real,
    /// Stored as INTEGER epoch milliseconds
    Timestamp,
    Text,
}

impl StorageType {
    /// SQLite column affinity
    pub fn sql_type(&self) -> &'static str {
        match self {
            StorageType::Integer | StorageType::Timestamp => "INTEGER",
            StorageType::Real => "REAL",
            StorageType::Text => "TEXT",
        }
    }
}

/// Schema detector for analyzing sampled rows and choosing column types
pub struct SchemaDetector {
    sample_size: usize,
}

/// A detected column
#[derive(Debug, Clone)]
pub struct DetectedColumn {
    pub name: String,
    pub storage: StorageType,
    pub stats: ColumnStats,
}

/// Statistics about a sampled column
#[derive(Debug, Clone, Default)]
pub struct ColumnStats {
    pub null_count: usize,
    pub distinct_count: usize,
}

impl SchemaDetector {
    pub fn new() -> Self {
        Self {
            sample_size: 1000,
        }
    }

    /// Set the sample size for detection
    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.sample_size = size.max(1);
        self
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Detect column types from sampled rows
    pub fn detect_from_samples(
        &self,
        headers: &[String],
        samples: &[Vec<String>],
        nulls: &NullConfig,
    ) -> Vec<DetectedColumn> {
        let samples = &samples[..samples.len().min(self.sample_size)];
        headers
            .iter()
            .enumerate()
            .map(|(col_idx, header)| {
                let (storage, stats) = Self::analyze_column(samples, col_idx, nulls);
                DetectedColumn {
                    name: header.clone(),
                    storage,
                    stats,
                }
            })
            .collect()
    }

    fn analyze_column(samples: &[Vec<String>], col_idx: usize, nulls: &NullConfig) -> (StorageType, ColumnStats) {
        let mut null_count = 0;
        let mut distinct = HashSet::new();
        let mut is_int = true;
        let mut is_float = true;
        let mut is_timestamp = true;

        for row in samples {
            let value = match row.get(col_idx) {
                Some(value) if !nulls.is_null(value) => value.trim(),
                _ => {
                    null_count += 1;
                    continue;
                }
            };
            distinct.insert(value);

            if is_int && value.parse::<i64>().is_err() {
                is_int = false;
            }
            if is_float && value.parse::<f64>().is_err() {
                is_float = false;
            }
            if is_timestamp && (value.parse::<f64>().is_ok() || parse_timestamp_millis(value).is_none()) {
                is_timestamp = false;
            }
        }

        let storage = if distinct.is_empty() {
            StorageType::Text
        } else if is_int {
            StorageType::Integer
        } else if is_float {
            StorageType::Real
        } else if is_timestamp {
            StorageType::Timestamp
        } else {
            StorageType::Text
        };

        let stats = ColumnStats {
            null_count,
            distinct_count: distinct.len(),
        };
        (storage, stats)
    }
}

impl Default for SchemaDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[&[&str]]) -> Vec<Vec<String>> {
        values.iter().map(|r| r.iter().map(|v| v.to_string()).collect()).collect()
    }

    #[test]
    fn test_detects_storage_types() {
        let headers: Vec<String> = ["Month", "Acres", "DateTime", "Cause"].iter().map(|s| s.to_string()).collect();
        let samples = rows(&[
            &["7", "12.5", "2020-07-01 10:00:00", "Human"],
            &["8", "-", "2020-08-03", "Natural"],
            &["", "100", "N/A", "Human"],
        ]);

        let detected = SchemaDetector::new().detect_from_samples(&headers, &samples, &NullConfig::default());
        let storage: Vec<StorageType> = detected.iter().map(|c| c.storage).collect();

        assert_eq!(
            storage,
            vec![StorageType::Integer, StorageType::Real, StorageType::Timestamp, StorageType::Text]
        );
        assert_eq!(detected[0].stats.null_count, 1);
        assert_eq!(detected[3].stats.distinct_count, 2);
    }
}
