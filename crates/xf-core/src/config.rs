//! Session configuration

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration for a linked-selection session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub dataset: DatasetConfig,
    pub brush: BrushConfig,
}

/// Table and column names of the analytical dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub table: String,
    pub columns: ColumnMapping,
    /// Category domain shown by the category chart and filter panel
    pub categories: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            table: "wildfires".to_string(),
            columns: ColumnMapping::default(),
            categories: vec![
                "Natural".to_string(),
                "Human".to_string(),
                "Undetermined".to_string(),
                "Unknown".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub longitude: String,
    pub latitude: String,
    /// Numeric size column driving symbol size
    pub measure: String,
    pub timestamp: String,
    pub category: String,
    /// Raw text normalized into display labels
    pub label: String,
    pub month: String,
    pub year: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            longitude: "Longitude".to_string(),
            latitude: "Latitude".to_string(),
            measure: "Acres".to_string(),
            timestamp: "DateTime".to_string(),
            category: "Cause".to_string(),
            label: "FireName".to_string(),
            month: "Month".to_string(),
            year: "Year".to_string(),
        }
    }
}

/// Spatial brush settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushConfig {
    /// Minimum spacing between emitted brush predicates
    pub min_interval_ms: u64,
    pub default_radius_m: f64,
    pub min_radius_m: f64,
    pub max_radius_m: f64,
    pub radius_step_m: f64,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 50,
            default_radius_m: 50_000.0,
            min_radius_m: 5_000.0,
            max_radius_m: 300_000.0,
            radius_step_m: 5_000.0,
        }
    }
}

impl BrushConfig {
    /// Clamp to the supported range and snap to the step
    pub fn normalize_radius(&self, radius_m: f64) -> f64 {
        if !radius_m.is_finite() {
            return self.default_radius_m;
        }
        let clamped = radius_m.clamp(self.min_radius_m, self.max_radius_m);
        if self.radius_step_m > 0.0 {
            let snapped = (clamped / self.radius_step_m).round() * self.radius_step_m;
            snapped.clamp(self.min_radius_m, self.max_radius_m)
        } else {
            clamped
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
