//! Loading configuration

pub mod null_handling;

pub use null_handling::NullConfig;

use serde::{Deserialize, Serialize};

/// Options for loading a delimited file into the engine table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub delimiter: u8,
    /// Rows sampled for column type detection
    pub sample_size: usize,
    /// Rows per insert transaction
    pub batch_size: usize,
    pub null_config: NullConfig,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            sample_size: 1000,
            batch_size: 10_000,
            null_config: NullConfig::default(),
        }
    }
}
