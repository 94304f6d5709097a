//! Rendering surface boundary
//!
//! Surfaces receive whole results and replace what they show; `None` means
//! the query matched nothing and the layer should be cleared. The headless
//! implementations keep the latest result and log a summary, which is what
//! the command-line app and the tests render into.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use xf_data::{ChartSeries, RenderBuffer};

/// Map layer
pub trait MapSurface: Send + Sync {
    fn show(&self, buffer: Option<Arc<RenderBuffer>>);
}

/// Aggregate chart with a filtered foreground over an unfiltered background
pub trait ChartSurface: Send + Sync {
    fn show_foreground(&self, series: Option<Arc<ChartSeries>>);

    fn show_background(&self, series: Option<Arc<ChartSeries>>);
}

/// Map surface that only records what it was given
#[derive(Default)]
pub struct HeadlessMap {
    buffer: RwLock<Option<Arc<RenderBuffer>>>,
}

impl HeadlessMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> Option<Arc<RenderBuffer>> {
        self.buffer.read().clone()
    }

    /// Rows currently shown
    pub fn rows(&self) -> usize {
        self.buffer.read().as_ref().map(|b| b.count).unwrap_or(0)
    }
}

impl MapSurface for HeadlessMap {
    fn show(&self, buffer: Option<Arc<RenderBuffer>>) {
        match &buffer {
            Some(b) => info!("map: {} points ({} without geometry)", b.count, b.invalid_geometry),
            None => info!("map: no points"),
        }
        *self.buffer.write() = buffer;
    }
}

/// Chart surface that only records what it was given
pub struct HeadlessChart {
    name: String,
    foreground: RwLock<Option<Arc<ChartSeries>>>,
    background: RwLock<Option<Arc<ChartSeries>>>,
}

impl HeadlessChart {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            foreground: RwLock::new(None),
            background: RwLock::new(None),
        }
    }

    pub fn foreground(&self) -> Option<Arc<ChartSeries>> {
        self.foreground.read().clone()
    }

    pub fn background(&self) -> Option<Arc<ChartSeries>> {
        self.background.read().clone()
    }

    /// Row total of the filtered series
    pub fn total(&self) -> u64 {
        self.foreground.read().as_ref().map(|s| s.total()).unwrap_or(0)
    }
}

impl ChartSurface for HeadlessChart {
    fn show_foreground(&self, series: Option<Arc<ChartSeries>>) {
        let total = series.as_ref().map(|s| s.total()).unwrap_or(0);
        let bins = series.as_ref().map(|s| s.keys.len()).unwrap_or(0);
        info!("{}: {} rows in {} bins", self.name, total, bins);
        *self.foreground.write() = series;
    }

    fn show_background(&self, series: Option<Arc<ChartSeries>>) {
        *self.background.write() = series;
    }
}
