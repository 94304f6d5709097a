//! Linked surfaces for the crossfilter session
//!
//! Query clients, the spatial brush, charts, the filter panel and the
//! session root that wires them to one shared selection.

pub mod brush;
pub mod charts;
pub mod filters;
pub mod map;
pub mod query_client;
pub mod session;
pub mod surface;

pub use brush::{BrushState, BrushThrottle, SpatialBrush};
pub use charts::{ChartKind, ChartSpec, ChartView};
pub use filters::{CauseFilter, FilterPanel, SizeClass};
pub use map::{category_color, marker_size, Tooltip};
pub use query_client::{ClientOptions, QueryClient, QueryOutcome, UnfilteredReload};
pub use session::{Session, SessionSurfaces};
pub use surface::{ChartSurface, HeadlessChart, HeadlessMap, MapSurface};

use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use xf_core::{AnalyticalEngine, EventBus, SelectionError, SelectionStore, SurfaceId};

#[derive(Error, Debug)]
pub enum ViewError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("surface '{surface}' does not support {interaction} selection")]
    UnsupportedInteraction {
        surface: String,
        interaction: &'static str,
    },
}

/// Shared handles every surface is constructed with
#[derive(Clone)]
pub struct ViewContext {
    pub store: Arc<SelectionStore>,
    pub engine: Arc<dyn AnalyticalEngine>,
    pub runtime: Handle,
    pub events: Option<Arc<EventBus>>,
}

impl ViewContext {
    pub fn client_options(&self, name: &str, identity: Option<SurfaceId>) -> ClientOptions {
        ClientOptions {
            name: name.to_string(),
            identity,
            engine: self.engine.clone(),
            runtime: self.runtime.clone(),
            events: self.events.clone(),
        }
    }
}
