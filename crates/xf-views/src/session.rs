//! Session root
//!
//! Owns the selection store and event bus and constructs every surface
//! against them: the map client with its brush, the month, year and cause
//! charts, and the filter panel.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use xf_core::{AnalyticalEngine, EventBus, SelectionStore, SessionConfig, SpatialColumns, SurfaceId};
use xf_data::{RenderBuffer, RenderMaterializer, RenderSchema};

use crate::brush::SpatialBrush;
use crate::charts::{ChartSpec, ChartView};
use crate::filters::FilterPanel;
use crate::map::{map_query, tooltip, Tooltip};
use crate::query_client::{QueryClient, QueryOutcome};
use crate::surface::{ChartSurface, HeadlessChart, HeadlessMap, MapSurface};
use crate::ViewContext;

/// Identity of the map surface in the selection
pub const MAP_SURFACE: &str = "map";

/// Rendering surfaces a session drives
#[derive(Clone)]
pub struct SessionSurfaces {
    pub map: Arc<dyn MapSurface>,
    pub month: Arc<dyn ChartSurface>,
    pub year: Arc<dyn ChartSurface>,
    pub cause: Arc<dyn ChartSurface>,
}

/// Headless surfaces with typed access to what they last received
pub struct HeadlessSurfaces {
    pub map: Arc<HeadlessMap>,
    pub month: Arc<HeadlessChart>,
    pub year: Arc<HeadlessChart>,
    pub cause: Arc<HeadlessChart>,
}

impl HeadlessSurfaces {
    pub fn new() -> Self {
        Self {
            map: Arc::new(HeadlessMap::new()),
            month: Arc::new(HeadlessChart::new("month")),
            year: Arc::new(HeadlessChart::new("year")),
            cause: Arc::new(HeadlessChart::new("cause")),
        }
    }

    pub fn surfaces(&self) -> SessionSurfaces {
        SessionSurfaces {
            map: self.map.clone(),
            month: self.month.clone(),
            year: self.year.clone(),
            cause: self.cause.clone(),
        }
    }
}

impl Default for HeadlessSurfaces {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Session {
    config: SessionConfig,
    ctx: ViewContext,
    events: Arc<EventBus>,
    map_identity: SurfaceId,
    map: Arc<QueryClient<RenderMaterializer>>,
    brush: SpatialBrush,
    month: ChartView,
    year: ChartView,
    cause: ChartView,
    filters: FilterPanel,
}

impl Session {
    /// Wire a session over `engine`. Nothing is queried until [`Session::load`].
    pub fn open(config: SessionConfig, engine: Arc<dyn AnalyticalEngine>, runtime: Handle, surfaces: SessionSurfaces) -> Self {
        let events = Arc::new(EventBus::new());
        let store = Arc::new(SelectionStore::new().with_events(events.clone()));
        let ctx = ViewContext {
            store: store.clone(),
            engine,
            runtime: runtime.clone(),
            events: Some(events.clone()),
        };
        let dataset = &config.dataset;
        let map_identity = SurfaceId::new(MAP_SURFACE);

        let map = {
            let surface = surfaces.map.clone();
            QueryClient::connect(
                &store,
                ctx.client_options(MAP_SURFACE, Some(map_identity.clone())),
                map_query(dataset),
                RenderMaterializer::new(RenderSchema::from_columns(&dataset.columns)),
                Box::new(move |buffer: Option<Arc<RenderBuffer>>| surface.show(buffer)),
            )
        };

        let brush = SpatialBrush::new(
            map_identity.clone(),
            store.clone(),
            SpatialColumns::new(dataset.columns.longitude.as_str(), dataset.columns.latitude.as_str()),
            config.brush.clone(),
            map.clone(),
            Some(events.clone()),
            runtime,
        );

        let month = ChartView::new(ChartSpec::month(dataset), &dataset.table, ctx.clone(), surfaces.month);
        let year = ChartView::new(ChartSpec::year(dataset), &dataset.table, ctx.clone(), surfaces.year);
        let cause = ChartView::new(ChartSpec::category(dataset), &dataset.table, ctx.clone(), surfaces.cause);
        let filters = FilterPanel::new(dataset, store);

        info!(
            "Session opened on table '{}' with {} selection consumers",
            dataset.table,
            ctx.store.consumer_count()
        );

        Self {
            config,
            ctx,
            events,
            map_identity,
            map,
            brush,
            month,
            year,
            cause,
            filters,
        }
    }

    /// Open over headless surfaces
    pub fn headless(config: SessionConfig, engine: Arc<dyn AnalyticalEngine>, runtime: Handle) -> (Self, HeadlessSurfaces) {
        let surfaces = HeadlessSurfaces::new();
        let session = Self::open(config, engine, runtime, surfaces.surfaces());
        (session, surfaces)
    }

    /// Query every surface under the current selection and wait for the
    /// results
    pub async fn load(&self) -> Vec<QueryOutcome> {
        let mut handles = vec![self.map.request(self.ctx.store.predicate_for(Some(&self.map_identity)))];
        for chart in self.charts() {
            handles.extend(chart.load());
        }
        Self::join(handles).await
    }

    /// Re-issue every filtered query with the predicate it last received and
    /// wait for the results
    pub async fn refresh(&self) -> Vec<QueryOutcome> {
        let mut handles = vec![self.map.refresh()];
        for chart in self.charts() {
            handles.push(chart.foreground_client().refresh());
        }
        Self::join(handles).await
    }

    async fn join(handles: Vec<JoinHandle<QueryOutcome>>) -> Vec<QueryOutcome> {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!("Query task did not complete: {}", err),
            }
        }
        outcomes
    }

    /// Tooltip for a map row; suppressed while brushing
    pub fn tooltip(&self, row: usize) -> Option<Tooltip> {
        let buffer = self.map.current()?;
        tooltip(&buffer, row, self.brush.is_active())
    }

    pub async fn row_count(&self) -> anyhow::Result<usize> {
        self.ctx.engine.row_count().await
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SelectionStore> {
        &self.ctx.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn map(&self) -> &Arc<QueryClient<RenderMaterializer>> {
        &self.map
    }

    pub fn brush(&self) -> &SpatialBrush {
        &self.brush
    }

    pub fn month(&self) -> &ChartView {
        &self.month
    }

    pub fn year(&self) -> &ChartView {
        &self.year
    }

    pub fn cause(&self) -> &ChartView {
        &self.cause
    }

    pub fn charts(&self) -> [&ChartView; 3] {
        [&self.month, &self.year, &self.cause]
    }

    pub fn filters(&self) -> &FilterPanel {
        &self.filters
    }
}
