//! Aggregate charts
//!
//! A chart is both a consumer and a producer. Its foreground client is
//! registered under the chart's identity and so never sees the chart's own
//! clause; its background client is unregistered and shows the full,
//! unfiltered distribution behind it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::debug;
use xf_core::predicate::{categorical_in, numeric_range_union, or_null};
use xf_core::{ColumnType, DatasetConfig, NumericRange, Query, SurfaceId};
use xf_data::materialize::UNKNOWN_CATEGORY;
use xf_data::{ChartSeries, SeriesDecoder};

use crate::query_client::{ClientOptions, QueryClient, QueryOutcome, QueryTemplate};
use crate::surface::ChartSurface;
use crate::{ViewContext, ViewError};

/// How a chart selects
#[derive(Debug, Clone, PartialEq)]
pub enum ChartKind {
    /// Half-open interval over a numeric column
    Interval,
    /// Set of toggled values out of a fixed domain
    Toggle { domain: Vec<String> },
}

/// Which column a chart bins and how it selects
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub name: String,
    pub column: String,
    pub kind: ChartKind,
}

impl ChartSpec {
    pub fn month(dataset: &DatasetConfig) -> Self {
        Self {
            name: "month".to_string(),
            column: dataset.columns.month.clone(),
            kind: ChartKind::Interval,
        }
    }

    pub fn year(dataset: &DatasetConfig) -> Self {
        Self {
            name: "year".to_string(),
            column: dataset.columns.year.clone(),
            kind: ChartKind::Interval,
        }
    }

    pub fn category(dataset: &DatasetConfig) -> Self {
        Self {
            name: "cause".to_string(),
            column: dataset.columns.category.clone(),
            kind: ChartKind::Toggle {
                domain: dataset.categories.clone(),
            },
        }
    }

    fn key_type(&self) -> ColumnType {
        match self.kind {
            ChartKind::Interval => ColumnType::Int64,
            ChartKind::Toggle { .. } => ColumnType::Utf8,
        }
    }

    /// `SELECT column AS key, COUNT(*) AS count ... GROUP BY column ORDER BY column`
    fn template(&self, table: &str) -> QueryTemplate {
        let table = table.to_string();
        let column = self.column.clone();
        let key_type = self.key_type();
        Box::new(move |filter| {
            Query::table(table.clone())
                .column_as(column.as_str(), SeriesDecoder::KEY_COLUMN, key_type)
                .count(SeriesDecoder::COUNT_COLUMN)
                .filter(filter.cloned())
                .group_by(column.as_str())
                .order_by(column.as_str())
        })
    }
}

pub struct ChartView {
    identity: SurfaceId,
    spec: ChartSpec,
    ctx: ViewContext,
    foreground: Arc<QueryClient<SeriesDecoder>>,
    background: Arc<QueryClient<SeriesDecoder>>,
    toggled: Mutex<Vec<String>>,
}

impl ChartView {
    pub fn new(spec: ChartSpec, table: &str, ctx: ViewContext, surface: Arc<dyn ChartSurface>) -> Self {
        let identity = SurfaceId::new(&spec.name);

        let foreground = {
            let surface = surface.clone();
            QueryClient::connect(
                &ctx.store,
                ctx.client_options(&spec.name, Some(identity.clone())),
                spec.template(table),
                SeriesDecoder::default(),
                Box::new(move |series: Option<Arc<ChartSeries>>| surface.show_foreground(series)),
            )
        };

        let background = QueryClient::new(
            ClientOptions {
                name: format!("{}-background", spec.name),
                ..ctx.client_options(&spec.name, None)
            },
            spec.template(table),
            SeriesDecoder::default(),
            Box::new(move |series: Option<Arc<ChartSeries>>| surface.show_background(series)),
        );

        Self {
            identity,
            spec,
            ctx,
            foreground,
            background,
            toggled: Mutex::new(Vec::new()),
        }
    }

    /// Initial load: the unfiltered background and the foreground under the
    /// current selection
    pub fn load(&self) -> [JoinHandle<QueryOutcome>; 2] {
        let predicate = self.ctx.store.predicate_for(Some(&self.identity));
        [self.background.request(None), self.foreground.request(predicate)]
    }

    /// Select `[lo, hi)`; bounds given in either order
    pub fn select_interval(&self, lo: f64, hi: f64) -> Result<(), ViewError> {
        if self.spec.kind != ChartKind::Interval {
            return Err(self.unsupported("interval"));
        }
        let (lo, hi) = if lo > hi { (hi, lo) } else { (lo, hi) };
        let predicate = numeric_range_union(self.spec.column.as_str(), &[NumericRange::new(lo, hi)], &[]);
        debug!("{}: interval [{}, {})", self.spec.name, lo, hi);
        self.ctx.store.update(&self.identity, json!([lo, hi]), predicate)?;
        Ok(())
    }

    /// Flip `value` in the toggled set and submit the set. Returns the set
    /// now toggled; an empty set removes the chart's restriction.
    pub fn toggle(&self, value: &str) -> Result<Vec<String>, ViewError> {
        let domain = match &self.spec.kind {
            ChartKind::Toggle { domain } => domain,
            ChartKind::Interval => return Err(self.unsupported("toggle")),
        };

        let mut toggled = self.toggled.lock();
        match toggled.iter().position(|v| v == value) {
            Some(idx) => {
                toggled.remove(idx);
            }
            None => toggled.push(value.to_string()),
        }

        if toggled.is_empty() {
            self.ctx.store.clear(&self.identity)?;
        } else {
            let mut predicate = categorical_in(self.spec.column.as_str(), toggled.as_slice(), domain.as_slice());
            // Missing values are binned as Unknown
            if toggled.iter().any(|v| v == UNKNOWN_CATEGORY) {
                predicate = or_null(predicate, self.spec.column.as_str());
            }
            self.ctx.store.update(&self.identity, json!(toggled.as_slice()), predicate)?;
        }
        Ok(toggled.clone())
    }

    /// Remove this chart's restriction
    pub fn clear_selection(&self) -> Result<(), ViewError> {
        self.toggled.lock().clear();
        self.ctx.store.clear(&self.identity)?;
        Ok(())
    }

    pub fn identity(&self) -> &SurfaceId {
        &self.identity
    }

    pub fn spec(&self) -> &ChartSpec {
        &self.spec
    }

    pub fn foreground(&self) -> Option<Arc<ChartSeries>> {
        self.foreground.current()
    }

    pub fn background(&self) -> Option<Arc<ChartSeries>> {
        self.background.current()
    }

    pub fn foreground_client(&self) -> &Arc<QueryClient<SeriesDecoder>> {
        &self.foreground
    }

    fn unsupported(&self, interaction: &'static str) -> ViewError {
        ViewError::UnsupportedInteraction {
            surface: self.spec.name.clone(),
            interaction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Handle;
    use xf_core::{Expression, SelectionStore};
    use xf_data::{ChartKey, SqliteEngine};
    use crate::surface::HeadlessChart;

    fn engine() -> SqliteEngine {
        let engine = SqliteEngine::in_memory("wildfires").unwrap();
        engine
            .execute_batch(
                "CREATE TABLE wildfires (Month INTEGER, Year INTEGER, Cause TEXT, Acres REAL);
                 INSERT INTO wildfires VALUES (6, 2019, 'Human', 10.0);
                 INSERT INTO wildfires VALUES (7, 2020, 'Human', 200.0);
                 INSERT INTO wildfires VALUES (7, 2020, 'Natural', 5000.0);
                 INSERT INTO wildfires VALUES (8, 2021, 'Natural', 40.0);
                 INSERT INTO wildfires VALUES (9, 2021, NULL, 70.0);",
            )
            .unwrap();
        engine
    }

    fn context() -> ViewContext {
        ViewContext {
            store: Arc::new(SelectionStore::new()),
            engine: Arc::new(engine()),
            runtime: Handle::current(),
            events: None,
        }
    }

    async fn settle(handles: impl IntoIterator<Item = JoinHandle<QueryOutcome>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_chart_ignores_own_selection() {
        let ctx = context();
        let dataset = DatasetConfig::default();
        let month_surface = Arc::new(HeadlessChart::new("month"));
        let cause_surface = Arc::new(HeadlessChart::new("cause"));
        let month = ChartView::new(ChartSpec::month(&dataset), "wildfires", ctx.clone(), month_surface.clone());
        let cause = ChartView::new(ChartSpec::category(&dataset), "wildfires", ctx.clone(), cause_surface.clone());
        settle(month.load()).await;
        settle(cause.load()).await;
        assert_eq!(month_surface.total(), 5);

        month.select_interval(8.0, 7.0).unwrap();
        assert_eq!(
            ctx.store.predicate_for(Some(cause.identity())),
            Some(Expression::Range { column: "Month".into(), min: 7.0, max: 8.0 })
        );
        assert_eq!(ctx.store.predicate_for(Some(month.identity())), None);

        settle([cause.foreground_client().refresh()]).await;
        let series = cause.foreground().unwrap();
        assert_eq!(series.total(), 2);
        assert_eq!(series.count_for(&ChartKey::Text("Natural".to_string())), 1);

        // Background stays unfiltered
        assert_eq!(cause.background().unwrap().total(), 5);
        assert_eq!(cause_surface.background().unwrap().total(), 5);
    }

    #[tokio::test]
    async fn test_toggle_builds_and_clears_clause() {
        let ctx = context();
        let cause = ChartView::new(
            ChartSpec::category(&DatasetConfig::default()),
            "wildfires",
            ctx.clone(),
            Arc::new(HeadlessChart::new("cause")),
        );

        assert_eq!(cause.toggle("Human").unwrap(), vec!["Human".to_string()]);
        assert_eq!(
            ctx.store.predicate_for(None),
            Some(Expression::Eq { column: "Cause".into(), value: "Human".into() })
        );
        assert_eq!(ctx.store.clause(cause.identity()).unwrap().value, json!(["Human"]));

        assert!(cause.toggle("Human").unwrap().is_empty());
        assert!(ctx.store.clause(cause.identity()).is_none());

        for value in ["Natural", "Human", "Undetermined", "Unknown"] {
            cause.toggle(value).unwrap();
        }
        // Whole domain toggled imposes no restriction
        assert_eq!(ctx.store.predicate_for(None), None);
    }

    #[tokio::test]
    async fn test_unknown_bin_selects_missing_causes() {
        let ctx = context();
        let dataset = DatasetConfig::default();
        let month_surface = Arc::new(HeadlessChart::new("month"));
        let month = ChartView::new(ChartSpec::month(&dataset), "wildfires", ctx.clone(), month_surface.clone());
        let cause = ChartView::new(
            ChartSpec::category(&dataset),
            "wildfires",
            ctx.clone(),
            Arc::new(HeadlessChart::new("cause")),
        );
        settle(cause.load()).await;
        let shown = cause.background().unwrap().count_for(&ChartKey::Text("Unknown".to_string()));
        assert_eq!(shown, 1);

        cause.toggle("Unknown").unwrap();
        settle([month.foreground_client().refresh()]).await;

        let series = month_surface.foreground().unwrap();
        assert_eq!(series.total(), shown);
        assert_eq!(series.keys, vec![ChartKey::Number(9.0)]);
    }

    #[tokio::test]
    async fn test_wrong_interaction_is_rejected() {
        let ctx = context();
        let month = ChartView::new(
            ChartSpec::month(&DatasetConfig::default()),
            "wildfires",
            ctx,
            Arc::new(HeadlessChart::new("month")),
        );
        assert!(matches!(month.toggle("7"), Err(ViewError::UnsupportedInteraction { .. })));
        assert!(matches!(month.select_interval(f64::NAN, 3.0), Err(ViewError::Selection(_))));
    }
}
