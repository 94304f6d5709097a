//! Cause and size-class filter panel

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use xf_core::predicate::{and, categorical_in, numeric_range_union, or_null};
use xf_core::{DatasetConfig, Expression, NumericRange, SelectionStore, SurfaceId};

use crate::ViewError;

/// Cause toggles. `Undetermined` also admits rows whose cause is `Unknown`
/// or missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseFilter {
    Natural,
    Human,
    Undetermined,
}

impl CauseFilter {
    pub const ALL: [CauseFilter; 3] = [CauseFilter::Natural, CauseFilter::Human, CauseFilter::Undetermined];

    /// Category values admitted by this toggle
    fn values(&self) -> &'static [&'static str] {
        match self {
            CauseFilter::Natural => &["Natural"],
            CauseFilter::Human => &["Human"],
            CauseFilter::Undetermined => &["Undetermined", "Unknown"],
        }
    }
}

/// Measure size classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    Major,
}

impl SizeClass {
    pub const ALL: [SizeClass; 4] = [SizeClass::Small, SizeClass::Medium, SizeClass::Large, SizeClass::Major];

    pub fn range(&self) -> NumericRange {
        match self {
            SizeClass::Small => NumericRange::new(0.0, 100.0),
            SizeClass::Medium => NumericRange::new(100.0, 1_000.0),
            SizeClass::Large => NumericRange::new(1_000.0, 10_000.0),
            SizeClass::Major => NumericRange::new(10_000.0, 999_999_999.0),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
            SizeClass::Major => "major",
        }
    }
}

struct FilterState {
    causes: Vec<CauseFilter>,
    sizes: Vec<SizeClass>,
}

/// Filter panel producing a single clause. Starts with everything selected.
pub struct FilterPanel {
    identity: SurfaceId,
    store: Arc<SelectionStore>,
    category_column: String,
    measure_column: String,
    state: Mutex<FilterState>,
}

impl FilterPanel {
    pub fn new(dataset: &DatasetConfig, store: Arc<SelectionStore>) -> Self {
        Self {
            identity: SurfaceId::new("filters"),
            store,
            category_column: dataset.columns.category.clone(),
            measure_column: dataset.columns.measure.clone(),
            state: Mutex::new(FilterState {
                causes: CauseFilter::ALL.to_vec(),
                sizes: SizeClass::ALL.to_vec(),
            }),
        }
    }

    pub fn set_cause(&self, cause: CauseFilter, shown: bool) -> Result<(), ViewError> {
        {
            let mut state = self.state.lock();
            state.causes.retain(|c| *c != cause);
            if shown {
                state.causes.push(cause);
            }
        }
        self.apply()
    }

    pub fn set_size(&self, size: SizeClass, shown: bool) -> Result<(), ViewError> {
        {
            let mut state = self.state.lock();
            state.sizes.retain(|s| *s != size);
            if shown {
                state.sizes.push(size);
            }
        }
        self.apply()
    }

    /// Current filter as a single predicate. Nothing shown in either group
    /// selects nothing; everything shown is no restriction.
    pub fn predicate(&self) -> Option<Expression> {
        let state = self.state.lock();

        let allowed: Vec<&str> = CauseFilter::ALL
            .iter()
            .filter(|c| state.causes.contains(*c))
            .flat_map(|c| c.values().iter().copied())
            .collect();
        let domain: Vec<&str> = CauseFilter::ALL.iter().flat_map(|c| c.values().iter().copied()).collect();
        let mut causes = categorical_in(self.category_column.as_str(), allowed.as_slice(), domain.as_slice());
        if state.causes.contains(&CauseFilter::Undetermined) {
            causes = or_null(causes, self.category_column.as_str());
        }

        let ranges: Vec<NumericRange> = SizeClass::ALL
            .iter()
            .filter(|s| state.sizes.contains(*s))
            .map(SizeClass::range)
            .collect();
        let all_ranges: Vec<NumericRange> = SizeClass::ALL.iter().map(SizeClass::range).collect();
        let sizes = numeric_range_union(self.measure_column.as_str(), ranges.as_slice(), all_ranges.as_slice());

        if causes.as_ref().is_some_and(Expression::is_never) || sizes.as_ref().is_some_and(Expression::is_never) {
            return Some(Expression::Never);
        }
        and([causes, sizes])
    }

    /// Submit the current filter as the `filters` clause
    pub fn apply(&self) -> Result<(), ViewError> {
        let value = {
            let state = self.state.lock();
            json!({
                "causes": state.causes.iter().map(|c| format!("{c:?}")).collect::<Vec<_>>(),
                "sizes": state.sizes.iter().map(SizeClass::name).collect::<Vec<_>>(),
            })
        };
        self.store.update(&self.identity, value, self.predicate())?;
        Ok(())
    }

    pub fn identity(&self) -> &SurfaceId {
        &self.identity
    }
}
