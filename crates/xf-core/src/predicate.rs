//! Predicate constructors
//!
//! Every constructor returns `Option<Expression>`: `None` means "no
//! restriction" and is dropped by [`and`], while a selection that admits
//! nothing is the explicit [`Expression::Never`].

use serde::{Deserialize, Serialize};

use crate::expression::{Column, Expression, Literal};

/// Meters per degree of latitude (and of longitude at the equator)
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Half-open numeric interval `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Columns holding point coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialColumns {
    pub longitude: Column,
    pub latitude: Column,
}

impl Default for SpatialColumns {
    fn default() -> Self {
        Self {
            longitude: Column::new("Longitude"),
            latitude: Column::new("Latitude"),
        }
    }
}

impl SpatialColumns {
    pub fn new(longitude: impl Into<Column>, latitude: impl Into<Column>) -> Self {
        Self {
            longitude: longitude.into(),
            latitude: latitude.into(),
        }
    }

    /// Rows within `radius_m` meters of `(lon, lat)`.
    ///
    /// Uses the equirectangular approximation: the longitude delta is scaled
    /// by `cos(lat)` and both deltas by [`METERS_PER_DEGREE`], and the squared
    /// planar distance is compared against `radius_m²`. For radii up to
    /// 300 km the deviation from great-circle distance stays within about
    /// 0.5% at mid-latitudes. That error is accepted.
    pub fn circular_distance(&self, lon: f64, lat: f64, radius_m: f64) -> Expression {
        Expression::Within {
            longitude: self.longitude.clone(),
            latitude: self.latitude.clone(),
            lon,
            lat,
            radius_m,
        }
    }
}

/// [`SpatialColumns::circular_distance`] over the default coordinate columns
pub fn circular_distance(lon: f64, lat: f64, radius_m: f64) -> Expression {
    SpatialColumns::default().circular_distance(lon, lat, radius_m)
}

/// Longitude scale factor (meters per degree) at the given latitude
pub fn longitude_scale(lat: f64) -> f64 {
    METERS_PER_DEGREE * (lat * std::f64::consts::PI / 180.0).cos()
}

/// Rows whose `column` equals one of `allowed`.
///
/// Returns `None` when `allowed` covers every value of a non-empty `domain`,
/// and [`Expression::Never`] when `allowed` is empty.
pub fn categorical_in<T>(column: impl Into<Column>, allowed: &[T], domain: &[T]) -> Option<Expression>
where
    T: Clone + PartialEq + Into<Literal>,
{
    if allowed.is_empty() {
        return Some(Expression::Never);
    }
    if !domain.is_empty() && domain.iter().all(|value| allowed.contains(value)) {
        return None;
    }

    let column = column.into();
    let mut seen: Vec<&T> = Vec::with_capacity(allowed.len());
    let mut clauses = Vec::with_capacity(allowed.len());
    for value in allowed {
        if seen.contains(&value) {
            continue;
        }
        seen.push(value);
        clauses.push(Expression::Eq {
            column: column.clone(),
            value: value.clone().into(),
        });
    }
    Some(disjunction(clauses))
}

/// Rows whose `column` falls in any of the half-open `ranges`.
///
/// Same empty/full handling as [`categorical_in`]; an empty `domain` is
/// unbounded and is never considered covered.
pub fn numeric_range_union(
    column: impl Into<Column>,
    ranges: &[NumericRange],
    domain: &[NumericRange],
) -> Option<Expression> {
    if ranges.is_empty() {
        return Some(Expression::Never);
    }
    if !domain.is_empty() && domain.iter().all(|range| ranges.contains(range)) {
        return None;
    }

    let column = column.into();
    let clauses = ranges
        .iter()
        .map(|range| Expression::Range {
            column: column.clone(),
            min: range.min,
            max: range.max,
        })
        .collect();
    Some(disjunction(clauses))
}

/// Widen `predicate` to also admit rows where `column` is NULL.
///
/// No restriction stays no restriction; [`Expression::Never`] becomes the
/// null test alone.
pub fn or_null(predicate: Option<Expression>, column: impl Into<Column>) -> Option<Expression> {
    let is_null = Expression::IsNull { column: column.into() };
    match predicate? {
        Expression::Never => Some(is_null),
        Expression::Or(mut clauses) => {
            clauses.push(is_null);
            Some(Expression::Or(clauses))
        }
        other => Some(Expression::Or(vec![other, is_null])),
    }
}

/// Conjunction of the present predicates. `None` entries are no restriction.
pub fn and<I>(predicates: I) -> Option<Expression>
where
    I: IntoIterator<Item = Option<Expression>>,
{
    let mut operands = Vec::new();
    for predicate in predicates.into_iter().flatten() {
        match predicate {
            Expression::And(nested) => operands.extend(nested),
            other => operands.push(other),
        }
    }

    match operands.len() {
        0 => None,
        1 => operands.pop(),
        _ => Some(Expression::And(operands)),
    }
}

fn disjunction(mut clauses: Vec<Expression>) -> Expression {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Expression::Or(clauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAUSES: [&str; 3] = ["Natural", "Human", "Undetermined"];

    #[test]
    fn test_categorical_empty_and_full() {
        assert_eq!(categorical_in("Cause", &[] as &[&str], &CAUSES), Some(Expression::Never));
        assert_eq!(categorical_in("Cause", &CAUSES, &CAUSES), None);
    }

    #[test]
    fn test_categorical_partial_builds_or_without_duplicates() {
        let expr = categorical_in("Cause", &["Human", "Natural", "Human"], &CAUSES);
        assert_eq!(
            expr,
            Some(Expression::Or(vec![
                Expression::Eq { column: "Cause".into(), value: "Human".into() },
                Expression::Eq { column: "Cause".into(), value: "Natural".into() },
            ]))
        );

        let single = categorical_in("Cause", &["Human"], &CAUSES);
        assert!(matches!(single, Some(Expression::Eq { .. })));
    }

    #[test]
    fn test_or_null_widens_without_restricting() {
        let is_null = Expression::IsNull { column: "Cause".into() };
        assert_eq!(or_null(None, "Cause"), None);
        assert_eq!(or_null(Some(Expression::Never), "Cause"), Some(is_null.clone()));

        let human = Expression::Eq { column: "Cause".into(), value: "Human".into() };
        assert_eq!(
            or_null(Some(human.clone()), "Cause"),
            Some(Expression::Or(vec![human.clone(), is_null.clone()]))
        );

        let pair = categorical_in("Cause", &["Human", "Natural"], &CAUSES);
        let natural = Expression::Eq { column: "Cause".into(), value: "Natural".into() };
        assert_eq!(or_null(pair, "Cause"), Some(Expression::Or(vec![human, natural, is_null])));
    }

    #[test]
    fn test_numeric_range_union_handling() {
        let small = NumericRange::new(0.0, 100.0);
        let large = NumericRange::new(100.0, 1000.0);

        assert_eq!(numeric_range_union("Acres", &[], &[small, large]), Some(Expression::Never));
        assert_eq!(numeric_range_union("Acres", &[large, small], &[small, large]), None);
        assert_eq!(
            numeric_range_union("Acres", &[small], &[small, large]),
            Some(Expression::Range { column: "Acres".into(), min: 0.0, max: 100.0 })
        );
        // Unbounded domain never counts as covered
        assert!(numeric_range_union("Month", &[small], &[]).is_some());
    }

    #[test]
    fn test_and_drops_none_and_flattens() {
        assert_eq!(and(vec![None, None]), None);

        let eq = Expression::Eq { column: "Cause".into(), value: "Human".into() };
        assert_eq!(and(vec![None, Some(eq.clone())]), Some(eq.clone()));

        let nested = Expression::And(vec![eq.clone(), Expression::Never]);
        let combined = and(vec![Some(nested), Some(circular_distance(0.0, 0.0, 10.0))]);
        match combined {
            Some(Expression::And(operands)) => assert_eq!(operands.len(), 3),
            other => panic!("expected conjunction, got {:?}", other),
        }
    }

    #[test]
    fn test_longitude_scale_shrinks_with_latitude() {
        assert!((longitude_scale(0.0) - METERS_PER_DEGREE).abs() < 1e-9);
        assert!((longitude_scale(60.0) - METERS_PER_DEGREE / 2.0).abs() < 1e-6);
    }
}
