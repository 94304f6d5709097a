//! Typed filter expressions
//!
//! An [`Expression`] is the only form a filter takes inside the workspace.
//! Producers build them through the constructors in [`crate::predicate`],
//! the selection store combines them, and [`crate::query::SqlCompiler`] is
//! the single place that turns them into engine syntax.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A column reference. Quoted by the compiler, never spliced raw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column(String);

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Column {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Column {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value compared against a column. Always bound as a query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Text(value)
    }
}

impl From<&String> for Literal {
    fn from(value: &String) -> Self {
        Literal::Text(value.clone())
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

/// Boolean predicate over named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Rejects every row. Distinct from an empty disjunction.
    Never,

    /// `column = value`
    Eq { column: Column, value: Literal },

    /// `column IS NULL`
    IsNull { column: Column },

    /// Half-open `min <= column < max`
    Range { column: Column, min: f64, max: f64 },

    /// Rows whose `(longitude, latitude)` lie within `radius_m` meters of
    /// `(lon, lat)` under the equirectangular approximation.
    Within {
        longitude: Column,
        latitude: Column,
        lon: f64,
        lat: f64,
        radius_m: f64,
    },

    And(Vec<Expression>),

    Or(Vec<Expression>),
}

/// Structural defects in an [`Expression`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("column name is empty")]
    EmptyColumn,

    #[error("{what} is not a finite number")]
    NonFinite { what: &'static str },

    #[error("range on '{column}' is inverted ({min} > {max})")]
    InvertedRange { column: String, min: f64, max: f64 },

    #[error("radius must be positive, got {0}")]
    NonPositiveRadius(f64),

    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("{0} has no operands")]
    EmptyJunction(&'static str),
}

impl Expression {
    /// Whether this expression is the explicit reject-all sentinel
    pub fn is_never(&self) -> bool {
        matches!(self, Expression::Never)
    }

    /// Check that the expression is well formed and compilable.
    pub fn validate(&self) -> Result<(), ExpressionError> {
        match self {
            Expression::Never => Ok(()),
            Expression::Eq { column, value } => {
                check_column(column)?;
                if let Literal::Float(v) = value {
                    check_finite(*v, "comparison value")?;
                }
                Ok(())
            }
            Expression::IsNull { column } => check_column(column),
            Expression::Range { column, min, max } => {
                check_column(column)?;
                check_finite(*min, "range minimum")?;
                check_finite(*max, "range maximum")?;
                if min > max {
                    return Err(ExpressionError::InvertedRange {
                        column: column.name().to_string(),
                        min: *min,
                        max: *max,
                    });
                }
                Ok(())
            }
            Expression::Within { longitude, latitude, lon, lat, radius_m } => {
                check_column(longitude)?;
                check_column(latitude)?;
                check_finite(*lon, "longitude")?;
                check_finite(*lat, "latitude")?;
                check_finite(*radius_m, "radius")?;
                if !(-90.0..=90.0).contains(lat) {
                    return Err(ExpressionError::LatitudeOutOfRange(*lat));
                }
                if *radius_m <= 0.0 {
                    return Err(ExpressionError::NonPositiveRadius(*radius_m));
                }
                Ok(())
            }
            Expression::And(operands) => validate_junction(operands, "conjunction"),
            Expression::Or(operands) => validate_junction(operands, "disjunction"),
        }
    }
}

fn check_column(column: &Column) -> Result<(), ExpressionError> {
    if column.name().trim().is_empty() {
        Err(ExpressionError::EmptyColumn)
    } else {
        Ok(())
    }
}

fn check_finite(value: f64, what: &'static str) -> Result<(), ExpressionError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ExpressionError::NonFinite { what })
    }
}

fn validate_junction(operands: &[Expression], kind: &'static str) -> Result<(), ExpressionError> {
    if operands.is_empty() {
        return Err(ExpressionError::EmptyJunction(kind));
    }
    operands.iter().try_for_each(Expression::validate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverted_range_is_rejected() {
        let expr = Expression::Range { column: "Acres".into(), min: 10.0, max: 1.0 };
        assert!(matches!(expr.validate(), Err(ExpressionError::InvertedRange { .. })));
    }

    #[test]
    fn test_empty_or_is_malformed_but_never_is_fine() {
        assert_eq!(
            Expression::Or(vec![]).validate(),
            Err(ExpressionError::EmptyJunction("disjunction"))
        );
        assert!(Expression::Never.validate().is_ok());
    }

    #[test]
    fn test_within_checks_radius_and_latitude() {
        let mut expr = Expression::Within {
            longitude: "Longitude".into(),
            latitude: "Latitude".into(),
            lon: -120.0,
            lat: 38.0,
            radius_m: 0.0,
        };
        assert_eq!(expr.validate(), Err(ExpressionError::NonPositiveRadius(0.0)));

        if let Expression::Within { radius_m, lat, .. } = &mut expr {
            *radius_m = 1000.0;
            *lat = 91.0;
        }
        assert_eq!(expr.validate(), Err(ExpressionError::LatitudeOutOfRange(91.0)));
    }

    #[test]
    fn test_nested_defect_is_found() {
        let expr = Expression::And(vec![
            Expression::Eq { column: "Cause".into(), value: "Human".into() },
            Expression::Eq { column: " ".into(), value: Literal::Float(f64::NAN) },
        ]);
        assert_eq!(expr.validate(), Err(ExpressionError::EmptyColumn));
        assert_eq!(Expression::IsNull { column: "".into() }.validate(), Err(ExpressionError::EmptyColumn));
    }
}
