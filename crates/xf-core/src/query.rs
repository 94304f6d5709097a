//! Table-scoped queries and the SQL compiler
//!
//! [`SqlCompiler`] is the only code that produces engine syntax. Identifiers
//! are double-quoted with embedded quotes doubled, and every value that can
//! originate from user interaction is emitted as a positional `?` parameter.
//! The only inlined literals are the constant meters-per-degree factor and
//! the `1 = 0` sentinel.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use serde::{Deserialize, Serialize};

use crate::expression::{Column, Expression, Literal};
use crate::predicate::{longitude_scale, METERS_PER_DEGREE};

/// Declared type of a result column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Float64,
    Int64,
    Utf8,
    Binary,
    /// Milliseconds since the Unix epoch
    TimestampMillis,
}

impl ColumnType {
    /// Arrow type of a column with this declared type
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::Binary => DataType::Binary,
            ColumnType::TimestampMillis => DataType::Timestamp(TimeUnit::Millisecond, None),
        }
    }
}

/// One output column of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// A stored column, optionally renamed
    Column {
        column: Column,
        alias: Option<String>,
        ty: ColumnType,
    },

    /// Binary point encoding built from two numeric columns
    Point {
        longitude: Column,
        latitude: Column,
        alias: String,
    },

    /// `COUNT(*)`
    CountAll { alias: String },
}

impl Projection {
    /// Name of the column in the result set
    pub fn output_name(&self) -> &str {
        match self {
            Projection::Column { column, alias, .. } => alias.as_deref().unwrap_or(column.name()),
            Projection::Point { alias, .. } => alias,
            Projection::CountAll { alias } => alias,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Projection::Column { ty, .. } => *ty,
            Projection::Point { .. } => ColumnType::Binary,
            Projection::CountAll { .. } => ColumnType::Int64,
        }
    }
}

/// A query against one logical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    table: String,
    projections: Vec<Projection>,
    filter: Option<Expression>,
    group_by: Vec<Column>,
    order_by: Vec<Column>,
}

impl Query {
    /// Start a query against `table`
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projections: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn column(self, name: impl Into<Column>, ty: ColumnType) -> Self {
        self.select(Projection::Column { column: name.into(), alias: None, ty })
    }

    pub fn column_as(self, name: impl Into<Column>, alias: impl Into<String>, ty: ColumnType) -> Self {
        self.select(Projection::Column {
            column: name.into(),
            alias: Some(alias.into()),
            ty,
        })
    }

    pub fn point(self, longitude: impl Into<Column>, latitude: impl Into<Column>, alias: impl Into<String>) -> Self {
        self.select(Projection::Point {
            longitude: longitude.into(),
            latitude: latitude.into(),
            alias: alias.into(),
        })
    }

    pub fn count(self, alias: impl Into<String>) -> Self {
        self.select(Projection::CountAll { alias: alias.into() })
    }

    /// Replace the filter. `None` queries the whole table.
    pub fn filter(mut self, filter: Option<Expression>) -> Self {
        self.filter = filter;
        self
    }

    pub fn group_by(mut self, column: impl Into<Column>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<Column>) -> Self {
        self.order_by.push(column.into());
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    pub fn filter_expression(&self) -> Option<&Expression> {
        self.filter.as_ref()
    }

    /// Result schema implied by the projections, in order
    pub fn schema(&self) -> Arc<Schema> {
        let fields: Vec<Field> = self
            .projections
            .iter()
            .map(|p| Field::new(p.output_name(), p.column_type().data_type(), true))
            .collect();
        Arc::new(Schema::new(fields))
    }

    pub fn compile(&self) -> CompiledSql {
        SqlCompiler::default().query(self)
    }
}

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub sql: String,
    pub params: Vec<Literal>,
}

/// Serializes [`Query`] and [`Expression`] values to SQL
#[derive(Debug, Default)]
pub struct SqlCompiler {
    sql: String,
    params: Vec<Literal>,
}

impl SqlCompiler {
    /// Compile a full query
    pub fn query(mut self, query: &Query) -> CompiledSql {
        self.sql.push_str("SELECT ");
        if query.projections.is_empty() {
            self.sql.push('*');
        }
        for (idx, projection) in query.projections.iter().enumerate() {
            if idx > 0 {
                self.sql.push_str(", ");
            }
            self.projection(projection);
        }

        self.sql.push_str(" FROM ");
        self.sql.push_str(&quote_ident(&query.table));

        if let Some(filter) = &query.filter {
            self.sql.push_str(" WHERE ");
            self.expression(filter);
        }
        if !query.group_by.is_empty() {
            self.sql.push_str(" GROUP BY ");
            self.sql.push_str(&column_list(&query.group_by));
        }
        if !query.order_by.is_empty() {
            self.sql.push_str(" ORDER BY ");
            self.sql.push_str(&column_list(&query.order_by));
        }

        self.finish()
    }

    /// Compile a bare predicate, e.g. for a `WHERE` clause built elsewhere
    pub fn predicate(mut self, expr: &Expression) -> CompiledSql {
        self.expression(expr);
        self.finish()
    }

    fn finish(self) -> CompiledSql {
        CompiledSql {
            sql: self.sql,
            params: self.params,
        }
    }

    fn projection(&mut self, projection: &Projection) {
        match projection {
            Projection::Column { column, alias, .. } => {
                self.sql.push_str(&quote_ident(column.name()));
                if let Some(alias) = alias {
                    self.sql.push_str(" AS ");
                    self.sql.push_str(&quote_ident(alias));
                }
            }
            Projection::Point { longitude, latitude, alias } => {
                self.sql.push_str(&format!(
                    "ST_AsWKB(ST_Point({}, {})) AS {}",
                    quote_ident(longitude.name()),
                    quote_ident(latitude.name()),
                    quote_ident(alias)
                ));
            }
            Projection::CountAll { alias } => {
                self.sql.push_str("COUNT(*) AS ");
                self.sql.push_str(&quote_ident(alias));
            }
        }
    }

    fn expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Never => self.sql.push_str("(1 = 0)"),
            Expression::Eq { column, value } => {
                self.sql.push_str(&quote_ident(column.name()));
                self.sql.push_str(" = ");
                self.param(value.clone());
            }
            Expression::IsNull { column } => {
                self.sql.push('(');
                self.sql.push_str(&quote_ident(column.name()));
                self.sql.push_str(" IS NULL)");
            }
            Expression::Range { column, min, max } => {
                let col = quote_ident(column.name());
                self.sql.push('(');
                self.sql.push_str(&col);
                self.sql.push_str(" >= ");
                self.param(Literal::Float(*min));
                self.sql.push_str(" AND ");
                self.sql.push_str(&col);
                self.sql.push_str(" < ");
                self.param(Literal::Float(*max));
                self.sql.push(')');
            }
            Expression::Within { longitude, latitude, lon, lat, radius_m } => {
                let lon_col = quote_ident(longitude.name());
                let lat_col = quote_ident(latitude.name());
                let kx = longitude_scale(*lat);

                // dx = (lon_col - lon) * kx, dy = (lat_col - lat) * 111320
                self.sql.push_str("((((");
                self.sql.push_str(&lon_col);
                self.sql.push_str(" - ");
                self.param(Literal::Float(*lon));
                self.sql.push_str(") * ");
                self.param(Literal::Float(kx));
                self.sql.push_str(") * ((");
                self.sql.push_str(&lon_col);
                self.sql.push_str(" - ");
                self.param(Literal::Float(*lon));
                self.sql.push_str(") * ");
                self.param(Literal::Float(kx));
                self.sql.push_str(&format!(")) + (((({lat_col} - "));
                self.param(Literal::Float(*lat));
                self.sql.push_str(&format!(") * {METERS_PER_DEGREE}) * (({lat_col} - "));
                self.param(Literal::Float(*lat));
                self.sql.push_str(&format!(") * {METERS_PER_DEGREE}))) < "));
                self.param(Literal::Float(radius_m * radius_m));
                self.sql.push(')');
            }
            Expression::And(operands) => self.junction(operands, " AND ", "(1 = 1)"),
            Expression::Or(operands) => self.junction(operands, " OR ", "(1 = 0)"),
        }
    }

    fn junction(&mut self, operands: &[Expression], separator: &str, identity: &str) {
        if operands.is_empty() {
            self.sql.push_str(identity);
            return;
        }
        self.sql.push('(');
        for (idx, operand) in operands.iter().enumerate() {
            if idx > 0 {
                self.sql.push_str(separator);
            }
            self.expression(operand);
        }
        self.sql.push(')');
    }

    fn param(&mut self, value: Literal) {
        self.sql.push('?');
        self.params.push(value);
    }
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.name()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{categorical_in, circular_distance, or_null};

    #[test]
    fn test_values_are_parameterized() {
        let hostile = "x' OR 1=1 --";
        let expr = categorical_in("Cause", &[hostile], &[]).unwrap();
        let compiled = SqlCompiler::default().predicate(&expr);

        assert_eq!(compiled.sql, "\"Cause\" = ?");
        assert_eq!(compiled.params, vec![Literal::Text(hostile.to_string())]);
    }

    #[test]
    fn test_null_test_compiles_without_params() {
        let expr = or_null(categorical_in("Cause", &["Unknown"], &[]), "Cause").unwrap();
        let compiled = SqlCompiler::default().predicate(&expr);

        assert_eq!(compiled.sql, "(\"Cause\" = ? OR (\"Cause\" IS NULL))");
        assert_eq!(compiled.params, vec![Literal::Text("Unknown".to_string())]);
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_ident("Fire\"Name"), "\"Fire\"\"Name\"");
    }

    #[test]
    fn test_full_query_shape() {
        let query = Query::table("wildfires")
            .column_as("Month", "key", ColumnType::Int64)
            .count("count")
            .filter(Some(Expression::Never))
            .group_by("Month")
            .order_by("Month");
        let compiled = query.compile();

        assert_eq!(
            compiled.sql,
            "SELECT \"Month\" AS \"key\", COUNT(*) AS \"count\" FROM \"wildfires\" \
             WHERE (1 = 0) GROUP BY \"Month\" ORDER BY \"Month\""
        );
        assert!(compiled.params.is_empty());

        let schema = query.schema();
        assert_eq!(schema.field(0).name(), "key");
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);
    }

    #[test]
    fn test_within_binds_center_and_squared_radius() {
        let compiled = SqlCompiler::default().predicate(&circular_distance(-120.0, 38.0, 1000.0));

        assert_eq!(compiled.params.len(), 7);
        assert_eq!(compiled.params[0], Literal::Float(-120.0));
        assert_eq!(compiled.params[6], Literal::Float(1_000_000.0));
        assert!(compiled.sql.contains("111320"));
        assert_eq!(compiled.sql.matches('?').count(), 7);
    }
}
