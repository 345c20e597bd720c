//! Group-by query plans and execution
//!
//! A [`GroupQuery`] is the pipeline's unit of work: optional row filters,
//! group-by keys, aggregations, then an optional ordering and limit.
//!
//! ## Supported operations
//!
//! - Filters: set membership on a text column, numeric comparison, not-null
//! - Aggregations: COUNT, SUM, AVG, MIN, MAX, COUNT DISTINCT
//! - ORDER BY a single output column (stable), LIMIT
//!
//! Groups come out in ascending key order, and ordering is stable, so ties
//! keep key order. Rows with a null key are skipped.
//!
//! ```rust
//! use tally::query::{GroupQuery, OrderDirection};
//!
//! let query = GroupQuery::new(["countryCode", "gender"])
//!     .count("count")
//!     .order_by("count", OrderDirection::Desc)
//!     .limit(10);
//! assert_eq!(query.group_by, vec!["countryCode", "gender"]);
//! ```

pub mod executor;

pub use executor::QueryExecutor;

use std::collections::BTreeSet;

/// Supported aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// Sum of values
    Sum,
    /// Average of values
    Avg,
    /// Count of rows (`*`) or of non-null cells
    Count,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Number of distinct non-null cells
    CountDistinct,
}

/// One aggregate output column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    /// Function to apply
    pub func: AggregateFunction,
    /// Input column, `*` for row counts
    pub column: String,
    /// Output column name
    pub alias: String,
}

/// Comparison operator for numeric filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `=`
    Eq,
    /// `!=`
    Ne,
}

impl CompareOp {
    /// Apply the operator
    #[must_use]
    pub fn eval(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Eq => (left - right).abs() < f64::EPSILON,
            Self::Ne => (left - right).abs() >= f64::EPSILON,
        }
    }
}

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Text column value is one of `values`
    InSet {
        /// Column name
        column: String,
        /// Accepted values
        values: BTreeSet<String>,
    },
    /// Numeric column compared against a constant
    Compare {
        /// Column name
        column: String,
        /// Operator
        op: CompareOp,
        /// Right-hand side
        value: f64,
    },
    /// Column is not null
    NotNull(String),
}

impl Predicate {
    /// Set-membership filter
    pub fn in_set<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::InSet {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Numeric comparison filter
    pub fn compare(column: impl Into<String>, op: CompareOp, value: f64) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    /// Not-null filter
    pub fn not_null(column: impl Into<String>) -> Self {
        Self::NotNull(column.into())
    }
}

/// Sort order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (smallest first)
    Asc,
    /// Descending order (largest first)
    Desc,
}

/// Group-by query plan
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupQuery {
    /// Row filters, all must hold
    pub filters: Vec<Predicate>,
    /// GROUP BY columns; empty means one global group
    pub group_by: Vec<String>,
    /// Aggregate output columns
    pub aggregations: Vec<Aggregation>,
    /// ORDER BY output column
    pub order_by: Option<(String, OrderDirection)>,
    /// LIMIT count
    pub limit: Option<usize>,
    /// Round float aggregates to this many decimals
    pub round: Option<u32>,
}

impl GroupQuery {
    /// Start a query grouped by `keys`
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_by: keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a filter
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Add an aggregation
    #[must_use]
    pub fn aggregate(
        mut self,
        func: AggregateFunction,
        column: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        self.aggregations.push(Aggregation {
            func,
            column: column.into(),
            alias: alias.into(),
        });
        self
    }

    /// Row count per group
    #[must_use]
    pub fn count(self, alias: impl Into<String>) -> Self {
        self.aggregate(AggregateFunction::Count, "*", alias)
    }

    /// Mean of a numeric column per group
    #[must_use]
    pub fn avg(self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aggregate(AggregateFunction::Avg, column, alias)
    }

    /// Sum of a numeric column per group
    #[must_use]
    pub fn sum(self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aggregate(AggregateFunction::Sum, column, alias)
    }

    /// Distinct values of a column per group
    #[must_use]
    pub fn count_distinct(self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aggregate(AggregateFunction::CountDistinct, column, alias)
    }

    /// Order output rows by one column
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some((column.into(), direction));
        self
    }

    /// Keep the first `n` output rows
    #[must_use]
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Round float aggregates
    #[must_use]
    pub const fn round(mut self, decimals: u32) -> Self {
        self.round = Some(decimals);
        self
    }
}
