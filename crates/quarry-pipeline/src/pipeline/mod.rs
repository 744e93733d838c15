//! Aggregation pipeline builder - MongoDB-compatible stage compiler
//!
//! This module turns fluent query-building calls, or declarative filter
//! schemas fed with untyped input, into an ordered list of pipeline stages
//! that a document-database driver executes server-side:
//! - Operator normalization (`(column, operator, value)` → match fragment)
//! - One typed stage per pipeline step with its own wire serialization
//! - Derived reads (count, sum, avg, first, last, distinct, pluck)
//! - Offset and cursor pagination, chunked iteration
//! - Pipeline-style updates (set, increment, multiply, divide, unset)
//! - Declarative filter application from request data
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Filter Engine          │      Caller (fluent API)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   AggregationBuilder                        │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐     │
//! │  │ Conditions │  │  Stage list  │  │ Pagination/Update│     │
//! │  └────────────┘  └──────────────┘  └──────────────────┘     │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Operator table   │   Stage set   │     Serializer         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Driver (external)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_pipeline::pipeline::{AggregationBuilder, SortDirection};
//! use serde_json::json;
//!
//! let mut query = AggregationBuilder::new(driver, "users");
//! query
//!     .where_op("age", ">=", json!(18))?
//!     .where_eq("status", json!("active"))
//!     .sort("created_at", SortDirection::Descending);
//!
//! let page = query.paginate(2, 10).await?;
//! println!("{} of {}", page.pagination_info.result, page.pagination_info.total);
//! ```

pub mod accumulator;
pub mod builder;
pub mod condition;
pub mod config;
pub mod driver;
pub mod filter;
pub mod operator;
pub mod pagination;
pub mod serializer;
pub mod stage;
pub mod update;

pub use accumulator::Accumulator;
pub use builder::AggregationBuilder;
pub use condition::{parse_condition, Condition, MatchFragment, OrConditions};
pub use config::{BuilderConfig, LogFormat, LoggingConfig};
pub use driver::{AggregateOptions, Detached, Driver, UpdateResult};
pub use filter::{apply_filters, CustomFilter, FilterOptions, FilterRule, FilterSchema, RuleTarget};
pub use operator::{Operator, PatternPolicy};
pub use pagination::{CursorDirection, CursorPage, CursorRequest, OffsetPage, PaginationInfo};
pub use serializer::{partition, serialize, UpdatePlan};
pub use stage::{GroupKey, GroupSpec, LookupSpec, SortDirection, Stage, UnwindSpec};
pub use update::FieldDeltas;

/// Result alias used throughout the pipeline module
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// Malformed condition or condition input
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Operator symbol not present in the operator table
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    /// Range operator received a bound array of the wrong length
    #[error("{operator} requires exactly 2 bounds, got {len}")]
    InvalidBounds {
        /// Operator symbol
        operator: String,
        /// Number of bounds supplied
        len: usize,
    },

    /// Invalid builder argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Random sampling requested without a size
    #[error("Random sampling requires a limit: pass a size or add a limit stage first")]
    SampleWithoutLimit,

    /// Division by zero in a write-through update
    #[error("Cannot divide column '{column}' by zero")]
    DivisionByZero {
        /// Target column
        column: String,
    },

    /// Filter handler could not coerce its input
    #[error("Filter '{field}' expects {kind}, got {value}")]
    InvalidFilterValue {
        /// Data bag key
        field: String,
        /// Expected kind
        kind: String,
        /// Offending value
        value: String,
    },

    /// Date or date-time coercion failure
    #[error("Cannot parse '{value}' as a date (format: {format})")]
    InvalidDate {
        /// Offending value
        value: String,
        /// Format that was tried
        format: String,
    },

    /// Filter schema entry of an illegal shape
    #[error("Invalid filter rule: {0}")]
    InvalidFilterRule(String),

    /// Failure reported by the execution driver
    #[error("Driver error: {0}")]
    Driver(String),

    /// Executing operation attempted without a driver
    #[error("Builder is detached from any driver: {0}")]
    Detached(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
