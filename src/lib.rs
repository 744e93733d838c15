//! # Quarry
//!
//! A fluent aggregation-pipeline query builder for document databases.
//!
//! Queries are built as ordered stage lists, compiled to wire-format stage
//! fragments and handed to an execution [`Driver`](pipeline::Driver). Reads,
//! offset and cursor pagination, chunked iteration and pipeline-style writes
//! all go through the same builder.
//!
//! ## Crate Organization
//!
//! | Crate | Description |
//! |-------|-------------|
//! | [`quarry-pipeline`] | Operator table, stages, builder, filter engine |
//!
//! The `quarry-cli` binary compiles filter schemas offline.
//!
//! [`quarry-pipeline`]: quarry_pipeline

// ── Re-exports from quarry-pipeline ──────────────────────────────────────────

pub use quarry_pipeline::pipeline;

pub use quarry_pipeline::pipeline::{
    apply_filters, AggregationBuilder, BuilderConfig, Condition, CursorDirection, CursorPage,
    CursorRequest, Driver, FilterOptions, FilterSchema, MatchFragment, OffsetPage, Operator,
    PipelineError, Result, SortDirection, Stage,
};
