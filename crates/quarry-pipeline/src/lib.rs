#![forbid(unsafe_code)]
#![warn(missing_docs)]
//! # quarry-pipeline
//!
//! Query-expression compiler and aggregation-pipeline builder for document databases

pub mod pipeline;
