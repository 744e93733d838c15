//! Shared test utilities for quarry integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use quarry::pipeline::{
    AggregateOptions, AggregationBuilder, BuilderConfig, Driver, PipelineError, Result,
    UpdateResult,
};

// ============================================================================
// Recording driver
// ============================================================================

/// One driver invocation
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Aggregate {
        collection: String,
        pipeline: Vec<Value>,
        options: AggregateOptions,
    },
    Explain {
        collection: String,
        pipeline: Vec<Value>,
    },
    Update {
        collection: String,
        filter: Map<String, Value>,
        update: Vec<Value>,
    },
    Delete {
        collection: String,
        filter: Map<String, Value>,
    },
}

/// Driver that answers aggregates from a queue of canned row sets and
/// records every call.
///
/// An empty queue answers with no rows.
#[derive(Default)]
pub struct RecordingDriver {
    responses: Mutex<VecDeque<Vec<Value>>>,
    calls: Mutex<Vec<Call>>,
    write_error: Mutex<Option<String>>,
    modified: Mutex<u64>,
}

#[allow(dead_code)]
impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Driver answering successive aggregates with `responses`
    pub fn with_rows(responses: Vec<Vec<Value>>) -> Arc<Self> {
        let driver = Self::default();
        driver.responses.lock().extend(responses);
        Arc::new(driver)
    }

    /// Queue another aggregate response
    pub fn push_rows(&self, rows: Vec<Value>) {
        self.responses.lock().push_back(rows);
    }

    /// Make every update/delete fail with `message`
    pub fn fail_writes(&self, message: &str) {
        *self.write_error.lock() = Some(message.to_string());
    }

    /// Count reported by successful writes
    pub fn set_modified(&self, count: u64) {
        *self.modified.lock() = count;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Pipelines of every aggregate call, in order
    pub fn pipelines(&self) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Aggregate { pipeline, .. } => Some(pipeline.clone()),
                _ => None,
            })
            .collect()
    }

    fn write_result(&self) -> Result<u64> {
        match self.write_error.lock().as_ref() {
            Some(message) => Err(PipelineError::Driver(message.clone())),
            None => Ok(*self.modified.lock()),
        }
    }
}

#[async_trait::async_trait]
impl Driver for RecordingDriver {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Value>,
        options: &AggregateOptions,
    ) -> Result<Vec<Value>> {
        self.calls.lock().push(Call::Aggregate {
            collection: collection.to_string(),
            pipeline,
            options: options.clone(),
        });
        Ok(self.responses.lock().pop_front().unwrap_or_default())
    }

    async fn explain(
        &self,
        collection: &str,
        pipeline: Vec<Value>,
        _options: &AggregateOptions,
    ) -> Result<Value> {
        let stages = pipeline.len();
        self.calls.lock().push(Call::Explain {
            collection: collection.to_string(),
            pipeline,
        });
        Ok(serde_json::json!({ "ok": 1, "stages": stages }))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Map<String, Value>,
        update: Vec<Value>,
    ) -> Result<UpdateResult> {
        self.calls.lock().push(Call::Update {
            collection: collection.to_string(),
            filter,
            update,
        });
        let modified = self.write_result()?;
        Ok(UpdateResult {
            matched_count: modified,
            modified_count: modified,
        })
    }

    async fn delete_many(&self, collection: &str, filter: Map<String, Value>) -> Result<u64> {
        self.calls.lock().push(Call::Delete {
            collection: collection.to_string(),
            filter,
        });
        self.write_result()
    }
}

// ============================================================================
// Builder helpers
// ============================================================================

/// Builder over `collection` backed by `driver`
#[allow(dead_code)]
pub fn builder(driver: &Arc<RecordingDriver>, collection: &str) -> AggregationBuilder {
    AggregationBuilder::new(driver.clone(), collection)
}

/// Builder with a custom configuration
#[allow(dead_code)]
pub fn builder_with(
    driver: &Arc<RecordingDriver>,
    collection: &str,
    config: BuilderConfig,
) -> AggregationBuilder {
    AggregationBuilder::with_config(driver.clone(), collection, Arc::new(config))
}

/// `n` rows of `{ "id": i }`, starting at `start`
#[allow(dead_code)]
pub fn rows(start: i64, n: i64) -> Vec<Value> {
    (start..start + n).map(|i| serde_json::json!({ "id": i })).collect()
}

/// Single-bucket response of a group-all read
#[allow(dead_code)]
pub fn bucket(value: Value) -> Vec<Value> {
    vec![serde_json::json!({ "_id": null, "result": value })]
}

/// Unwrap a JSON object
#[allow(dead_code)]
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}
