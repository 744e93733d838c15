//! Execution driver seam
//!
//! The builder never talks to storage itself. Everything that reaches the
//! database goes through a [`Driver`]: aggregate, explain, update and delete.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{PipelineError, Result};

/// Options forwarded with an aggregate call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOptions {
    /// Allow the engine to spill to disk
    pub allow_disk_use: bool,
    /// Server-side execution time limit
    pub max_time_ms: Option<u64>,
}

/// Update result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// Number of documents matched
    pub matched_count: u64,
    /// Number of documents modified
    pub modified_count: u64,
}

/// Executes serialized pipelines against a collection
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Run a pipeline and collect the rows
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Value>,
        options: &AggregateOptions,
    ) -> Result<Vec<Value>>;

    /// Ask the engine how it would run a pipeline
    async fn explain(
        &self,
        collection: &str,
        pipeline: Vec<Value>,
        options: &AggregateOptions,
    ) -> Result<Value>;

    /// Apply a pipeline-style update to every row matching `filter`
    async fn update_many(
        &self,
        collection: &str,
        filter: Map<String, Value>,
        update: Vec<Value>,
    ) -> Result<UpdateResult>;

    /// Delete every row matching `filter`, returning the deleted count
    async fn delete_many(&self, collection: &str, filter: Map<String, Value>) -> Result<u64>;
}

/// Driver for builders that only compile pipelines.
///
/// Every call fails with [`PipelineError::Detached`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

#[async_trait::async_trait]
impl Driver for Detached {
    async fn aggregate(
        &self,
        collection: &str,
        _pipeline: Vec<Value>,
        _options: &AggregateOptions,
    ) -> Result<Vec<Value>> {
        Err(PipelineError::Detached(format!("aggregate on '{}'", collection)))
    }

    async fn explain(
        &self,
        collection: &str,
        _pipeline: Vec<Value>,
        _options: &AggregateOptions,
    ) -> Result<Value> {
        Err(PipelineError::Detached(format!("explain on '{}'", collection)))
    }

    async fn update_many(
        &self,
        collection: &str,
        _filter: Map<String, Value>,
        _update: Vec<Value>,
    ) -> Result<UpdateResult> {
        Err(PipelineError::Detached(format!("update on '{}'", collection)))
    }

    async fn delete_many(&self, collection: &str, _filter: Map<String, Value>) -> Result<u64> {
        Err(PipelineError::Detached(format!("delete on '{}'", collection)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_refuses_everything() {
        let driver = Detached;
        let options = AggregateOptions::default();

        let err = driver.aggregate("users", vec![], &options).await.unwrap_err();
        assert_eq!(err, PipelineError::Detached("aggregate on 'users'".into()));
        assert!(driver.explain("users", vec![], &options).await.is_err());
        assert!(driver.update_many("users", Map::new(), vec![]).await.is_err());
        assert!(driver.delete_many("users", Map::new()).await.is_err());
    }

    #[test]
    fn test_options_wire_names() {
        let options = AggregateOptions {
            allow_disk_use: true,
            max_time_ms: Some(500),
        };
        let wire = serde_json::to_value(&options).unwrap();
        assert_eq!(wire, serde_json::json!({ "allowDiskUse": true, "maxTimeMs": 500 }));
    }
}
