//! Pipeline-style writes
//!
//! Every write serializes the accumulated stages, partitions them into a
//! merged match filter and the remaining pipeline, and issues exactly one
//! driver call:
//!
//! ```text
//! stages ──serialize──► [ $match, $sort, $match, ... ]
//!                                │ partition
//!                  ┌─────────────┴──────────────┐
//!               filter                 [ $sort, ..., update stage ]
//!                  └──────────► update_many ◄───┘
//! ```
//!
//! Driver failures are logged with the operation name and returned as-is.

use serde_json::{json, Map, Number, Value};

use super::accumulator::field_ref;
use super::builder::AggregationBuilder;
use super::driver::UpdateResult;
use super::serializer::partition;
use super::{PipelineError, Result};

/// Target columns of an arithmetic update
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDeltas {
    /// One column, default delta
    Column(String),
    /// Several columns, same default delta
    Columns(Vec<String>),
    /// Column → delta
    Map(Map<String, Value>),
}

impl FieldDeltas {
    /// Pair every column with its delta, using `default` when none was given
    fn resolve(self, default: f64) -> Result<Vec<(String, Value)>> {
        let default = number(default)?;
        let pairs = match self {
            FieldDeltas::Column(column) => vec![(column, default)],
            FieldDeltas::Columns(columns) => columns
                .into_iter()
                .map(|column| (column, default.clone()))
                .collect(),
            FieldDeltas::Map(map) => map
                .into_iter()
                .map(|(column, delta)| {
                    if delta.is_number() {
                        Ok((column, delta))
                    } else {
                        Err(PipelineError::InvalidArgument(format!(
                            "delta for '{}' must be a number, got {}",
                            column, delta
                        )))
                    }
                })
                .collect::<Result<Vec<_>>>()?,
        };

        if pairs.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "update requires at least one column".into(),
            ));
        }
        Ok(pairs)
    }
}

impl From<&str> for FieldDeltas {
    fn from(column: &str) -> Self {
        FieldDeltas::Column(column.to_string())
    }
}

impl From<String> for FieldDeltas {
    fn from(column: String) -> Self {
        FieldDeltas::Column(column)
    }
}

impl From<Vec<&str>> for FieldDeltas {
    fn from(columns: Vec<&str>) -> Self {
        FieldDeltas::Columns(columns.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for FieldDeltas {
    fn from(columns: &[&str]) -> Self {
        FieldDeltas::Columns(columns.iter().map(|c| c.to_string()).collect())
    }
}

impl From<Vec<String>> for FieldDeltas {
    fn from(columns: Vec<String>) -> Self {
        FieldDeltas::Columns(columns)
    }
}

impl From<Map<String, Value>> for FieldDeltas {
    fn from(map: Map<String, Value>) -> Self {
        FieldDeltas::Map(map)
    }
}

fn number(value: f64) -> Result<Value> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return Ok(Value::from(value as i64));
    }
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| PipelineError::InvalidArgument(format!("delta {} is not finite", value)))
}

fn is_zero(value: &Value) -> bool {
    value.as_f64().map_or(false, |v| v == 0.0)
}

/// `{ "$set": { col: { op: [ { "$ifNull": ["$col", 0] }, delta ] } } }`
fn arithmetic_stage(operator: &str, pairs: Vec<(String, Value)>) -> Value {
    let mut set = Map::new();
    for (column, delta) in pairs {
        let current = json!({ "$ifNull": [field_ref(&column), 0] });
        let mut expr = Map::new();
        expr.insert(operator.to_string(), json!([current, delta]));
        set.insert(column, Value::Object(expr));
    }
    json!({ "$set": set })
}

impl AggregationBuilder {
    async fn apply_update(&self, operation: &'static str, update: Value) -> Result<UpdateResult> {
        let plan = partition(self.to_pipeline());
        let mut pipeline = plan.pipeline;
        pipeline.push(update);

        tracing::debug!(
            collection = %self.collection,
            operation,
            stages = pipeline.len(),
            "running update"
        );
        self.driver
            .update_many(&self.collection, plan.filter, pipeline)
            .await
            .map_err(|e| {
                tracing::error!(operation, collection = %self.collection, error = %e, "update failed");
                e
            })
    }

    /// Set fields to literal values on every matching row
    pub async fn update(&self, values: Map<String, Value>) -> Result<UpdateResult> {
        if values.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "update requires at least one field".into(),
            ));
        }
        self.apply_update("update", json!({ "$set": values })).await
    }

    /// Add to numeric fields; missing fields count as zero.
    ///
    /// Columns without an explicit delta are incremented by one.
    pub async fn increment(&self, target: impl Into<FieldDeltas>) -> Result<UpdateResult> {
        let pairs = target.into().resolve(1.0)?;
        self.apply_update("increment", arithmetic_stage("$add", pairs))
            .await
    }

    /// Subtract from numeric fields; missing fields count as zero
    pub async fn decrement(&self, target: impl Into<FieldDeltas>) -> Result<UpdateResult> {
        let pairs = target.into().resolve(1.0)?;
        self.apply_update("decrement", arithmetic_stage("$subtract", pairs))
            .await
    }

    /// Multiply numeric fields by `factor` (or the per-column factors)
    pub async fn multiply(
        &self,
        target: impl Into<FieldDeltas>,
        factor: f64,
    ) -> Result<UpdateResult> {
        let pairs = target.into().resolve(factor)?;
        self.apply_update("multiply", arithmetic_stage("$multiply", pairs))
            .await
    }

    /// Divide numeric fields by `divisor` (or the per-column divisors).
    ///
    /// A zero divisor is rejected before the driver is contacted.
    pub async fn divide(&self, target: impl Into<FieldDeltas>, divisor: f64) -> Result<UpdateResult> {
        let pairs = target.into().resolve(divisor)?;
        if let Some((column, _)) = pairs.iter().find(|(_, delta)| is_zero(delta)) {
            return Err(PipelineError::DivisionByZero {
                column: column.clone(),
            });
        }
        self.apply_update("divide", arithmetic_stage("$divide", pairs))
            .await
    }

    /// Remove fields from every matching row
    pub async fn unset(&self, columns: &[&str]) -> Result<UpdateResult> {
        if columns.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "unset requires at least one column".into(),
            ));
        }
        self.apply_update("unset", json!({ "$unset": columns })).await
    }

    /// Delete every row matching the accumulated match stages.
    ///
    /// Only match stages contribute; anything else is dropped with a warning.
    pub async fn delete(&self) -> Result<u64> {
        let plan = partition(self.to_pipeline());
        if !plan.pipeline.is_empty() {
            tracing::warn!(
                collection = %self.collection,
                dropped = plan.pipeline.len(),
                "delete ignores non-match stages"
            );
        }

        tracing::debug!(collection = %self.collection, operation = "delete", "running delete");
        self.driver
            .delete_many(&self.collection, plan.filter)
            .await
            .map_err(|e| {
                tracing::error!(operation = "delete", collection = %self.collection, error = %e, "delete failed");
                e
            })
    }
}
