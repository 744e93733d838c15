//! Fluent aggregation builder
//!
//! The builder owns an ordered stage list, the collection name and a driver
//! handle. Query-building methods append stages and return `&mut Self`;
//! methods that go through the operator table (or otherwise validate input)
//! return `Result<&mut Self>`.
//!
//! Derived reads (`count`, `first`, `sum`, ...) append their own stages before
//! executing, so they leave the builder modified. Clone first when the same
//! query must be reused.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::accumulator::{field_ref, Accumulator};
use super::condition::{parse_condition, Condition, MatchFragment, OrConditions};
use super::config::BuilderConfig;
use super::driver::{Detached, Driver};
use super::operator::{Operator, PatternPolicy};
use super::serializer::serialize;
use super::stage::{GroupSpec, LookupSpec, SortDirection, Stage, UnwindSpec};
use super::{PipelineError, Result};

/// Output field used by single-bucket aggregate reads
const RESULT_FIELD: &str = "result";

/// Aggregation pipeline builder
#[derive(Clone)]
pub struct AggregationBuilder {
    pub(super) collection: String,
    pub(super) stages: Vec<Stage>,
    pub(super) driver: Arc<dyn Driver>,
    pub(super) config: Arc<BuilderConfig>,
}

impl fmt::Debug for AggregationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationBuilder")
            .field("collection", &self.collection)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl AggregationBuilder {
    /// Create a builder with the default configuration
    pub fn new(driver: Arc<dyn Driver>, collection: &str) -> Self {
        Self::with_config(driver, collection, Arc::new(BuilderConfig::default()))
    }

    /// Create a builder with a shared configuration
    pub fn with_config(
        driver: Arc<dyn Driver>,
        collection: &str,
        config: Arc<BuilderConfig>,
    ) -> Self {
        Self {
            collection: collection.to_string(),
            stages: Vec::new(),
            driver,
            config,
        }
    }

    /// Builder that only compiles pipelines; executing it fails
    pub fn detached(collection: &str) -> Self {
        Self::new(Arc::new(Detached), collection)
    }

    /// Target collection
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Active configuration
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Accumulated stages, in execution order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Serialized pipeline
    pub fn to_pipeline(&self) -> Vec<Value> {
        serialize(&self.stages)
    }

    /// Drop every accumulated stage
    pub fn reset(&mut self) -> &mut Self {
        self.stages.clear();
        self
    }

    /// Append a stage as-is
    pub fn push(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Append an already-serialized stage fragment
    pub fn raw(&mut self, fragment: Value) -> &mut Self {
        self.push(Stage::Raw(fragment))
    }

    fn policy(&self) -> PatternPolicy {
        self.config.pattern_policy()
    }

    // ========================================================================
    // Conditions
    // ========================================================================

    /// Add a condition in any of its three shapes
    pub fn where_(&mut self, condition: impl Into<Condition>) -> Result<&mut Self> {
        let fragment = parse_condition(condition.into(), &self.policy())?;
        Ok(self.push(Stage::Match(fragment)))
    }

    /// Add an equality condition
    pub fn where_eq(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Stage::Match(MatchFragment::equals(field, value.into())))
    }

    /// Add a condition using an operator symbol (`">="`, `"like"`, ...)
    pub fn where_op(
        &mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        self.where_((field, operator, value.into()))
    }

    /// Add a condition using a typed operator
    pub fn where_operator(
        &mut self,
        field: &str,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        let fragment = operator.fragment(field, value.into(), &self.policy())?;
        Ok(self.push(Stage::Match(fragment)))
    }

    /// Add a stage matching any of the given conditions.
    ///
    /// Each call creates its own stage; calls are ANDed with each other.
    pub fn or_where(&mut self, conditions: impl Into<OrConditions>) -> Result<&mut Self> {
        let fragments = conditions.into().normalize(&self.policy())?;
        Ok(self.push(Stage::OrMatch(fragments)))
    }

    /// Field value is one of `values`
    pub fn where_in(&mut self, field: &str, values: Vec<Value>) -> Result<&mut Self> {
        self.where_operator(field, Operator::In, Value::Array(values))
    }

    /// Field value is none of `values`
    pub fn where_not_in(&mut self, field: &str, values: Vec<Value>) -> Result<&mut Self> {
        self.where_operator(field, Operator::NotIn, Value::Array(values))
    }

    /// Field value is contained in the array held by `column`
    pub fn where_in_column(&mut self, field: &str, column: &str) -> Result<&mut Self> {
        self.where_operator(field, Operator::InColumn, Value::String(column.to_string()))
    }

    /// Field value is absent from the array held by `column`
    pub fn where_not_in_column(&mut self, field: &str, column: &str) -> Result<&mut Self> {
        self.where_operator(field, Operator::NotInColumn, Value::String(column.to_string()))
    }

    /// Field value lies in `[low, high]`
    pub fn where_between(
        &mut self,
        field: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<&mut Self> {
        self.where_operator(field, Operator::Between, json!([low.into(), high.into()]))
    }

    /// Field value lies outside `[low, high]`
    pub fn where_not_between(
        &mut self,
        field: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<&mut Self> {
        self.where_operator(field, Operator::NotBetween, json!([low.into(), high.into()]))
    }

    /// Field is explicitly null
    pub fn where_null(&mut self, field: &str) -> &mut Self {
        self.where_eq(field, Value::Null)
    }

    /// Field is present and not null
    pub fn where_not_null(&mut self, field: &str) -> &mut Self {
        self.push(Stage::Match(MatchFragment::single(field, json!({ "$ne": null }))))
    }

    /// Field is present (`true`) or absent (`false`)
    pub fn where_exists(&mut self, field: &str, exists: bool) -> Result<&mut Self> {
        self.where_operator(field, Operator::Exists, Value::Bool(exists))
    }

    /// Compare the length of an array field.
    ///
    /// Equality uses `$size` directly; other comparisons go through `$expr`
    /// with a missing field counted as empty.
    pub fn where_size(&mut self, field: &str, operator: &str, size: u64) -> Result<&mut Self> {
        let op = Operator::from_symbol(operator)?;
        let expr_op = match op {
            Operator::Eq => {
                let fragment = MatchFragment::single(field, json!({ "$size": size }));
                return Ok(self.push(Stage::Match(fragment)));
            }
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            other => {
                return Err(PipelineError::InvalidArgument(format!(
                    "size comparison does not support '{}'",
                    other
                )))
            }
        };

        let size_expr = json!({ "$size": { "$ifNull": [field_ref(field), []] } });
        let mut comparison = Map::new();
        comparison.insert(expr_op.to_string(), json!([size_expr, size]));
        let fragment = MatchFragment::single("$expr", Value::Object(comparison));
        Ok(self.push(Stage::Match(fragment)))
    }

    /// Full-text search; always placed ahead of every other stage
    pub fn search(&mut self, text: &str) -> &mut Self {
        let fragment = MatchFragment::single("$text", json!({ "$search": text }));
        self.stages.insert(0, Stage::Match(fragment));
        self
    }

    /// Apply `build` only when `condition` holds
    pub fn when<F>(&mut self, condition: bool, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if condition {
            build(self)?;
        }
        Ok(self)
    }

    // ========================================================================
    // Shaping
    // ========================================================================

    /// Sort by one column
    pub fn sort(&mut self, field: &str, direction: SortDirection) -> &mut Self {
        self.push(Stage::Sort(vec![(field.to_string(), direction)]))
    }

    /// Sort by several columns, in priority order
    pub fn sort_by<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, SortDirection)>,
        S: Into<String>,
    {
        let keys = keys.into_iter().map(|(f, d)| (f.into(), d)).collect();
        self.push(Stage::Sort(keys))
    }

    /// Random sample of `size` rows.
    ///
    /// Without an explicit size, the most recent limit stage supplies it.
    pub fn sort_random(&mut self, size: Option<u64>) -> Result<&mut Self> {
        let size = size
            .or_else(|| {
                self.stages.iter().rev().find_map(|stage| match stage {
                    Stage::Limit(n) => Some(*n),
                    _ => None,
                })
            })
            .ok_or(PipelineError::SampleWithoutLimit)?;
        Ok(self.push(Stage::Sample(size)))
    }

    /// Limit results; must be positive
    pub fn limit(&mut self, n: u64) -> Result<&mut Self> {
        if n == 0 {
            return Err(PipelineError::InvalidArgument(
                "limit must be a positive integer".into(),
            ));
        }
        Ok(self.push(Stage::Limit(n)))
    }

    /// Skip results
    pub fn skip(&mut self, n: u64) -> &mut Self {
        self.push(Stage::Skip(n))
    }

    /// Keep only these fields
    pub fn select(&mut self, fields: &[&str]) -> &mut Self {
        self.push(Stage::Select(fields.iter().map(|f| f.to_string()).collect()))
    }

    /// Drop these fields
    pub fn deselect(&mut self, fields: &[&str]) -> &mut Self {
        self.push(Stage::Deselect(fields.iter().map(|f| f.to_string()).collect()))
    }

    /// Unwind an array field
    pub fn unwind(&mut self, path: &str) -> &mut Self {
        self.push(Stage::Unwind(UnwindSpec::new(path)))
    }

    /// Unwind with explicit options
    pub fn unwind_with(&mut self, spec: UnwindSpec) -> &mut Self {
        self.push(Stage::Unwind(spec))
    }

    /// Group rows
    pub fn group_by(&mut self, spec: GroupSpec) -> &mut Self {
        self.push(Stage::Group(spec))
    }

    /// Join another collection.
    ///
    /// With `single`, a second stage replaces the joined array with its first
    /// element (or drops the field when nothing joined).
    pub fn lookup(&mut self, spec: LookupSpec, single: bool) -> Result<&mut Self> {
        spec.validate()?;
        let output = spec.r#as.clone();
        self.push(Stage::Lookup(spec));

        if single {
            let mut fields = Map::new();
            fields.insert(
                output.clone(),
                json!({ "$arrayElemAt": [field_ref(&output), 0] }),
            );
            self.push(Stage::AddFields(fields));
        }
        Ok(self)
    }

    /// Add computed fields
    pub fn add_fields(&mut self, fields: Map<String, Value>) -> &mut Self {
        self.push(Stage::AddFields(fields))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub(super) async fn execute(&self, operation: &'static str) -> Result<Vec<Value>> {
        let pipeline = self.to_pipeline();
        tracing::debug!(
            collection = %self.collection,
            operation,
            stages = pipeline.len(),
            "running aggregate"
        );
        self.driver
            .aggregate(&self.collection, pipeline, &self.config.aggregate_options())
            .await
    }

    /// Run the pipeline and return every row
    pub async fn get(&self) -> Result<Vec<Value>> {
        self.execute("get").await
    }

    /// First row, if any
    pub async fn first(&mut self) -> Result<Option<Value>> {
        self.limit(1)?;
        Ok(self.execute("first").await?.into_iter().next())
    }

    /// Last row, if any.
    ///
    /// With no sort stage, rows are ordered by the identity field descending.
    /// Otherwise the most recent sort is appended again with every direction
    /// reversed.
    pub async fn last(&mut self) -> Result<Option<Value>> {
        let reversed = self.stages.iter().rev().find_map(|stage| match stage {
            Stage::Sort(keys) => Some(
                keys.iter()
                    .map(|(field, direction)| (field.clone(), direction.reverse()))
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        });
        let keys = reversed
            .unwrap_or_else(|| vec![(self.config.id_field.clone(), SortDirection::Descending)]);

        self.push(Stage::Sort(keys));
        self.limit(1)?;
        Ok(self.execute("last").await?.into_iter().next())
    }

    /// Whether any row matches
    pub async fn exists(&mut self) -> Result<bool> {
        Ok(self.first().await?.is_some())
    }

    /// Number of matching rows; zero when nothing matched
    pub async fn count(&mut self) -> Result<u64> {
        self.push(Stage::Group(
            GroupSpec::all().accumulate(RESULT_FIELD, Accumulator::Count),
        ));
        let value = self.single_bucket("count").await?;
        Ok(value
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .unwrap_or(0))
    }

    /// Sum of a column; zero when nothing matched
    pub async fn sum(&mut self, column: &str) -> Result<f64> {
        let value = self.aggregate_column("sum", Accumulator::sum(column)).await?;
        Ok(value.and_then(|v| v.as_f64()).unwrap_or(0.0))
    }

    /// Average of a column
    pub async fn avg(&mut self, column: &str) -> Result<Option<f64>> {
        let value = self.aggregate_column("avg", Accumulator::avg(column)).await?;
        Ok(value.and_then(|v| v.as_f64()))
    }

    /// Minimum of a column
    pub async fn min(&mut self, column: &str) -> Result<Option<Value>> {
        self.aggregate_column("min", Accumulator::min(column)).await
    }

    /// Maximum of a column
    pub async fn max(&mut self, column: &str) -> Result<Option<Value>> {
        self.aggregate_column("max", Accumulator::max(column)).await
    }

    /// Distinct values of a column
    pub async fn distinct(&mut self, column: &str) -> Result<Vec<Value>> {
        match self.aggregate_column("distinct", Accumulator::add_to_set(column)).await? {
            Some(Value::Array(values)) => Ok(values),
            _ => Ok(Vec::new()),
        }
    }

    /// Values of one column, one per row
    pub async fn pluck(&mut self, column: &str) -> Result<Vec<Value>> {
        self.select(&[column]);
        let rows = self.execute("pluck").await?;
        Ok(rows
            .iter()
            .map(|row| field_value(row, column).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Ask the driver how the pipeline would run
    pub async fn explain(&self) -> Result<Value> {
        let pipeline = self.to_pipeline();
        tracing::debug!(collection = %self.collection, stages = pipeline.len(), "explaining aggregate");
        self.driver
            .explain(&self.collection, pipeline, &self.config.aggregate_options())
            .await
    }

    async fn aggregate_column(
        &mut self,
        operation: &'static str,
        accumulator: Accumulator,
    ) -> Result<Option<Value>> {
        self.push(Stage::Group(GroupSpec::all().accumulate(RESULT_FIELD, accumulator)));
        self.single_bucket(operation).await
    }

    async fn single_bucket(&self, operation: &'static str) -> Result<Option<Value>> {
        let rows = self.execute(operation).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.as_object_mut().and_then(|obj| obj.remove(RESULT_FIELD)))
            .filter(|v| !v.is_null()))
    }
}

/// Read a dot-notation path out of a row
pub(crate) fn field_value<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(row, |current, segment| current.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> AggregationBuilder {
        AggregationBuilder::detached("users")
    }

    #[test]
    fn test_conditions_push_match_stages() {
        let mut q = builder();
        q.where_eq("status", "active")
            .where_op("age", ">=", 18)
            .unwrap()
            .where_in("role", vec![json!("admin"), json!("owner")])
            .unwrap();

        assert_eq!(
            q.to_pipeline(),
            vec![
                json!({ "$match": { "status": "active" } }),
                json!({ "$match": { "age": { "$gte": 18 } } }),
                json!({ "$match": { "role": { "$in": ["admin", "owner"] } } }),
            ]
        );
    }

    #[test]
    fn test_or_where_each_call_is_a_stage() {
        let mut q = builder();
        q.or_where(OrConditions::from_json(json!({ "a": 1, "b": 2 })).unwrap())
            .unwrap()
            .or_where(vec![Condition::from(("c", ">", json!(3)))])
            .unwrap();

        assert_eq!(q.stages().len(), 2);
        assert_eq!(
            q.to_pipeline()[1],
            json!({ "$match": { "$or": [{ "c": { "$gt": 3 } }] } })
        );
    }

    #[test]
    fn test_search_is_unshifted() {
        let mut q = builder();
        q.where_eq("a", 1).limit(5).unwrap();
        q.search("rust async");

        assert_eq!(
            q.to_pipeline()[0],
            json!({ "$match": { "$text": { "$search": "rust async" } } })
        );
        assert_eq!(q.stages().len(), 3);
    }

    #[test]
    fn test_where_size() {
        let mut q = builder();
        q.where_size("tags", "=", 2).unwrap().where_size("tags", ">", 3).unwrap();
        let pipeline = q.to_pipeline();
        assert_eq!(pipeline[0], json!({ "$match": { "tags": { "$size": 2 } } }));
        assert_eq!(
            pipeline[1],
            json!({ "$match": { "$expr": {
                "$gt": [{ "$size": { "$ifNull": ["$tags", []] } }, 3]
            } } })
        );
        assert!(q.where_size("tags", "like", 1).is_err());
    }

    #[test]
    fn test_limit_rejects_zero() {
        let mut q = builder();
        assert!(matches!(q.limit(0), Err(PipelineError::InvalidArgument(_))));
        assert!(q.stages().is_empty());
    }

    #[test]
    fn test_sort_random() {
        let mut q = builder();
        assert_eq!(q.sort_random(None).unwrap_err(), PipelineError::SampleWithoutLimit);

        q.limit(7).unwrap().sort_random(None).unwrap();
        assert_eq!(q.to_pipeline()[1], json!({ "$sample": { "size": 7 } }));

        q.sort_random(Some(2)).unwrap();
        assert_eq!(q.to_pipeline()[2], json!({ "$sample": { "size": 2 } }));
    }

    #[test]
    fn test_lookup_single_appends_unwrap_stage() {
        let mut q = builder();
        q.lookup(LookupSpec::new("profiles", "_id", "user_id", "profile"), true)
            .unwrap();

        let pipeline = q.to_pipeline();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline[0]["$lookup"]["as"], json!("profile"));
        assert_eq!(
            pipeline[1],
            json!({ "$addFields": { "profile": { "$arrayElemAt": ["$profile", 0] } } })
        );

        let mut q = builder();
        q.lookup(LookupSpec::new("orders", "_id", "user_id", "orders"), false)
            .unwrap();
        assert_eq!(q.stages().len(), 1);
    }

    #[test]
    fn test_when_and_reset() {
        let mut q = builder();
        q.when(false, |q| {
            q.where_eq("skipped", true);
            Ok(())
        })
        .unwrap()
        .when(true, |q| {
            q.where_op("age", "between", json!([1, 2]))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(q.stages().len(), 1);

        q.reset();
        assert!(q.to_pipeline().is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = builder();
        original.where_eq("a", 1);
        let mut copy = original.clone();
        copy.limit(3).unwrap();

        assert_eq!(original.stages().len(), 1);
        assert_eq!(copy.stages().len(), 2);
        assert_eq!(copy.collection(), "users");
    }

    #[tokio::test]
    async fn test_detached_execution_fails() {
        let mut q = builder();
        assert!(matches!(q.count().await, Err(PipelineError::Detached(_))));
    }

    #[test]
    fn test_field_value_paths() {
        let row = json!({ "a": { "b": { "c": 3 } }, "x": 1 });
        assert_eq!(field_value(&row, "a.b.c"), Some(&json!(3)));
        assert_eq!(field_value(&row, "x"), Some(&json!(1)));
        assert_eq!(field_value(&row, "a.z"), None);
    }
}
