//! Declarative filter engine
//!
//! A [`FilterSchema`] maps data-bag keys to rules. [`apply_filters`] walks the
//! schema in order and, for every key present in the data bag, turns the
//! input into builder conditions:
//!
//! ```text
//! rule ──► custom closure?        ──► closure mutates the builder
//!      ──► built-in tag (int>=)?  ──► coerce ──► where / or_where
//!      ──► operator symbol (like)? ─────────────► where / or_where
//!      ──► otherwise              ──► skipped (warn), or error when strict
//! ```
//!
//! Rules targeting several columns always combine as OR.
//!
//! # Example
//!
//! ```
//! use quarry_pipeline::pipeline::{apply_filters, AggregationBuilder, FilterOptions, FilterSchema};
//! use serde_json::json;
//!
//! let schema = FilterSchema::new().typed("age", "int>=").column("q", "like", "name");
//! let data = json!({ "age": "18", "q": "ann" });
//!
//! let mut query = AggregationBuilder::detached("users");
//! apply_filters(&mut query, &schema, data.as_object().unwrap(), &FilterOptions::default()).unwrap();
//! assert_eq!(query.to_pipeline()[0], json!({ "$match": { "age": { "$gte": 18 } } }));
//! ```

mod handlers;

pub use handlers::builtin_tags;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::builder::AggregationBuilder;
use super::condition::Condition;
use super::operator::Operator;
use super::{PipelineError, Result};

/// Custom rule: `(value, builder, data bag)`
pub type CustomFilter =
    Arc<dyn Fn(&Value, &mut AggregationBuilder, &Map<String, Value>) -> Result<()> + Send + Sync>;

/// Column(s) a rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    /// The rule's own data-bag key
    Key,
    /// One explicit column
    Column(String),
    /// Several columns, ORed
    Columns(Vec<String>),
}

/// One schema entry
#[derive(Clone)]
pub enum FilterRule {
    /// Built-in handler tag or operator symbol
    Typed {
        /// Tag such as `int>=`, `datetime<` or `like`
        kind: String,
        /// Target column(s)
        target: RuleTarget,
    },
    /// Closure with full access to the builder
    Custom(CustomFilter),
}

impl fmt::Debug for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRule::Typed { kind, target } => f
                .debug_struct("Typed")
                .field("kind", kind)
                .field("target", target)
                .finish(),
            FilterRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FilterRule {
    /// Parse a JSON rule: `"tag"`, `["tag"]`, `["tag", "column"]` or
    /// `["tag", ["a", "b"]]`
    pub fn from_json(rule: &Value) -> Result<Self> {
        let invalid = || PipelineError::InvalidFilterRule(format!("unsupported rule shape {}", rule));

        let (kind, target) = match rule {
            Value::String(kind) => (kind.clone(), RuleTarget::Key),
            Value::Array(parts) => match parts.as_slice() {
                [Value::String(kind)] => (kind.clone(), RuleTarget::Key),
                [Value::String(kind), Value::String(column)] => {
                    (kind.clone(), RuleTarget::Column(column.clone()))
                }
                [Value::String(kind), Value::Array(columns)] => {
                    let columns = columns
                        .iter()
                        .map(|c| c.as_str().map(String::from).ok_or_else(invalid))
                        .collect::<Result<Vec<_>>>()?;
                    if columns.is_empty() {
                        return Err(invalid());
                    }
                    (kind.clone(), RuleTarget::Columns(columns))
                }
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        };

        if kind.is_empty() {
            return Err(invalid());
        }
        Ok(FilterRule::Typed { kind, target })
    }
}

/// Ordered key → rule table
#[derive(Debug, Clone, Default)]
pub struct FilterSchema {
    rules: Vec<(String, FilterRule)>,
}

impl FilterSchema {
    /// Empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule
    pub fn rule(mut self, key: &str, rule: FilterRule) -> Self {
        self.rules.push((key.to_string(), rule));
        self
    }

    /// Rule whose column is its own key
    pub fn typed(self, key: &str, kind: &str) -> Self {
        self.rule(
            key,
            FilterRule::Typed {
                kind: kind.to_string(),
                target: RuleTarget::Key,
            },
        )
    }

    /// Rule targeting one explicit column
    pub fn column(self, key: &str, kind: &str, column: &str) -> Self {
        self.rule(
            key,
            FilterRule::Typed {
                kind: kind.to_string(),
                target: RuleTarget::Column(column.to_string()),
            },
        )
    }

    /// Rule ORed across several columns
    pub fn columns(self, key: &str, kind: &str, columns: &[&str]) -> Self {
        self.rule(
            key,
            FilterRule::Typed {
                kind: kind.to_string(),
                target: RuleTarget::Columns(columns.iter().map(|c| c.to_string()).collect()),
            },
        )
    }

    /// Custom closure rule
    pub fn custom<F>(self, key: &str, filter: F) -> Self
    where
        F: Fn(&Value, &mut AggregationBuilder, &Map<String, Value>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.rule(key, FilterRule::Custom(Arc::new(filter)))
    }

    /// Parse a JSON object of key → rule, keeping key order
    pub fn from_json(schema: &Value) -> Result<Self> {
        let entries = schema.as_object().ok_or_else(|| {
            PipelineError::InvalidFilterRule(format!("schema must be an object, got {}", schema))
        })?;

        let rules = entries
            .iter()
            .map(|(key, rule)| FilterRule::from_json(rule).map(|rule| (key.clone(), rule)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Rules in application order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterRule)> {
        self.rules.iter().map(|(key, rule)| (key.as_str(), rule))
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the schema has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Filter engine options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterOptions {
    /// chrono format string for date and date-time rules
    pub date_format: Option<String>,
    /// Reject rule tags that match neither a handler nor an operator
    pub strict: bool,
}

/// Apply every schema rule whose key is present in `data`.
///
/// Keys absent from `data` are skipped; a present `null` is still applied.
pub fn apply_filters(
    builder: &mut AggregationBuilder,
    schema: &FilterSchema,
    data: &Map<String, Value>,
    options: &FilterOptions,
) -> Result<()> {
    for (key, rule) in schema.iter() {
        let Some(value) = data.get(key) else {
            continue;
        };

        let (kind, target) = match rule {
            FilterRule::Custom(filter) => {
                filter(value, builder, data)?;
                continue;
            }
            FilterRule::Typed { kind, target } => (kind.as_str(), target),
        };

        let columns = match target {
            RuleTarget::Key => Columns::One(key),
            RuleTarget::Column(column) => Columns::One(column),
            RuleTarget::Columns(columns) => Columns::Many(columns),
        };

        if let Some(handler) = handlers::lookup(kind) {
            let operand = (handler.coerce)(key, value, options)?;
            apply(builder, columns, handler.operator, operand)?;
        } else if let Ok(operator) = Operator::from_symbol(kind) {
            apply(builder, columns, operator, value.clone())?;
        } else if options.strict {
            return Err(PipelineError::InvalidFilterRule(format!(
                "unknown rule type '{}' for '{}'",
                kind, key
            )));
        } else {
            tracing::warn!(key, kind, "skipping filter rule with unknown type");
        }
    }
    Ok(())
}

enum Columns<'a> {
    One(&'a str),
    Many(&'a [String]),
}

fn apply(
    builder: &mut AggregationBuilder,
    columns: Columns<'_>,
    operator: Operator,
    operand: Value,
) -> Result<()> {
    match columns {
        Columns::One(column) => {
            builder.where_operator(column, operator, operand)?;
        }
        Columns::Many(columns) => {
            let conditions: Vec<Condition> = columns
                .iter()
                .map(|column| Condition::Compare {
                    field: column.clone(),
                    operator: operator.symbol().to_string(),
                    value: operand.clone(),
                })
                .collect();
            builder.or_where(conditions)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn run(schema: &FilterSchema, bag: Value, options: &FilterOptions) -> Result<Vec<Value>> {
        let mut q = AggregationBuilder::detached("users");
        apply_filters(&mut q, schema, &data(bag), options)?;
        Ok(q.to_pipeline())
    }

    #[test]
    fn test_int_rule_coerces() {
        let schema = FilterSchema::from_json(&json!({ "age": "int>=" })).unwrap();
        let pipeline = run(&schema, json!({ "age": "18" }), &FilterOptions::default()).unwrap();
        assert_eq!(pipeline, vec![json!({ "$match": { "age": { "$gte": 18 } } })]);
    }

    #[test]
    fn test_multi_column_is_or() {
        let schema = FilterSchema::from_json(&json!({ "age": ["int", ["minAge", "maxAge"]] })).unwrap();
        let pipeline = run(&schema, json!({ "age": 5 }), &FilterOptions::default()).unwrap();
        assert_eq!(
            pipeline,
            vec![json!({ "$match": { "$or": [{ "minAge": 5 }, { "maxAge": 5 }] } })]
        );
    }

    #[test]
    fn test_absent_keys_are_skipped() {
        let schema = FilterSchema::new().typed("age", "int").typed("active", "bool");
        let pipeline = run(&schema, json!({ "active": null }), &FilterOptions::default()).unwrap();
        assert_eq!(pipeline, vec![json!({ "$match": { "active": false } })]);
    }

    #[test]
    fn test_operator_symbol_rule() {
        let schema = FilterSchema::new().column("q", "startsWith", "name");
        let pipeline = run(&schema, json!({ "q": "Al" }), &FilterOptions::default()).unwrap();
        assert_eq!(
            pipeline,
            vec![json!({ "$match": { "name": { "$regex": "^Al", "$options": "i" } } })]
        );
    }

    #[test]
    fn test_unknown_type_permissive_and_strict() {
        let schema = FilterSchema::new().typed("age", "integer");
        let bag = json!({ "age": "3" });

        assert!(run(&schema, bag.clone(), &FilterOptions::default())
            .unwrap()
            .is_empty());

        let strict = FilterOptions {
            strict: true,
            ..FilterOptions::default()
        };
        assert!(matches!(
            run(&schema, bag, &strict),
            Err(PipelineError::InvalidFilterRule(_))
        ));
    }

    #[test]
    fn test_custom_rule_sees_whole_bag() {
        let schema = FilterSchema::new().custom("range", |value, builder, bag| {
            let unit = bag.get("unit").and_then(Value::as_str).unwrap_or("m");
            builder.where_op("distance", "<=", value.clone())?;
            builder.where_eq("unit", unit);
            Ok(())
        });
        let pipeline = run(&schema, json!({ "range": 10, "unit": "km" }), &FilterOptions::default())
            .unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline[1], json!({ "$match": { "unit": "km" } }));
    }

    #[test]
    fn test_date_rule_uses_format() {
        let schema = FilterSchema::new().columns("since", "date>=", &["created", "updated"]);
        let options = FilterOptions {
            date_format: Some("%d.%m.%Y".into()),
            strict: false,
        };
        let pipeline = run(&schema, json!({ "since": "01.02.2024" }), &options).unwrap();
        let expected = json!({ "$gte": { "$date": "2024-02-01T00:00:00.000Z" } });
        assert_eq!(
            pipeline,
            vec![json!({ "$match": { "$or": [{ "created": expected }, { "updated": expected }] } })]
        );

        let err = run(&schema, json!({ "since": "2024-02-01" }), &options).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDate { .. }));
    }

    #[test]
    fn test_schema_shapes() {
        let schema = FilterSchema::from_json(&json!({
            "a": "int",
            "b": ["float"],
            "c": ["like", "name"],
            "d": ["bool", ["x", "y"]]
        }))
        .unwrap();
        let targets: Vec<_> = schema
            .iter()
            .map(|(key, rule)| match rule {
                FilterRule::Typed { target, .. } => (key.to_string(), target.clone()),
                FilterRule::Custom(_) => unreachable!(),
            })
            .collect();
        assert_eq!(
            targets,
            vec![
                ("a".to_string(), RuleTarget::Key),
                ("b".to_string(), RuleTarget::Key),
                ("c".to_string(), RuleTarget::Column("name".into())),
                ("d".to_string(), RuleTarget::Columns(vec!["x".into(), "y".into()])),
            ]
        );

        assert!(FilterSchema::from_json(&json!({ "a": 3 })).is_err());
        assert!(FilterSchema::from_json(&json!({ "a": ["int", "x", "y"] })).is_err());
        assert!(FilterSchema::from_json(&json!({ "a": ["int", []] })).is_err());
        assert!(FilterSchema::from_json(&json!(["int"])).is_err());
    }
}
