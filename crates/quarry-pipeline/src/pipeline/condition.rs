//! Condition expression parser
//!
//! A condition arrives in one of three shapes: a conditions object, a
//! `(field, value)` pair, or a `(field, operator, value)` triple. All three
//! normalize to a [`MatchFragment`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::operator::{Operator, PatternPolicy};
use super::{PipelineError, Result};

/// Canonical match fragment: field path → literal or operator object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchFragment(Map<String, Value>);

impl MatchFragment {
    /// Create an empty fragment
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Fragment with a single field condition
    pub fn single(field: impl Into<String>, condition: Value) -> Self {
        let mut map = Map::new();
        map.insert(field.into(), condition);
        Self(map)
    }

    /// Equality on a field; null encodes as an explicit `$eq: null` so it
    /// does not also match rows missing the field
    pub fn equals(field: impl Into<String>, value: Value) -> Self {
        if value.is_null() {
            let mut eq = Map::new();
            eq.insert("$eq".to_string(), Value::Null);
            Self::single(field, Value::Object(eq))
        } else {
            Self::single(field, value)
        }
    }

    /// Fragment of implicit equalities, one per key; null values use `$eq`
    pub fn from_equalities(fields: Map<String, Value>) -> Self {
        let mut fragment = Self::default();
        for (field, value) in fields {
            fragment.merge(Self::equals(field, value));
        }
        fragment
    }

    /// Shallow-merge another fragment into this one (implicit AND).
    ///
    /// Keys present in both are overwritten by `other`.
    pub fn merge(&mut self, other: MatchFragment) {
        for (field, condition) in other.0 {
            self.0.insert(field, condition);
        }
    }

    /// Group several fragments under `$or`
    pub fn any_of(fragments: Vec<MatchFragment>) -> Self {
        let branches = fragments.into_iter().map(MatchFragment::into_value).collect();
        Self::single("$or", Value::Array(branches))
    }

    /// Condition for a field path
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Whether the fragment has no conditions
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of field conditions
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take the underlying map
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Convert to a JSON object
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for MatchFragment {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One condition, in any of the three legal call shapes
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Object of field → value equalities, used as-is
    Fields(Map<String, Value>),
    /// Implicit equality
    Equals {
        /// Field path
        field: String,
        /// Expected value
        value: Value,
    },
    /// Explicit operator
    Compare {
        /// Field path
        field: String,
        /// Operator symbol, looked up in the operator table
        operator: String,
        /// Operand
        value: Value,
    },
}

impl Condition {
    /// Build a condition from untyped positional arguments.
    ///
    /// Accepts `[object]`, `[field, value]` and `[field, operator, value]`.
    pub fn from_args(args: Vec<Value>) -> Result<Self> {
        let len = args.len();
        let mut args = args.into_iter();
        match (args.next(), args.next(), args.next()) {
            (Some(Value::Object(fields)), None, None) => Ok(Condition::Fields(fields)),
            (Some(Value::String(field)), Some(value), None) => Ok(Condition::Equals { field, value }),
            (Some(Value::String(field)), Some(Value::String(operator)), Some(value))
                if len == 3 =>
            {
                Ok(Condition::Compare {
                    field,
                    operator,
                    value,
                })
            }
            _ => Err(PipelineError::InvalidQuery(format!(
                "condition expects [object], [field, value] or [field, operator, value] ({} arguments given)",
                len
            ))),
        }
    }
}

impl From<Map<String, Value>> for Condition {
    fn from(fields: Map<String, Value>) -> Self {
        Condition::Fields(fields)
    }
}

impl From<MatchFragment> for Condition {
    fn from(fragment: MatchFragment) -> Self {
        Condition::Fields(fragment.into_map())
    }
}

impl From<(&str, Value)> for Condition {
    fn from((field, value): (&str, Value)) -> Self {
        Condition::Equals {
            field: field.to_string(),
            value,
        }
    }
}

impl From<(String, Value)> for Condition {
    fn from((field, value): (String, Value)) -> Self {
        Condition::Equals { field, value }
    }
}

impl From<(&str, &str, Value)> for Condition {
    fn from((field, operator, value): (&str, &str, Value)) -> Self {
        Condition::Compare {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }
}

/// Normalize a condition into a canonical match fragment
pub fn parse_condition(condition: Condition, policy: &PatternPolicy) -> Result<MatchFragment> {
    match condition {
        Condition::Fields(fields) => Ok(MatchFragment::from_equalities(fields)),
        Condition::Equals { field, value } => Operator::Eq.fragment(&field, value, policy),
        Condition::Compare {
            field,
            operator,
            value,
        } => Operator::from_symbol(&operator)?.fragment(&field, value, policy),
    }
}

/// Or-where input, in any of its three legal shapes
#[derive(Debug, Clone, PartialEq)]
pub enum OrConditions {
    /// List of `(field, value)` / `(field, operator, value)` conditions
    Conditions(Vec<Condition>),
    /// List of ready-made fragments
    Fragments(Vec<MatchFragment>),
    /// Single object; each key becomes its own branch
    Object(Map<String, Value>),
}

impl OrConditions {
    /// Detect the shape of untyped or-where input
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(OrConditions::Object(map)),
            Value::Array(items) => {
                if items.iter().all(Value::is_object) {
                    let fragments = items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::Object(map) => Some(MatchFragment::from_equalities(map)),
                            _ => None,
                        })
                        .collect();
                    return Ok(OrConditions::Fragments(fragments));
                }

                let conditions = items
                    .into_iter()
                    .map(|item| match item {
                        Value::Array(args) => Condition::from_args(args),
                        Value::Object(map) => Ok(Condition::Fields(map)),
                        other => Err(PipelineError::InvalidQuery(format!(
                            "or-where entries must be tuples or objects, got {}",
                            other
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(OrConditions::Conditions(conditions))
            }
            other => Err(PipelineError::InvalidQuery(format!(
                "or-where expects an array or object, got {}",
                other
            ))),
        }
    }

    /// Normalize into the array-of-fragments form
    pub fn normalize(self, policy: &PatternPolicy) -> Result<Vec<MatchFragment>> {
        let fragments = match self {
            OrConditions::Conditions(conditions) => conditions
                .into_iter()
                .map(|c| parse_condition(c, policy))
                .collect::<Result<Vec<_>>>()?,
            OrConditions::Fragments(fragments) => fragments,
            OrConditions::Object(map) => map
                .into_iter()
                .map(|(field, value)| MatchFragment::equals(field, value))
                .collect(),
        };

        if fragments.is_empty() {
            return Err(PipelineError::InvalidQuery(
                "or-where requires at least one condition".into(),
            ));
        }
        Ok(fragments)
    }
}

impl From<Vec<Condition>> for OrConditions {
    fn from(conditions: Vec<Condition>) -> Self {
        OrConditions::Conditions(conditions)
    }
}

impl From<Vec<MatchFragment>> for OrConditions {
    fn from(fragments: Vec<MatchFragment>) -> Self {
        OrConditions::Fragments(fragments)
    }
}

impl From<Map<String, Value>> for OrConditions {
    fn from(map: Map<String, Value>) -> Self {
        OrConditions::Object(map)
    }
}
