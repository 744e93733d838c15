//! Operator table: symbolic comparison operators to canonical match fragments
//!
//! | Symbol | Fragment |
//! |--------|----------|
//! | `=` | `{f: v}` (`{f: {$eq: null}}` for null) |
//! | `!=` `<>` | `{f: {$ne: v}}` |
//! | `>` `>=` `<` `<=` | `$gt` `$gte` `$lt` `$lte` |
//! | `in` `notIn` | `$in` / `$nin` over a literal array |
//! | `inColumn` `notInColumn` | `$expr` membership against another field |
//! | `like` `startsWith` `endsWith` | `$regex` (+ `$not` for negations) |
//! | `between` `notBetween` | `$gte`/`$lte` pair (+ `$not`) |
//! | `exists` `notExists` | `$exists` |
//! | `near` | equality hint only, see [`Operator::Near`] |

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use super::condition::MatchFragment;
use super::{PipelineError, Result};

/// Comparison, string and array operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// In literal array
    In,
    /// Not in literal array
    NotIn,
    /// In the array held by another field
    InColumn,
    /// Not in the array held by another field
    NotInColumn,
    /// SQL-style pattern match
    Like,
    /// Negated pattern match
    NotLike,
    /// Prefix match
    StartsWith,
    /// Negated prefix match
    NotStartsWith,
    /// Suffix match
    EndsWith,
    /// Negated suffix match
    NotEndsWith,
    /// Inclusive range
    Between,
    /// Outside inclusive range
    NotBetween,
    /// Field presence
    Exists,
    /// Field absence
    NotExists,
    /// Geospatial proximity.
    ///
    /// Distance filtering is not implemented: the operator only encodes an
    /// equality hint on the field and logs a warning.
    Near,
}

/// Collation policy for pattern operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternPolicy {
    /// Emit `$options: "i"` on generated regexes
    pub case_insensitive: bool,
}

impl Default for PatternPolicy {
    fn default() -> Self {
        Self {
            case_insensitive: true,
        }
    }
}

impl Operator {
    /// Every operator in the table
    pub const ALL: [Operator; 21] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::NotIn,
        Operator::InColumn,
        Operator::NotInColumn,
        Operator::Like,
        Operator::NotLike,
        Operator::StartsWith,
        Operator::NotStartsWith,
        Operator::EndsWith,
        Operator::NotEndsWith,
        Operator::Between,
        Operator::NotBetween,
        Operator::Exists,
        Operator::NotExists,
        Operator::Near,
    ];

    /// Look up an operator by its symbol
    pub fn from_symbol(symbol: &str) -> Result<Self> {
        let op = match symbol {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "in" => Operator::In,
            "notIn" => Operator::NotIn,
            "inColumn" => Operator::InColumn,
            "notInColumn" => Operator::NotInColumn,
            "like" => Operator::Like,
            "notLike" => Operator::NotLike,
            "startsWith" => Operator::StartsWith,
            "notStartsWith" => Operator::NotStartsWith,
            "endsWith" => Operator::EndsWith,
            "notEndsWith" => Operator::NotEndsWith,
            "between" => Operator::Between,
            "notBetween" => Operator::NotBetween,
            "exists" => Operator::Exists,
            "notExists" => Operator::NotExists,
            "near" => Operator::Near,
            _ => return Err(PipelineError::UnknownOperator(symbol.to_string())),
        };
        Ok(op)
    }

    /// Canonical symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "in",
            Operator::NotIn => "notIn",
            Operator::InColumn => "inColumn",
            Operator::NotInColumn => "notInColumn",
            Operator::Like => "like",
            Operator::NotLike => "notLike",
            Operator::StartsWith => "startsWith",
            Operator::NotStartsWith => "notStartsWith",
            Operator::EndsWith => "endsWith",
            Operator::NotEndsWith => "notEndsWith",
            Operator::Between => "between",
            Operator::NotBetween => "notBetween",
            Operator::Exists => "exists",
            Operator::NotExists => "notExists",
            Operator::Near => "near",
        }
    }

    /// Build the match fragment for `field <op> value`
    pub fn fragment(
        &self,
        field: &str,
        value: Value,
        policy: &PatternPolicy,
    ) -> Result<MatchFragment> {
        let condition = match self {
            Operator::Eq => return Ok(MatchFragment::equals(field, value)),
            Operator::Ne => json!({ "$ne": value }),
            Operator::Gt => json!({ "$gt": value }),
            Operator::Gte => json!({ "$gte": value }),
            Operator::Lt => json!({ "$lt": value }),
            Operator::Lte => json!({ "$lte": value }),
            Operator::In => json!({ "$in": self.literal_array(value)? }),
            Operator::NotIn => json!({ "$nin": self.literal_array(value)? }),
            Operator::InColumn => {
                let column = self.column_reference(value)?;
                return Ok(MatchFragment::single(
                    "$expr",
                    json!({ "$in": [format!("${}", field), format!("${}", column)] }),
                ));
            }
            Operator::NotInColumn => {
                let column = self.column_reference(value)?;
                return Ok(MatchFragment::single(
                    "$expr",
                    json!({ "$not": [{ "$in": [format!("${}", field), format!("${}", column)] }] }),
                ));
            }
            Operator::Like => regex_condition(like_pattern(&self.pattern(value)?), policy),
            Operator::NotLike => {
                json!({ "$not": regex_condition(like_pattern(&self.pattern(value)?), policy) })
            }
            Operator::StartsWith => {
                regex_condition(format!("^{}", regex::escape(&self.pattern(value)?)), policy)
            }
            Operator::NotStartsWith => json!({
                "$not": regex_condition(format!("^{}", regex::escape(&self.pattern(value)?)), policy)
            }),
            Operator::EndsWith => {
                regex_condition(format!("{}$", regex::escape(&self.pattern(value)?)), policy)
            }
            Operator::NotEndsWith => json!({
                "$not": regex_condition(format!("{}$", regex::escape(&self.pattern(value)?)), policy)
            }),
            Operator::Between => {
                let (low, high) = self.bounds(value)?;
                json!({ "$gte": low, "$lte": high })
            }
            Operator::NotBetween => {
                let (low, high) = self.bounds(value)?;
                json!({ "$not": { "$gte": low, "$lte": high } })
            }
            Operator::Exists => json!({ "$exists": truthy(&value) }),
            Operator::NotExists => json!({ "$exists": !truthy(&value) }),
            Operator::Near => {
                tracing::warn!(
                    field,
                    "near operator does not filter by distance; encoding an equality hint"
                );
                value
            }
        };

        Ok(MatchFragment::single(field, condition))
    }

    fn literal_array(&self, value: Value) -> Result<Vec<Value>> {
        match value {
            Value::Array(values) => Ok(values),
            other => Err(PipelineError::InvalidQuery(format!(
                "{} expects an array of values, got {}; use {}Column to compare against another field",
                self.symbol(),
                other,
                self.symbol()
            ))),
        }
    }

    fn column_reference(&self, value: Value) -> Result<String> {
        match value {
            Value::String(column) if !column.is_empty() => {
                Ok(column.trim_start_matches('$').to_string())
            }
            other => Err(PipelineError::InvalidQuery(format!(
                "{} expects a column name, got {}",
                self.symbol(),
                other
            ))),
        }
    }

    fn pattern(&self, value: Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(PipelineError::InvalidQuery(format!(
                "{} expects a string pattern, got {}",
                self.symbol(),
                other
            ))),
        }
    }

    fn bounds(&self, value: Value) -> Result<(Value, Value)> {
        match value {
            Value::Array(bounds) if bounds.len() == 2 => {
                let mut bounds = bounds.into_iter();
                match (bounds.next(), bounds.next()) {
                    (Some(low), Some(high)) => Ok((low, high)),
                    _ => Err(self.bounds_error(0)),
                }
            }
            Value::Array(bounds) => Err(self.bounds_error(bounds.len())),
            _ => Err(self.bounds_error(1)),
        }
    }

    fn bounds_error(&self, len: usize) -> PipelineError {
        PipelineError::InvalidBounds {
            operator: self.symbol().to_string(),
            len,
        }
    }
}

impl FromStr for Operator {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Operator::from_symbol(s)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Truthiness of an untyped input value
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Translate a SQL-style pattern (`%`, `_`) into a regex body.
///
/// Patterns without wildcards match as substrings; patterns with wildcards
/// are anchored at both ends.
fn like_pattern(pattern: &str) -> String {
    if !pattern.contains(['%', '_']) {
        return regex::escape(pattern);
    }

    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '%' | '_' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '%' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

fn regex_condition(pattern: String, policy: &PatternPolicy) -> Value {
    let mut condition = Map::new();
    condition.insert("$regex".to_string(), Value::String(pattern));
    if policy.case_insensitive {
        condition.insert("$options".to_string(), Value::String("i".to_string()));
    }
    Value::Object(condition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(op: &str, field: &str, value: Value) -> Value {
        Operator::from_symbol(op)
            .unwrap()
            .fragment(field, value, &PatternPolicy::default())
            .unwrap()
            .into_value()
    }

    #[test]
    fn test_symbol_roundtrip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_symbol(op.symbol()).unwrap(), op);
        }
        assert_eq!("<>".parse::<Operator>().unwrap(), Operator::Ne);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = Operator::from_symbol("~=").unwrap_err();
        assert_eq!(err, PipelineError::UnknownOperator("~=".into()));
    }

    #[test]
    fn test_comparison_fragments() {
        assert_eq!(frag("=", "name", json!("Alice")), json!({ "name": "Alice" }));
        assert_eq!(frag("=", "deleted_at", Value::Null), json!({ "deleted_at": { "$eq": null } }));
        assert_eq!(frag("!=", "age", json!(3)), json!({ "age": { "$ne": 3 } }));
        assert_eq!(frag(">=", "age", json!(18)), json!({ "age": { "$gte": 18 } }));
        assert_eq!(frag("<", "age", json!(65)), json!({ "age": { "$lt": 65 } }));
    }

    #[test]
    fn test_in_requires_array() {
        assert_eq!(
            frag("in", "status", json!(["a", "b"])),
            json!({ "status": { "$in": ["a", "b"] } })
        );
        assert_eq!(frag("notIn", "status", json!([1])), json!({ "status": { "$nin": [1] } }));

        let err = Operator::In
            .fragment("status", json!("tags"), &PatternPolicy::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuery(_)));
    }

    #[test]
    fn test_in_column() {
        assert_eq!(
            frag("inColumn", "owner", json!("members")),
            json!({ "$expr": { "$in": ["$owner", "$members"] } })
        );
        assert_eq!(
            frag("notInColumn", "owner", json!("$members")),
            json!({ "$expr": { "$not": [{ "$in": ["$owner", "$members"] }] } })
        );
        assert!(Operator::InColumn
            .fragment("owner", json!(["members"]), &PatternPolicy::default())
            .is_err());
    }

    #[test]
    fn test_pattern_fragments() {
        assert_eq!(
            frag("like", "name", json!("al.ce")),
            json!({ "name": { "$regex": "al\\.ce", "$options": "i" } })
        );
        assert_eq!(
            frag("like", "name", json!("A%e_")),
            json!({ "name": { "$regex": "^A.*e.$", "$options": "i" } })
        );
        assert_eq!(
            frag("startsWith", "name", json!("Al")),
            json!({ "name": { "$regex": "^Al", "$options": "i" } })
        );
        assert_eq!(
            frag("notEndsWith", "email", json!(".io")),
            json!({ "email": { "$not": { "$regex": "\\.io$", "$options": "i" } } })
        );

        let sensitive = PatternPolicy {
            case_insensitive: false,
        };
        let fragment = Operator::Like
            .fragment("name", json!("bob"), &sensitive)
            .unwrap()
            .into_value();
        assert_eq!(fragment, json!({ "name": { "$regex": "bob" } }));
    }

    #[test]
    fn test_between_bounds() {
        assert_eq!(
            frag("between", "age", json!([18, 30])),
            json!({ "age": { "$gte": 18, "$lte": 30 } })
        );
        assert_eq!(
            frag("notBetween", "age", json!([18, 30])),
            json!({ "age": { "$not": { "$gte": 18, "$lte": 30 } } })
        );

        for bad in [json!([1]), json!([1, 2, 3]), json!(5)] {
            let err = Operator::Between
                .fragment("age", bad, &PatternPolicy::default())
                .unwrap_err();
            assert!(matches!(err, PipelineError::InvalidBounds { .. }));
        }
    }

    #[test]
    fn test_exists_and_near() {
        assert_eq!(frag("exists", "email", json!(true)), json!({ "email": { "$exists": true } }));
        assert_eq!(frag("exists", "email", json!(0)), json!({ "email": { "$exists": false } }));
        assert_eq!(frag("notExists", "email", json!(true)), json!({ "email": { "$exists": false } }));
        assert_eq!(frag("near", "location", json!([1.5, 2.0])), json!({ "location": [1.5, 2.0] }));
    }
}
