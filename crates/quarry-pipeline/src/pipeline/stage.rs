//! Pipeline stage set
//!
//! One variant per stage kind. Each variant knows only how to serialize its
//! own payload; none of them inspects sibling stages.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};

use super::accumulator::{field_ref, Accumulator};
use super::condition::MatchFragment;
use super::{PipelineError, Result};

/// Pipeline stage types
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Filter rows (`$match`)
    Match(MatchFragment),
    /// Filter rows matching any branch (`$match` + `$or`)
    OrMatch(Vec<MatchFragment>),
    /// Sort rows
    Sort(Vec<(String, SortDirection)>),
    /// Limit results
    Limit(u64),
    /// Skip results
    Skip(u64),
    /// Keep only these fields
    Select(Vec<String>),
    /// Drop these fields
    Deselect(Vec<String>),
    /// Unwind array field
    Unwind(UnwindSpec),
    /// Group rows
    Group(GroupSpec),
    /// Lookup (join)
    Lookup(LookupSpec),
    /// Add computed fields
    AddFields(Map<String, Value>),
    /// Random sample
    Sample(u64),
    /// Already-serialized stage fragment, passed through unchanged
    Raw(Value),
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending
    Ascending,
    /// Descending
    Descending,
}

impl SortDirection {
    /// Wire value (`1` / `-1`)
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }

    /// Opposite direction
    pub fn reverse(&self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    /// Parse `1`/`-1` or `"asc"`/`"desc"`
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(1) => Ok(SortDirection::Ascending),
                Some(-1) => Ok(SortDirection::Descending),
                _ => Err(PipelineError::InvalidArgument(
                    "Sort direction must be 1 or -1".into(),
                )),
            },
            Value::String(s) => s.parse(),
            other => Err(PipelineError::InvalidArgument(format!(
                "Invalid sort direction: {}",
                other
            ))),
        }
    }
}

impl FromStr for SortDirection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(SortDirection::Ascending),
            "desc" | "descending" | "-1" => Ok(SortDirection::Descending),
            _ => Err(PipelineError::InvalidArgument(format!(
                "Sort direction must be asc or desc, got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Ascending => f.write_str("asc"),
            SortDirection::Descending => f.write_str("desc"),
        }
    }
}

/// Unwind options
#[derive(Debug, Clone, PartialEq)]
pub struct UnwindSpec {
    /// Path to array field
    pub path: String,
    /// Include array index
    pub include_array_index: Option<String>,
    /// Preserve null and empty arrays
    pub preserve_null_and_empty: bool,
}

impl UnwindSpec {
    /// Plain unwind of a path
    pub fn new(path: &str) -> Self {
        Self {
            path: path.trim_start_matches('$').to_string(),
            include_array_index: None,
            preserve_null_and_empty: false,
        }
    }

    /// Keep rows whose array is missing, null or empty
    pub fn preserve_empty(mut self) -> Self {
        self.preserve_null_and_empty = true;
        self
    }

    /// Store each element's index in `field`
    pub fn with_index(mut self, field: &str) -> Self {
        self.include_array_index = Some(field.to_string());
        self
    }
}

/// Grouping key
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// Single column
    Field(String),
    /// Compound key; each column becomes a sub-key of `_id`
    Fields(Vec<String>),
    /// Arbitrary key expression
    Expression(Value),
}

impl GroupKey {
    fn serialize(&self) -> Value {
        match self {
            GroupKey::Field(column) => field_ref(column),
            GroupKey::Fields(columns) => {
                let mut key = Map::new();
                for column in columns {
                    key.insert(column.replace('.', "_"), field_ref(column));
                }
                Value::Object(key)
            }
            GroupKey::Expression(expr) => expr.clone(),
        }
    }
}

/// Group definition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupSpec {
    /// Group key; `None` puts every row in one bucket
    pub key: Option<GroupKey>,
    /// Output field → accumulator
    pub accumulators: Vec<(String, Accumulator)>,
}

impl GroupSpec {
    /// One bucket for all rows
    pub fn all() -> Self {
        Self::default()
    }

    /// Group by a key
    pub fn by(key: GroupKey) -> Self {
        Self {
            key: Some(key),
            accumulators: Vec::new(),
        }
    }

    /// Add an accumulator output
    pub fn accumulate(mut self, field: &str, accumulator: Accumulator) -> Self {
        self.accumulators.push((field.to_string(), accumulator));
        self
    }

    /// Parse a group definition from its `$group` body.
    ///
    /// `_id` may be absent or null (one bucket), a `"$column"` reference, or
    /// any other key expression. Every other key is an output accumulator.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            PipelineError::InvalidArgument("Group definition must be an object".into())
        })?;

        let key = match obj.get("_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.len() > 1 && s.starts_with('$') => {
                Some(GroupKey::Field(s[1..].to_string()))
            }
            Some(expr) => Some(GroupKey::Expression(expr.clone())),
        };

        let mut spec = GroupSpec {
            key,
            accumulators: Vec::new(),
        };
        for (field, accumulator) in obj.iter().filter(|(field, _)| *field != "_id") {
            spec = spec.accumulate(field, Accumulator::from_json(accumulator)?);
        }
        Ok(spec)
    }
}

/// Lookup (join) definition
#[derive(Debug, Clone, PartialEq)]
pub struct LookupSpec {
    /// Foreign collection
    pub from: String,
    /// Local field
    pub local_field: Option<String>,
    /// Foreign field
    pub foreign_field: Option<String>,
    /// Variables bound for the sub-pipeline
    pub let_vars: Option<Map<String, Value>>,
    /// Sub-pipeline run against the foreign collection
    pub pipeline: Option<Vec<Value>>,
    /// Output array field
    pub r#as: String,
}

impl LookupSpec {
    /// Equality join on `local_field == foreign_field`
    pub fn new(from: &str, local_field: &str, foreign_field: &str, r#as: &str) -> Self {
        Self {
            from: from.to_string(),
            local_field: Some(local_field.to_string()),
            foreign_field: Some(foreign_field.to_string()),
            let_vars: None,
            pipeline: None,
            r#as: r#as.to_string(),
        }
    }

    /// Join through a sub-pipeline only
    pub fn pipeline(from: &str, pipeline: Vec<Value>, r#as: &str) -> Self {
        Self {
            from: from.to_string(),
            local_field: None,
            foreign_field: None,
            let_vars: None,
            pipeline: Some(pipeline),
            r#as: r#as.to_string(),
        }
    }

    /// Bind variables for the sub-pipeline
    pub fn with_let(mut self, vars: Map<String, Value>) -> Self {
        self.let_vars = Some(vars);
        self
    }

    /// Attach a sub-pipeline
    pub fn with_pipeline(mut self, pipeline: Vec<Value>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Check the lookup can be executed
    pub fn validate(&self) -> Result<()> {
        if self.from.is_empty() || self.r#as.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "$lookup requires from and as".into(),
            ));
        }
        let keyed = self.local_field.is_some() && self.foreign_field.is_some();
        if self.local_field.is_some() != self.foreign_field.is_some() {
            return Err(PipelineError::InvalidArgument(
                "$lookup requires both localField and foreignField".into(),
            ));
        }
        if !keyed && self.pipeline.is_none() {
            return Err(PipelineError::InvalidArgument(
                "$lookup requires join keys or a pipeline".into(),
            ));
        }
        Ok(())
    }
}

impl Stage {
    /// Stage kind
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "where",
            Stage::OrMatch(_) => "orWhere",
            Stage::Sort(_) => "sort",
            Stage::Limit(_) => "limit",
            Stage::Skip(_) => "skip",
            Stage::Select(_) => "select",
            Stage::Deselect(_) => "deselect",
            Stage::Unwind(_) => "unwind",
            Stage::Group(_) => "group",
            Stage::Lookup(_) => "lookup",
            Stage::AddFields(_) => "addFields",
            Stage::Sample(_) => "sample",
            Stage::Raw(_) => "raw",
        }
    }

    /// Serialize into the single-key wire fragment
    pub fn serialize(&self) -> Value {
        match self {
            Stage::Match(fragment) => json!({ "$match": fragment.as_map() }),
            Stage::OrMatch(fragments) => {
                let branches: Vec<&Map<String, Value>> =
                    fragments.iter().map(MatchFragment::as_map).collect();
                json!({ "$match": { "$or": branches } })
            }
            Stage::Sort(keys) => {
                let mut sort = Map::new();
                for (field, direction) in keys {
                    sort.insert(field.clone(), json!(direction.as_i32()));
                }
                json!({ "$sort": sort })
            }
            Stage::Limit(n) => json!({ "$limit": n }),
            Stage::Skip(n) => json!({ "$skip": n }),
            Stage::Select(fields) => json!({ "$project": projection(fields, 1) }),
            Stage::Deselect(fields) => json!({ "$project": projection(fields, 0) }),
            Stage::Unwind(spec) => {
                let path = format!("${}", spec.path);
                if spec.include_array_index.is_none() && !spec.preserve_null_and_empty {
                    return json!({ "$unwind": path });
                }
                let mut unwind = Map::new();
                unwind.insert("path".into(), Value::String(path));
                if let Some(index) = &spec.include_array_index {
                    unwind.insert("includeArrayIndex".into(), Value::String(index.clone()));
                }
                if spec.preserve_null_and_empty {
                    unwind.insert("preserveNullAndEmptyArrays".into(), Value::Bool(true));
                }
                json!({ "$unwind": unwind })
            }
            Stage::Group(spec) => {
                let mut group = Map::new();
                group.insert(
                    "_id".into(),
                    spec.key.as_ref().map(GroupKey::serialize).unwrap_or(Value::Null),
                );
                for (field, accumulator) in &spec.accumulators {
                    group.insert(field.clone(), accumulator.serialize());
                }
                json!({ "$group": group })
            }
            Stage::Lookup(spec) => {
                let mut lookup = Map::new();
                lookup.insert("from".into(), Value::String(spec.from.clone()));
                if let Some(local) = &spec.local_field {
                    lookup.insert("localField".into(), Value::String(local.clone()));
                }
                if let Some(foreign) = &spec.foreign_field {
                    lookup.insert("foreignField".into(), Value::String(foreign.clone()));
                }
                if let Some(vars) = &spec.let_vars {
                    lookup.insert("let".into(), Value::Object(vars.clone()));
                }
                if let Some(pipeline) = &spec.pipeline {
                    lookup.insert("pipeline".into(), Value::Array(pipeline.clone()));
                }
                lookup.insert("as".into(), Value::String(spec.r#as.clone()));
                json!({ "$lookup": lookup })
            }
            Stage::AddFields(fields) => json!({ "$addFields": fields }),
            Stage::Sample(size) => json!({ "$sample": { "size": size } }),
            Stage::Raw(fragment) => fragment.clone(),
        }
    }
}

fn projection(fields: &[String], flag: u8) -> Map<String, Value> {
    fields
        .iter()
        .map(|field| (field.clone(), json!(flag)))
        .collect()
}
