//! Group-stage accumulator expressions

use serde_json::{json, Map, Value};

use super::{PipelineError, Result};

/// Accumulator operators
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Sum
    Sum(Value),
    /// Average
    Avg(Value),
    /// Min
    Min(Value),
    /// Max
    Max(Value),
    /// First value in the bucket
    First(Value),
    /// Last value in the bucket
    Last(Value),
    /// Push to array
    Push(Value),
    /// Add to set
    AddToSet(Value),
    /// Row count, emitted as `{ "$sum": 1 }`
    Count,
}

/// Field reference expression (`"$column"`)
pub fn field_ref(column: &str) -> Value {
    if column.starts_with('$') {
        Value::String(column.to_string())
    } else {
        Value::String(format!("${}", column))
    }
}

impl Accumulator {
    /// Sum of a column
    pub fn sum(column: &str) -> Self {
        Accumulator::Sum(field_ref(column))
    }

    /// Average of a column
    pub fn avg(column: &str) -> Self {
        Accumulator::Avg(field_ref(column))
    }

    /// Minimum of a column
    pub fn min(column: &str) -> Self {
        Accumulator::Min(field_ref(column))
    }

    /// Maximum of a column
    pub fn max(column: &str) -> Self {
        Accumulator::Max(field_ref(column))
    }

    /// Every value of a column
    pub fn push(column: &str) -> Self {
        Accumulator::Push(field_ref(column))
    }

    /// Distinct values of a column
    pub fn add_to_set(column: &str) -> Self {
        Accumulator::AddToSet(field_ref(column))
    }

    /// Operator tag
    pub fn operator(&self) -> &'static str {
        match self {
            Accumulator::Sum(_) | Accumulator::Count => "$sum",
            Accumulator::Avg(_) => "$avg",
            Accumulator::Min(_) => "$min",
            Accumulator::Max(_) => "$max",
            Accumulator::First(_) => "$first",
            Accumulator::Last(_) => "$last",
            Accumulator::Push(_) => "$push",
            Accumulator::AddToSet(_) => "$addToSet",
        }
    }

    /// Wire form: `{ "$op": expression }`
    pub fn serialize(&self) -> Value {
        let expr = match self {
            Accumulator::Count => json!(1),
            Accumulator::Sum(e)
            | Accumulator::Avg(e)
            | Accumulator::Min(e)
            | Accumulator::Max(e)
            | Accumulator::First(e)
            | Accumulator::Last(e)
            | Accumulator::Push(e)
            | Accumulator::AddToSet(e) => e.clone(),
        };
        let mut wire = Map::new();
        wire.insert(self.operator().to_string(), expr);
        Value::Object(wire)
    }

    /// Parse an accumulator from its wire form
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            PipelineError::InvalidArgument("Accumulator must be an object".into())
        })?;

        if obj.len() != 1 {
            return Err(PipelineError::InvalidArgument(
                "Accumulator must have exactly one operator".into(),
            ));
        }

        let (op, expr) = obj.iter().next().ok_or_else(|| {
            PipelineError::InvalidArgument("Empty accumulator operator".into())
        })?;
        let expr = expr.clone();

        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(expr)),
            "$avg" => Ok(Accumulator::Avg(expr)),
            "$min" => Ok(Accumulator::Min(expr)),
            "$max" => Ok(Accumulator::Max(expr)),
            "$first" => Ok(Accumulator::First(expr)),
            "$last" => Ok(Accumulator::Last(expr)),
            "$push" => Ok(Accumulator::Push(expr)),
            "$addToSet" => Ok(Accumulator::AddToSet(expr)),
            "$count" => Ok(Accumulator::Count),
            _ => Err(PipelineError::InvalidArgument(format!(
                "Unknown accumulator: {}",
                op
            ))),
        }
    }
}
