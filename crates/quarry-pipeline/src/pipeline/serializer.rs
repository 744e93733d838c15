//! Pipeline serializer
//!
//! Flattens a stage list into wire fragments and splits serialized pipelines
//! into the `(filter, pipeline)` pair expected by driver update calls.

use serde_json::{Map, Value};

use super::stage::Stage;

/// Serialize stages in order; raw fragments pass through unchanged
pub fn serialize(stages: &[Stage]) -> Vec<Value> {
    stages.iter().map(Stage::serialize).collect()
}

/// Filter object plus the remaining pipeline, ready for an update call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
    /// Every match stage merged into one filter
    pub filter: Map<String, Value>,
    /// All other stages, in their original order
    pub pipeline: Vec<Value>,
}

/// Whether a wire fragment is purely a match filter
pub fn is_match(fragment: &Value) -> bool {
    match fragment.as_object() {
        Some(obj) => obj.len() == 1 && obj.get("$match").map_or(false, Value::is_object),
        None => false,
    }
}

/// Split a serialized pipeline into a merged match filter and the rest.
///
/// Match fragments merge shallowly. When two fragments constrain the same
/// key, the filter becomes `{ "$and": [...] }` over every fragment so that
/// no condition is overwritten.
pub fn partition(fragments: Vec<Value>) -> UpdatePlan {
    let mut filters: Vec<Map<String, Value>> = Vec::new();
    let mut pipeline = Vec::new();

    for fragment in fragments {
        if !is_match(&fragment) {
            pipeline.push(fragment);
            continue;
        }
        if let Value::Object(mut stage) = fragment {
            if let Some(Value::Object(filter)) = stage.remove("$match") {
                filters.push(filter);
            }
        }
    }

    UpdatePlan {
        filter: merge_filters(filters),
        pipeline,
    }
}

fn merge_filters(filters: Vec<Map<String, Value>>) -> Map<String, Value> {
    let conflict = {
        let mut seen = std::collections::HashSet::new();
        filters
            .iter()
            .flat_map(|f| f.keys())
            .any(|key| !seen.insert(key.as_str()))
    };

    if conflict {
        let mut filter = Map::new();
        filter.insert(
            "$and".to_string(),
            Value::Array(filters.into_iter().map(Value::Object).collect()),
        );
        return filter;
    }

    let mut merged = Map::new();
    for filter in filters {
        merged.extend(filter);
    }
    merged
}
