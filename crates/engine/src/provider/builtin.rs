use das_types::{Constraint, RecordBody, StructuredQuery};
use serde_json::{Map, Value, json};

use super::LocalProvider;

/// Widest run range `runregistry:run_range` will expand.
pub const MAX_RUN_RANGE: i64 = 10_000;

/// Lists the query keys known to the service maps (`das:keys`).
#[derive(Debug, Clone, Default)]
pub struct DasKeysProvider {
    keys: Vec<String>,
}

impl DasKeysProvider {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl LocalProvider for DasKeysProvider {
    fn provide(&self, query: &StructuredQuery) -> Result<Vec<RecordBody>, String> {
        let needle = query.constraint("key").and_then(Constraint::first);
        Ok(self
            .keys
            .iter()
            .filter(|key| needle.as_deref().is_none_or(|needle| key.contains(needle)))
            .map(|key| row("key", json!({"name": key})))
            .collect())
    }
}

/// Expands a `run` constraint into one row per run number.
///
/// A two-element list is an inclusive range; any other list enumerates runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunRangeProvider;

impl LocalProvider for RunRangeProvider {
    fn provide(&self, query: &StructuredQuery) -> Result<Vec<RecordBody>, String> {
        let constraint = query.constraint("run").ok_or("a run constraint is required")?;
        let numbers = constraint
            .values()
            .iter()
            .map(|value| value.trim().parse::<i64>().map_err(|_| format!("invalid run number '{value}'")))
            .collect::<Result<Vec<_>, _>>()?;

        let runs: Vec<i64> = match (constraint, numbers.as_slice()) {
            (Constraint::List(_), [low, high]) => {
                let (low, high) = if low <= high { (*low, *high) } else { (*high, *low) };
                if high.checked_sub(low).is_none_or(|span| span >= MAX_RUN_RANGE) {
                    return Err(format!("run range {low}-{high} exceeds {MAX_RUN_RANGE} runs"));
                }
                (low..=high).collect()
            }
            _ => numbers.clone(),
        };
        Ok(runs.into_iter().map(|run| row("run", json!({"run_number": run}))).collect())
    }
}

fn row(key: &str, sub: Value) -> RecordBody {
    let mut body = Map::new();
    body.insert(key.to_string(), Value::Array(vec![sub]));
    body
}
