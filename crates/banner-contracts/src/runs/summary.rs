use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::now_utc_iso;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub batches: u64,
    pub items_generated: u64,
    pub items_failed: u64,
    pub edits_applied: u64,
    pub edits_failed: u64,
    pub previews_ready: u64,
    pub previews_failed: u64,
    pub previews_dropped: u64,
    pub exports: u64,
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }
    crate::write_json_pretty(path, &Value::Object(payload))
}
