use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Append-only writer for `events.jsonl`.
///
/// Every line carries `type`, `session_id`, `seq` and `ts`; the caller payload
/// is merged last and can override them. Clones share one sequence counter, so
/// preview workers and the studio thread interleave into a single ordered log.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    state: Mutex<EventLogState>,
}

#[derive(Debug)]
struct EventLogState {
    session_id: String,
    seq: u64,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                state: Mutex::new(EventLogState {
                    session_id: session_id.into(),
                    seq: 0,
                }),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> String {
        self.inner
            .state
            .lock()
            .map(|state| state.session_id.clone())
            .unwrap_or_default()
    }

    /// Rebinds subsequent lines to a new session (after a reset).
    pub fn set_session(&self, session_id: impl Into<String>) -> anyhow::Result<()> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        state.session_id = session_id.into();
        Ok(())
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        state.seq += 1;

        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(state.session_id.clone()),
        );
        event.insert("seq".to_string(), Value::Number(state.seq.into()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// Reads every parseable line of an events file. Malformed lines are skipped.
pub fn read_events(path: &Path) -> Vec<Value> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect()
}

/// Event `type` values in file order.
pub fn event_types(path: &Path) -> Vec<String> {
    read_events(path)
        .iter()
        .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
        .collect()
}
