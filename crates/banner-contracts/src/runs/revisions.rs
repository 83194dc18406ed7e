use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use similar::TextDiff;

use crate::catalog::SizeTarget;
use crate::now_utc_iso;

pub const REVISION_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionAction {
    Generate,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub revision_id: String,
    pub parent_revision_id: Option<String>,
    pub item_id: String,
    pub template_version: u64,
    pub action: RevisionAction,
    pub prompt: String,
    pub platform: String,
    pub size: String,
    pub template: String,
    pub template_sha256: String,
    pub template_diff: Option<Vec<String>>,
    pub created_at: String,
}

/// Every template version produced in a session, with lineage per item.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionManifest {
    pub path: PathBuf,
    pub schema_version: u64,
    pub session_id: String,
    pub created_at: String,
    pub revisions: Vec<RevisionEntry>,
}

impl RevisionManifest {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            schema_version: REVISION_SCHEMA_VERSION,
            session_id: session_id.into(),
            created_at: now_utc_iso(),
            revisions: Vec::new(),
        }
    }

    /// Loads what parses; unreadable files and malformed rows are skipped.
    pub fn load(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        let path = path.into();
        let mut manifest = Self::new(path.clone(), session_id);
        let payload = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .unwrap_or(Value::Object(Map::new()));
        let Some(obj) = payload.as_object() else {
            return manifest;
        };

        manifest.schema_version = obj
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(manifest.schema_version);
        if let Some(created_at) = obj.get("created_at").and_then(Value::as_str) {
            manifest.created_at = created_at.to_string();
        }
        if let Some(rows) = obj.get("revisions").and_then(Value::as_array) {
            manifest.revisions = rows
                .iter()
                .filter_map(|row| serde_json::from_value::<RevisionEntry>(row.clone()).ok())
                .collect();
        }
        manifest
    }

    pub fn record(
        &mut self,
        item_id: &str,
        template_version: u64,
        action: RevisionAction,
        prompt: &str,
        target: &SizeTarget,
        template: &str,
    ) -> RevisionEntry {
        let parent = self.latest_for(item_id);
        let entry = RevisionEntry {
            revision_id: format!("r{}", self.revisions.len() + 1),
            parent_revision_id: parent.map(|row| row.revision_id.clone()),
            item_id: item_id.to_string(),
            template_version,
            action,
            prompt: prompt.to_string(),
            platform: target.platform.clone(),
            size: target.name.clone(),
            template: template.to_string(),
            template_sha256: template_sha256(template),
            template_diff: parent.map(|row| template_diff(&row.template, template)),
            created_at: now_utc_iso(),
        };
        self.revisions.push(entry.clone());
        entry
    }

    pub fn latest_for(&self, item_id: &str) -> Option<&RevisionEntry> {
        self.revisions
            .iter()
            .rev()
            .find(|row| row.item_id == item_id)
    }

    pub fn history_for(&self, item_id: &str) -> Vec<&RevisionEntry> {
        self.revisions
            .iter()
            .filter(|row| row.item_id == item_id)
            .collect()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "schema_version": self.schema_version,
            "session_id": self.session_id,
            "created_at": self.created_at,
            "revisions": self.revisions,
        });
        crate::write_json_pretty(&self.path, &payload)
    }
}

pub fn template_sha256(template: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.as_bytes());
    hex::encode(hasher.finalize())
}

fn template_diff(prev: &str, curr: &str) -> Vec<String> {
    TextDiff::from_lines(prev, curr)
        .unified_diff()
        .header("prev", "curr")
        .to_string()
        .lines()
        .map(str::to_string)
        .collect()
}
