use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::now_utc_iso;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    #[serde(default, deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub ai_response: String,
    #[serde(default)]
    pub created_at: String,
}

/// What the backend receives for each prior turn. Entry ids stay local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub user_message: String,
    pub ai_response: String,
    pub created_at: String,
}

impl From<&ConversationEntry> for ContextTurn {
    fn from(entry: &ConversationEntry) -> Self {
        Self {
            user_message: entry.user_message.clone(),
            ai_response: entry.ai_response.clone(),
            created_at: entry.created_at.clone(),
        }
    }
}

/// Ordered conversation history of one session.
///
/// Entries are immutable once appended. Rebinding to another session drops
/// everything, so history never leaks across session ids.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    session_id: SessionId,
    entries: Vec<ConversationEntry>,
    last_local_id: i64,
}

impl ConversationLog {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            entries: Vec::new(),
            last_local_id: 0,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Optimistic local append; the backend records its own copy as a side
    /// effect of the generate/edit call.
    pub fn append(
        &mut self,
        user_message: impl Into<String>,
        ai_response: impl Into<String>,
    ) -> ConversationEntry {
        let stamp = chrono::Utc::now().timestamp_millis();
        self.last_local_id = stamp.max(self.last_local_id + 1);
        let entry = ConversationEntry {
            id: self.last_local_id.to_string(),
            user_message: user_message.into(),
            ai_response: ai_response.into(),
            created_at: now_utc_iso(),
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Bulk load. Entries fetched for a different session are ignored.
    pub fn load(&mut self, session_id: &SessionId, entries: Vec<ConversationEntry>) -> bool {
        if session_id != &self.session_id {
            return false;
        }
        self.entries = entries;
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn rebind(&mut self, session_id: SessionId) {
        self.session_id = session_id;
        self.entries.clear();
    }

    pub fn turns(&self) -> Vec<ContextTurn> {
        self.entries.iter().map(ContextTurn::from).collect()
    }
}

/// Compact JSON array sent as the `chat_history` request field.
pub fn serialize_turns(turns: &[ContextTurn]) -> String {
    serde_json::to_string(turns).unwrap_or_else(|_| "[]".to_string())
}

fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}
