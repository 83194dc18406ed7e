use std::sync::Arc;

use banner_contracts::conversation::{ContextTurn, ConversationEntry, ConversationLog};
use banner_contracts::session::SessionId;

use crate::backend::StudioBackend;
use crate::error::{user_message, HISTORY_FALLBACK};

/// Result of a best-effort history call. Failures are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistorySync {
    Loaded(usize),
    Unavailable(String),
}

/// Session conversation backed by the service's history endpoints.
///
/// Local appends are optimistic; the service stores its own copy when it
/// handles a generate or edit call.
pub struct ConversationStore {
    backend: Arc<dyn StudioBackend>,
    log: ConversationLog,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn StudioBackend>, session_id: SessionId) -> Self {
        Self {
            backend,
            log: ConversationLog::new(session_id),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.log.session_id()
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        self.log.entries()
    }

    pub fn turns(&self) -> Vec<ContextTurn> {
        self.log.turns()
    }

    /// Replaces local entries with the service's copy. On failure the local
    /// log is emptied so a failed load never leaves another session's rows.
    pub fn load(&mut self) -> HistorySync {
        let session_id = self.log.session_id().clone();
        match self.backend.chat_history(&session_id) {
            Ok(entries) => {
                let count = entries.len();
                self.log.load(&session_id, entries);
                HistorySync::Loaded(count)
            }
            Err(err) => {
                self.log.clear();
                HistorySync::Unavailable(user_message(&err, HISTORY_FALLBACK))
            }
        }
    }

    pub fn append(&mut self, user_message: &str, ai_response: &str) -> ConversationEntry {
        self.log.append(user_message, ai_response)
    }

    /// Asks the service to forget the session, then clears locally whatever
    /// the service said.
    pub fn clear(&mut self) -> HistorySync {
        let session_id = self.log.session_id().clone();
        let outcome = match self.backend.clear_chat_history(&session_id) {
            Ok(()) => HistorySync::Loaded(0),
            Err(err) => {
                HistorySync::Unavailable(user_message(&err, "Failed to clear chat history"))
            }
        };
        self.log.clear();
        outcome
    }

    pub fn rebind(&mut self, session_id: SessionId) {
        self.log.rebind(session_id);
    }
}
