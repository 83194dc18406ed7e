use banner_contracts::catalog::SizeTarget;
use banner_contracts::conversation::ContextTurn;
use banner_contracts::session::SessionId;

use crate::backend::{EditRequest, GenerateRequest, RenderPurpose, RenderRequest};

/// Builds outbound requests against one frozen snapshot of the conversation.
///
/// A batch takes its snapshot once at start, so every target in the batch is
/// generated against the same context even as entries are appended.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    session_id: SessionId,
    history: Vec<ContextTurn>,
}

impl RequestBuilder {
    pub fn new(session_id: SessionId, history: Vec<ContextTurn>) -> Self {
        Self {
            session_id,
            history,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn history(&self) -> &[ContextTurn] {
        &self.history
    }

    pub fn generate(&self, brief: &str, target: &SizeTarget) -> GenerateRequest {
        GenerateRequest {
            session_id: self.session_id.clone(),
            prompt: brief.trim().to_string(),
            target: target.clone(),
            chat_history: self.history.clone(),
        }
    }

    pub fn edit(&self, template: &str, instruction: &str) -> EditRequest {
        EditRequest {
            session_id: self.session_id.clone(),
            template: template.to_string(),
            prompt: instruction.trim().to_string(),
            chat_history: self.history.clone(),
        }
    }
}

pub fn render(template: &str, purpose: RenderPurpose) -> RenderRequest {
    RenderRequest {
        template: template.to_string(),
        purpose,
    }
}
