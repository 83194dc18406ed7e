use std::fmt;

use anyhow::Result;
use banner_contracts::catalog::{Dimensions, SizeCatalog, SizeTarget};
use banner_contracts::conversation::{serialize_turns, ContextTurn, ConversationEntry};
use banner_contracts::session::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const PREVIEW_PROMPT: &str = "Generate image preview";
pub const EXPORT_PROMPT: &str = "Generate image for download";

/// Initial template generation for one size target.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub session_id: SessionId,
    pub prompt: String,
    pub target: SizeTarget,
    pub chat_history: Vec<ContextTurn>,
}

impl GenerateRequest {
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("session_id", self.session_id.to_string()),
            ("prompt", self.prompt.clone()),
            ("platform", self.target.platform.clone()),
            ("size_name", self.target.name.clone()),
            (
                "size_config",
                json!({
                    "name": self.target.name,
                    "width": self.target.width,
                    "height": self.target.height,
                })
                .to_string(),
            ),
            ("chat_history", serialize_turns(&self.chat_history)),
        ]
    }
}

/// Context-aware refinement of an existing template.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub session_id: SessionId,
    pub template: String,
    pub prompt: String,
    pub chat_history: Vec<ContextTurn>,
}

impl EditRequest {
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("session_id", self.session_id.to_string()),
            ("template", self.template.clone()),
            ("prompt", self.prompt.clone()),
            ("chat_history", serialize_turns(&self.chat_history)),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPurpose {
    Preview,
    Export,
}

impl RenderPurpose {
    pub fn prompt(self) -> &'static str {
        match self {
            Self::Preview => PREVIEW_PROMPT,
            Self::Export => EXPORT_PROMPT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub template: String,
    pub purpose: RenderPurpose,
}

impl RenderRequest {
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("template", self.template.clone()),
            ("prompt", self.purpose.prompt().to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTemplate {
    pub template: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDimensions {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub size_class: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// The content-generation service. Every call is a blocking request; none of
/// the mutating calls are safe to retry blindly since each one appends to the
/// backend's conversation memory.
pub trait StudioBackend: Send + Sync {
    fn name(&self) -> &str;
    fn default_template(&self) -> Result<String>;
    fn template_dimensions(&self, template: &str) -> Result<TemplateDimensions>;
    fn platform_sizes(&self) -> Result<SizeCatalog>;
    fn generate_initial(&self, request: &GenerateRequest) -> Result<GeneratedTemplate>;
    fn generate_with_context(&self, request: &EditRequest) -> Result<String>;
    fn generate_image(&self, request: &RenderRequest) -> Result<ImageBytes>;
    fn chat_history(&self, session_id: &SessionId) -> Result<Vec<ConversationEntry>>;
    fn clear_chat_history(&self, session_id: &SessionId) -> Result<()>;
}

/// Non-success reply from the backend, carrying its `detail` message if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponseError {
    pub operation: String,
    pub status: u16,
    pub detail: Option<String>,
}

impl fmt::Display for BackendResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => f.write_str(detail),
            None => write!(f, "{} request failed ({})", self.operation, self.status),
        }
    }
}

impl std::error::Error for BackendResponseError {}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn target() -> SizeTarget {
        SizeTarget {
            platform: "Facebook".to_string(),
            name: "Story".to_string(),
            width: 1080,
            height: 1920,
        }
    }

    fn field<'a>(fields: &'a [(&'static str, String)], key: &str) -> &'a str {
        fields
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }

    #[test]
    fn generate_fields_carry_size_and_history() -> anyhow::Result<()> {
        let request = GenerateRequest {
            session_id: SessionId::new("s-1"),
            prompt: "Spring launch".to_string(),
            target: target(),
            chat_history: vec![ContextTurn {
                user_message: "earlier".to_string(),
                ai_response: "ok".to_string(),
                created_at: "2026-01-01T00:00:00Z".to_string(),
            }],
        };
        let fields = request.form_fields();
        assert_eq!(field(&fields, "session_id"), "s-1");
        assert_eq!(field(&fields, "platform"), "Facebook");
        assert_eq!(field(&fields, "size_name"), "Story");

        let size: Value = serde_json::from_str(field(&fields, "size_config"))?;
        assert_eq!(size["height"], Value::from(1920));
        let history: Value = serde_json::from_str(field(&fields, "chat_history"))?;
        assert_eq!(history[0]["user_message"], Value::from("earlier"));
        Ok(())
    }

    #[test]
    fn render_prompt_follows_purpose() {
        let preview = RenderRequest {
            template: "<div/>".to_string(),
            purpose: RenderPurpose::Preview,
        };
        assert_eq!(field(&preview.form_fields(), "prompt"), PREVIEW_PROMPT);
        assert_eq!(RenderPurpose::Export.prompt(), EXPORT_PROMPT);
    }

    #[test]
    fn response_error_prefers_backend_detail() {
        let with_detail = BackendResponseError {
            operation: "generate-initial".to_string(),
            status: 422,
            detail: Some("Unknown size".to_string()),
        };
        assert_eq!(with_detail.to_string(), "Unknown size");

        let bare = BackendResponseError {
            detail: None,
            ..with_detail
        };
        assert_eq!(bare.to_string(), "generate-initial request failed (422)");
    }
}
