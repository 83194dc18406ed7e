use banner_contracts::items::TransitionError;
use thiserror::Error;

use crate::backend::BackendResponseError;

pub const GENERATE_FALLBACK: &str = "Failed to generate templates. Please try again.";
pub const EDIT_FALLBACK: &str = "Failed to edit template";
pub const PREVIEW_FAILED: &str =
    "Failed to generate preview image. You can still download the image.";
pub const HISTORY_FALLBACK: &str = "Failed to load chat history";

pub fn render_fallback(platform: &str, size: &str) -> String {
    format!("Failed to generate image for {platform} {size}")
}

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    Network {
        operation: &'static str,
        message: String,
    },
    #[error("no item {0} in the current batch")]
    UnknownItem(String),
    #[error("an edit is already being applied to {item_id}")]
    EditInProgress { item_id: String },
    #[error(transparent)]
    InvalidTransition(TransitionError),
    #[error("{item_id} has no template to export")]
    ExportUnavailable { item_id: String },
    #[error("local state error: {0}")]
    Storage(String),
}

impl StudioError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wraps a failed backend call, keeping the backend's own message when it
    /// sent one and the generic text otherwise.
    pub fn network(operation: &'static str, err: &anyhow::Error, fallback: &str) -> Self {
        Self::Network {
            operation,
            message: user_message(err, fallback),
        }
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(error_chain_text(&err, 512))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<TransitionError> for StudioError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::EditInProgress { item_id } => Self::EditInProgress { item_id },
            other => Self::InvalidTransition(other),
        }
    }
}

/// Backend `detail` if one came back, then the error chain, then `fallback`.
pub fn user_message(err: &anyhow::Error, fallback: &str) -> String {
    if let Some(detail) = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<BackendResponseError>())
        .find_map(|response| response.detail.clone())
        .filter(|detail| !detail.trim().is_empty())
    {
        return detail;
    }
    let text = error_chain_text(err, 512);
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn backend_detail_wins_over_context() {
        let err = anyhow::Error::new(BackendResponseError {
            operation: "generate-initial".to_string(),
            status: 400,
            detail: Some("Prompt is too long".to_string()),
        })
        .context("generate-initial failed for Facebook Square");
        assert_eq!(user_message(&err, GENERATE_FALLBACK), "Prompt is too long");
    }

    #[test]
    fn chain_text_is_used_without_detail() {
        let err = anyhow!("connection refused").context("generate-with-context request failed");
        assert_eq!(
            user_message(&err, EDIT_FALLBACK),
            "generate-with-context request failed | caused by: connection refused"
        );
    }

    #[test]
    fn blank_errors_fall_back_to_generic_text() {
        let err = anyhow!("  ");
        assert_eq!(user_message(&err, GENERATE_FALLBACK), GENERATE_FALLBACK);
        assert_eq!(
            render_fallback("Instagram", "Story"),
            "Failed to generate image for Instagram Story"
        );
    }

    #[test]
    fn edit_in_progress_keeps_its_own_variant() {
        let err = StudioError::from(TransitionError::EditInProgress {
            item_id: "template-1-0".to_string(),
        });
        assert!(matches!(err, StudioError::EditInProgress { .. }));
        assert_eq!(err.to_string(), "an edit is already being applied to template-1-0");
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
