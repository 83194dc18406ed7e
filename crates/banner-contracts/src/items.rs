use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{Dimensions, SizeTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Generating,
    Ready,
    Failed,
    PreviewLoading,
    PreviewReady,
    PreviewFailed,
    Editing,
    EditApplying,
    EditFailed,
}

impl ItemState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::PreviewLoading => "preview_loading",
            Self::PreviewReady => "preview_ready",
            Self::PreviewFailed => "preview_failed",
            Self::Editing => "editing",
            Self::EditApplying => "edit_applying",
            Self::EditFailed => "edit_failed",
        }
    }

    fn can_open_edit(self) -> bool {
        matches!(
            self,
            Self::Ready
                | Self::PreviewLoading
                | Self::PreviewReady
                | Self::PreviewFailed
                | Self::Editing
                | Self::EditFailed
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    EditInProgress {
        item_id: String,
    },
    NotAllowed {
        item_id: String,
        state: ItemState,
        action: &'static str,
    },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EditInProgress { item_id } => {
                write!(f, "an edit is already being applied to {item_id}")
            }
            Self::NotAllowed {
                item_id,
                state,
                action,
            } => write!(f, "cannot {action} {item_id} while {state}"),
        }
    }
}

impl std::error::Error for TransitionError {}

/// Rendered preview image, tagged with the template version it was made from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewArtifact {
    pub template_version: u64,
    pub path: PathBuf,
    pub bytes: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOutcome {
    Applied,
    Stale,
}

/// One creative for one size target, and its lifecycle.
///
/// The template is only ever replaced wholesale; each replacement bumps
/// `template_version`, which is how late preview results are recognised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationItem {
    id: String,
    target: SizeTarget,
    template: String,
    template_version: u64,
    state: ItemState,
    preview: Option<PreviewArtifact>,
    preview_in_flight: Option<u64>,
    preview_error: Option<String>,
    last_error: Option<String>,
}

impl GenerationItem {
    pub fn new(id: impl Into<String>, target: SizeTarget) -> Self {
        Self {
            id: id.into(),
            target,
            template: String::new(),
            template_version: 0,
            state: ItemState::Generating,
            preview: None,
            preview_in_flight: None,
            preview_error: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &SizeTarget {
        &self.target
    }

    pub fn platform(&self) -> &str {
        &self.target.platform
    }

    pub fn size(&self) -> &str {
        &self.target.name
    }

    pub fn dimensions(&self) -> Dimensions {
        self.target.dimensions()
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn template_version(&self) -> u64 {
        self.template_version
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn preview(&self) -> Option<&PreviewArtifact> {
        self.preview.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn can_export(&self) -> bool {
        !self.template.trim().is_empty()
    }

    pub fn complete_generation(&mut self, template: String) -> Result<u64, TransitionError> {
        self.require_state(ItemState::Generating, "complete generation of")?;
        self.template = template;
        self.template_version = 1;
        self.state = ItemState::Ready;
        self.last_error = None;
        Ok(self.template_version)
    }

    pub fn fail_generation(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require_state(ItemState::Generating, "fail generation of")?;
        self.state = ItemState::Failed;
        self.last_error = Some(message.into());
        Ok(())
    }

    /// Starts a preview render of the current template and returns the
    /// version the result must be tagged with. Also used for retries.
    pub fn begin_preview(&mut self) -> Result<u64, TransitionError> {
        if !matches!(
            self.state,
            ItemState::Ready | ItemState::PreviewReady | ItemState::PreviewFailed
        ) {
            return Err(self.not_allowed("preview"));
        }
        self.state = ItemState::PreviewLoading;
        self.preview_in_flight = Some(self.template_version);
        self.preview_error = None;
        Ok(self.template_version)
    }

    /// Applies a preview result unless the template moved on since launch.
    ///
    /// A current result that lands while the item is being edited is kept but
    /// leaves the edit sub-state alone.
    pub fn finish_preview(
        &mut self,
        template_version: u64,
        result: Result<PreviewArtifact, String>,
    ) -> PreviewOutcome {
        if template_version != self.template_version
            || self.preview_in_flight != Some(template_version)
        {
            return PreviewOutcome::Stale;
        }
        self.preview_in_flight = None;
        match result {
            Ok(artifact) => {
                self.preview = Some(artifact);
                self.preview_error = None;
                if self.state == ItemState::PreviewLoading {
                    self.state = ItemState::PreviewReady;
                }
            }
            Err(message) => {
                self.preview = None;
                self.preview_error = Some(message.clone());
                if self.state == ItemState::PreviewLoading {
                    self.state = ItemState::PreviewFailed;
                    self.last_error = Some(message);
                }
            }
        }
        PreviewOutcome::Applied
    }

    pub fn open_edit(&mut self) -> Result<(), TransitionError> {
        if self.state == ItemState::EditApplying {
            return Err(self.edit_in_progress());
        }
        if !self.state.can_open_edit() {
            return Err(self.not_allowed("edit"));
        }
        self.state = ItemState::Editing;
        Ok(())
    }

    pub fn cancel_edit(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ItemState::Editing | ItemState::EditFailed => {
                self.state = self.settled_state();
                Ok(())
            }
            ItemState::EditApplying => Err(self.edit_in_progress()),
            _ => Err(self.not_allowed("cancel editing")),
        }
    }

    /// Moves into `EditApplying`, opening the editor implicitly. Rejected while
    /// another edit on this item is still outstanding.
    pub fn begin_edit(&mut self) -> Result<String, TransitionError> {
        self.open_edit()?;
        self.state = ItemState::EditApplying;
        Ok(self.template.clone())
    }

    pub fn complete_edit(&mut self, template: String) -> Result<u64, TransitionError> {
        self.require_state(ItemState::EditApplying, "complete edit of")?;
        self.template = template;
        self.template_version += 1;
        self.preview = None;
        self.preview_in_flight = None;
        self.preview_error = None;
        self.last_error = None;
        self.state = ItemState::Ready;
        Ok(self.template_version)
    }

    pub fn fail_edit(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require_state(ItemState::EditApplying, "fail edit of")?;
        self.state = ItemState::EditFailed;
        self.last_error = Some(message.into());
        Ok(())
    }

    fn settled_state(&self) -> ItemState {
        if self.preview_in_flight.is_some() {
            ItemState::PreviewLoading
        } else if self.preview.is_some() {
            ItemState::PreviewReady
        } else if self.preview_error.is_some() {
            ItemState::PreviewFailed
        } else {
            ItemState::Ready
        }
    }

    fn require_state(
        &self,
        state: ItemState,
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.not_allowed(action))
        }
    }

    fn not_allowed(&self, action: &'static str) -> TransitionError {
        TransitionError::NotAllowed {
            item_id: self.id.clone(),
            state: self.state,
            action,
        }
    }

    fn edit_in_progress(&self) -> TransitionError {
        TransitionError::EditInProgress {
            item_id: self.id.clone(),
        }
    }
}

/// All items of the current batch, addressed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemBoard {
    batch_id: Option<String>,
    items: Vec<GenerationItem>,
}

impl ItemBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the previous batch and installs a fresh one.
    pub fn start_batch(&mut self, batch_id: impl Into<String>, items: Vec<GenerationItem>) {
        self.batch_id = Some(batch_id.into());
        self.items = items;
    }

    pub fn clear(&mut self) {
        self.batch_id = None;
        self.items.clear();
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    pub fn items(&self) -> &[GenerationItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, item_id: &str) -> Option<&GenerationItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn get_mut(&mut self, item_id: &str) -> Option<&mut GenerationItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    /// One-based lookup, as items are numbered in listings.
    pub fn nth(&self, position: usize) -> Option<&GenerationItem> {
        position.checked_sub(1).and_then(|idx| self.items.get(idx))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        crate::write_json_pretty(path, &serde_json::to_value(self)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
