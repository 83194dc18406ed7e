use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use banner_contracts::items::PreviewArtifact;
use banner_contracts::runs::receipts::ImageMetadata;
use banner_contracts::session::SessionContext;

use crate::backend::{EditRequest, RenderPurpose, StudioBackend};
use crate::error::{render_fallback, user_message, EDIT_FALLBACK};
use crate::request::render;

/// A finished unit of background work, delivered to the studio thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Preview {
        context: SessionContext,
        item_id: String,
        template_version: u64,
        result: Result<PreviewArtifact, String>,
    },
    Edit {
        context: SessionContext,
        item_id: String,
        ticket: u64,
        instruction: String,
        result: Result<String, String>,
    },
}

impl Completion {
    pub fn item_id(&self) -> &str {
        match self {
            Self::Preview { item_id, .. } | Self::Edit { item_id, .. } => item_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreviewJob {
    pub context: SessionContext,
    pub item_id: String,
    pub template_version: u64,
    pub template: String,
    pub platform: String,
    pub size: String,
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EditJob {
    pub context: SessionContext,
    pub item_id: String,
    pub ticket: u64,
    pub request: EditRequest,
}

/// Runs backend calls on named worker threads. Results come back over one
/// channel in whatever order they finish; the studio applies them.
pub struct Dispatcher {
    backend: Arc<dyn StudioBackend>,
    sender: mpsc::Sender<Completion>,
    receiver: mpsc::Receiver<Completion>,
    pending: usize,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn StudioBackend>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            backend,
            sender,
            receiver,
            pending: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn spawn_preview(&mut self, job: PreviewJob) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let sender = self.sender.clone();
        thread::Builder::new()
            .name(format!("preview-{}-v{}", job.item_id, job.template_version))
            .spawn(move || {
                let result = render_preview(backend.as_ref(), &job);
                let _ = sender.send(Completion::Preview {
                    context: job.context,
                    item_id: job.item_id,
                    template_version: job.template_version,
                    result,
                });
            })
            .context("preview thread spawn failed")?;
        self.pending += 1;
        Ok(())
    }

    pub fn spawn_edit(&mut self, job: EditJob) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let sender = self.sender.clone();
        thread::Builder::new()
            .name(format!("edit-{}-{}", job.item_id, job.ticket))
            .spawn(move || {
                let result = backend
                    .generate_with_context(&job.request)
                    .map_err(|err| user_message(&err, EDIT_FALLBACK));
                let _ = sender.send(Completion::Edit {
                    context: job.context,
                    item_id: job.item_id,
                    ticket: job.ticket,
                    instruction: job.request.prompt,
                    result,
                });
            })
            .context("edit thread spawn failed")?;
        self.pending += 1;
        Ok(())
    }

    pub fn try_next(&mut self) -> Option<Completion> {
        let completion = self.receiver.try_recv().ok()?;
        self.pending = self.pending.saturating_sub(1);
        Some(completion)
    }

    pub fn next_within(&mut self, timeout: Duration) -> Option<Completion> {
        if self.pending == 0 {
            return None;
        }
        let completion = self.receiver.recv_timeout(timeout).ok()?;
        self.pending = self.pending.saturating_sub(1);
        Some(completion)
    }
}

fn render_preview(
    backend: &dyn StudioBackend,
    job: &PreviewJob,
) -> Result<PreviewArtifact, String> {
    let fallback = render_fallback(&job.platform, &job.size);
    let image = backend
        .generate_image(&render(&job.template, RenderPurpose::Preview))
        .map_err(|err| user_message(&err, &fallback))?;
    let metadata = inspect_image(&image.bytes, image.mime_type.as_deref());
    let path = job.out_dir.join(format!(
        "{}-v{}.{}",
        job.item_id,
        job.template_version,
        extension_for(metadata.mime_type.as_deref())
    ));
    write_bytes(&path, &image.bytes).map_err(|err| user_message(&err, &fallback))?;
    Ok(PreviewArtifact {
        template_version: job.template_version,
        path,
        bytes: metadata.bytes,
        width: metadata.width,
        height: metadata.height,
        mime_type: metadata.mime_type,
    })
}

/// Natural size and type of rendered bytes. Undecodable images keep the
/// declared type and report no size.
pub fn inspect_image(bytes: &[u8], declared_mime: Option<&str>) -> ImageMetadata {
    let guessed = image::guess_format(bytes).ok();
    let decoded = image::load_from_memory(bytes).ok();
    ImageMetadata {
        width: decoded.as_ref().map(|img| img.width()),
        height: decoded.as_ref().map(|img| img.height()),
        bytes: bytes.len() as u64,
        mime_type: guessed
            .map(|format| format.to_mime_type().to_string())
            .or_else(|| declared_mime.map(str::to_string)),
    }
}

pub fn extension_for(mime_type: Option<&str>) -> &'static str {
    let lowered = mime_type.unwrap_or_default().to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        "jpg"
    } else if lowered.contains("webp") {
        "webp"
    } else {
        "png"
    }
}

pub(crate) fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
