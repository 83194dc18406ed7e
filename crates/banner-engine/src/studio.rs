use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use banner_contracts::catalog::{SizeCatalog, SizeSelection, NO_SIZE_SELECTED};
use banner_contracts::conversation::ConversationEntry;
use banner_contracts::events::EventLog;
use banner_contracts::items::{
    GenerationItem, ItemBoard, ItemState, PreviewArtifact, PreviewOutcome,
};
use banner_contracts::runs::receipts::{
    receipt_path_for, write_receipt, ExportReceipt, ImageMetadata,
};
use banner_contracts::runs::revisions::{template_sha256, RevisionAction, RevisionManifest};
use banner_contracts::runs::summary::{write_summary, RunSummary};
use banner_contracts::session::{SessionContext, SessionId, SessionIdentity};
use serde_json::{json, Value};

use crate::backend::{ImageBytes, RenderPurpose, StudioBackend, TemplateDimensions, EXPORT_PROMPT};
use crate::conversation::{ConversationStore, HistorySync};
use crate::error::{
    error_chain_text, render_fallback, user_message, StudioError, EDIT_FALLBACK, GENERATE_FALLBACK,
    PREVIEW_FAILED,
};
use crate::previews::{
    extension_for, inspect_image, write_bytes, Completion, Dispatcher, EditJob, PreviewJob,
};
use crate::request::{render, RequestBuilder};
use crate::{map_object, now_utc_iso};

pub const EVENTS_FILE: &str = "events.jsonl";
pub const SESSION_FILE: &str = "session.json";
pub const ITEMS_FILE: &str = "items.json";
pub const REVISIONS_FILE: &str = "revisions.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const PREVIEWS_DIR: &str = "previews";
pub const EXPORTS_DIR: &str = "exports";

pub const EMPTY_BRIEF: &str = "Please enter a creative brief";
pub const EMPTY_INSTRUCTION: &str = "Please enter an edit instruction";
pub const GENERATED_RESPONSE: &str = "Templates generated successfully";
pub const UPDATED_RESPONSE: &str = "Template updated successfully";

/// Items produced for one brief, in selection order. Per-item failures are
/// carried on the items; the batch itself still succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch_id: String,
    pub items: Vec<GenerationItem>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.state() != ItemState::Failed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn is_partial(&self) -> bool {
        self.failed() > 0 && self.succeeded() > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTicket {
    pub item_id: String,
    pub ticket: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedArtifact {
    pub item_id: String,
    pub path: PathBuf,
    pub receipt_path: PathBuf,
    pub image: ImageMetadata,
}

/// Session-scoped orchestrator: batch generation, previews, edits, export.
///
/// All state lives on the thread that owns the studio. Backend work for
/// previews and edits runs on worker threads and comes back as
/// [`Completion`]s, which are applied by [`Studio::pump`] and the waiting
/// helpers. A completion is applied only if it still belongs to the current
/// session, batch and template version.
pub struct Studio {
    out_dir: PathBuf,
    backend: Arc<dyn StudioBackend>,
    identity: SessionIdentity,
    context: SessionContext,
    conversation: ConversationStore,
    events: EventLog,
    board: ItemBoard,
    revisions: RevisionManifest,
    dispatcher: Dispatcher,
    catalog: Option<SizeCatalog>,
    edit_tickets: HashMap<String, u64>,
    next_ticket: u64,
    batch_seq: u64,
    last_error: Option<String>,
    summary: RunSummary,
}

impl Studio {
    pub fn open(
        out_dir: impl Into<PathBuf>,
        backend: Arc<dyn StudioBackend>,
    ) -> Result<Self, StudioError> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir)
            .map_err(|err| StudioError::Storage(format!("{}: {err}", out_dir.display())))?;

        let mut identity = SessionIdentity::new(out_dir.join(SESSION_FILE));
        let session_id = identity.get_or_create().map_err(StudioError::storage)?;
        let events = EventLog::new(out_dir.join(EVENTS_FILE), session_id.as_str());
        let revisions = RevisionManifest::load(out_dir.join(REVISIONS_FILE), session_id.as_str());

        let studio = Self {
            conversation: ConversationStore::new(Arc::clone(&backend), session_id.clone()),
            dispatcher: Dispatcher::new(Arc::clone(&backend)),
            context: SessionContext::new(session_id.clone()),
            summary: RunSummary {
                session_id: session_id.to_string(),
                started_at: now_utc_iso(),
                ..RunSummary::default()
            },
            out_dir,
            backend,
            identity,
            events,
            board: ItemBoard::new(),
            revisions,
            catalog: None,
            edit_tickets: HashMap::new(),
            next_ticket: 0,
            batch_seq: 0,
            last_error: None,
        };
        studio.emit(
            "session_started",
            json!({
                "backend": studio.backend.name(),
                "out_dir": studio.out_dir.to_string_lossy(),
            }),
        )?;
        Ok(studio)
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.context.id
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.context
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn items(&self) -> &[GenerationItem] {
        self.board.items()
    }

    pub fn item(&self, item_id: &str) -> Option<&GenerationItem> {
        self.board.get(item_id)
    }

    /// One-based, as items are numbered in listings.
    pub fn item_at(&self, position: usize) -> Option<&GenerationItem> {
        self.board.nth(position)
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.board.batch_id()
    }

    pub fn history(&self) -> &[ConversationEntry] {
        self.conversation.entries()
    }

    pub fn revisions(&self) -> &RevisionManifest {
        &self.revisions
    }

    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    pub fn catalog(&mut self) -> Result<&SizeCatalog, StudioError> {
        if self.catalog.is_none() {
            let catalog = self
                .backend
                .platform_sizes()
                .map_err(|err| {
                    self.fail(StudioError::network("platform/sizes", &err, "Failed to fetch sizes"))
                })?;
            self.catalog = Some(catalog);
        }
        self.catalog
            .as_ref()
            .ok_or_else(|| StudioError::Storage("size catalog unavailable".to_string()))
    }

    pub fn default_template(&mut self) -> Result<String, StudioError> {
        self.backend
            .default_template()
            .map_err(|err| {
                self.fail(StudioError::network(
                    "template/default",
                    &err,
                    "Failed to load template. Please refresh the page.",
                ))
            })
    }

    pub fn template_dimensions(
        &mut self,
        template: &str,
    ) -> Result<TemplateDimensions, StudioError> {
        self.backend
            .template_dimensions(template)
            .map_err(|err| {
                self.fail(StudioError::network(
                    "template/dimensions",
                    &err,
                    "Failed to read template dimensions",
                ))
            })
    }

    /// Best-effort: a failed load leaves an empty history and is logged.
    pub fn load_history(&mut self) -> Result<HistorySync, StudioError> {
        let outcome = self.conversation.load();
        match &outcome {
            HistorySync::Loaded(count) => self.emit("history_loaded", json!({ "count": count }))?,
            HistorySync::Unavailable(message) => {
                self.emit("history_unavailable", json!({ "error": message }))?
            }
        }
        Ok(outcome)
    }

    /// Clears the service's memory of this session, then moves to a new one.
    pub fn clear_history(&mut self) -> Result<SessionId, StudioError> {
        let outcome = self.conversation.clear();
        let error = match &outcome {
            HistorySync::Unavailable(message) => Some(message.clone()),
            HistorySync::Loaded(_) => None,
        };
        self.emit(
            "history_cleared",
            json!({ "acknowledged": error.is_none(), "error": error }),
        )?;
        self.reset_session()
    }

    /// Mints a new session. Everything still in flight for the old one is
    /// dropped when it lands.
    pub fn reset_session(&mut self) -> Result<SessionId, StudioError> {
        let previous = self.context.id.clone();
        let session_id = self.identity.reset().map_err(StudioError::storage)?;
        self.context = self.context.succeeded_by(session_id.clone());
        self.conversation.rebind(session_id.clone());
        self.events
            .set_session(session_id.as_str())
            .map_err(StudioError::storage)?;
        self.board.clear();
        self.edit_tickets.clear();
        self.revisions =
            RevisionManifest::new(self.out_dir.join(REVISIONS_FILE), session_id.as_str());
        self.revisions.save().map_err(StudioError::storage)?;
        self.persist_items()?;
        self.summary.session_id = session_id.to_string();
        self.emit(
            "session_reset",
            json!({
                "previous_session_id": previous.as_str(),
                "epoch": self.context.epoch,
            }),
        )?;
        Ok(session_id)
    }

    /// Generates one template per selected size, one call at a time, all
    /// against the conversation as it stood when the batch started. Previews
    /// for the successful items are launched afterwards and not awaited.
    pub fn generate_batch(
        &mut self,
        brief: &str,
        selection: &SizeSelection,
    ) -> Result<BatchReport, StudioError> {
        let brief = brief.trim();
        if brief.is_empty() {
            return Err(self.fail(StudioError::validation(EMPTY_BRIEF)));
        }
        if selection.is_empty() {
            return Err(self.fail(StudioError::validation(NO_SIZE_SELECTED)));
        }
        let resolved = selection.resolve(self.catalog()?);
        let targets = match resolved {
            Ok(targets) => targets,
            Err(message) => return Err(self.fail(StudioError::validation(message))),
        };
        self.last_error = None;

        // The sequence keeps ids unique when two batches share a millisecond.
        self.batch_seq += 1;
        let stamp = chrono::Utc::now().timestamp_millis();
        let seq = self.batch_seq;
        let batch_id = format!("batch-{stamp}-{seq}");
        let items = targets
            .iter()
            .enumerate()
            .map(|(idx, target)| {
                GenerationItem::new(format!("template-{stamp}-{seq}-{idx}"), target.clone())
            })
            .collect::<Vec<GenerationItem>>();
        let item_ids = items.iter().map(|item| item.id().to_string()).collect::<Vec<String>>();
        self.board.start_batch(batch_id.clone(), items);
        self.edit_tickets.clear();
        self.summary.batches += 1;
        self.emit(
            "batch_started",
            json!({
                "batch_id": batch_id,
                "brief": brief,
                "platform": selection.platform(),
                "sizes": selection.names(),
            }),
        )?;
        for (item_id, target) in item_ids.iter().zip(&targets) {
            self.emit(
                "item_created",
                json!({
                    "item_id": item_id,
                    "platform": target.platform,
                    "size": target.name,
                    "width": target.width,
                    "height": target.height,
                }),
            )?;
        }

        let builder = RequestBuilder::new(self.context.id.clone(), self.conversation.turns());
        for (item_id, target) in item_ids.iter().zip(&targets) {
            let request = builder.generate(brief, target);
            match self.backend.generate_initial(&request) {
                Ok(generated) => {
                    let template = generated.template;
                    if let Some(item) = self.board.get_mut(item_id) {
                        item.complete_generation(template.clone())?;
                    }
                    self.conversation.append(brief, GENERATED_RESPONSE);
                    self.revisions
                        .record(item_id, 1, RevisionAction::Generate, brief, target, &template);
                    self.summary.items_generated += 1;
                    self.emit(
                        "item_generated",
                        json!({
                            "item_id": item_id,
                            "template_version": 1,
                            "template_sha256": template_sha256(&template),
                            "template_chars": template.chars().count(),
                        }),
                    )?;
                }
                Err(err) => {
                    let message = user_message(&err, GENERATE_FALLBACK);
                    if let Some(item) = self.board.get_mut(item_id) {
                        item.fail_generation(message.clone())?;
                    }
                    self.summary.items_failed += 1;
                    self.last_error = Some(message.clone());
                    self.emit(
                        "item_failed",
                        json!({
                            "item_id": item_id,
                            "error": message,
                            "detail": error_chain_text(&err, 512),
                        }),
                    )?;
                }
            }
        }
        self.revisions.save().map_err(StudioError::storage)?;

        for item_id in &item_ids {
            let ready = self
                .board
                .get(item_id)
                .map(|item| item.state() == ItemState::Ready)
                .unwrap_or(false);
            if ready {
                self.launch_preview(item_id, false)?;
            }
        }
        self.persist_items()?;

        let report = BatchReport {
            batch_id: batch_id.clone(),
            items: self.board.items().to_vec(),
        };
        self.emit(
            "batch_finished",
            json!({
                "batch_id": batch_id,
                "items": report.items.len(),
                "succeeded": report.succeeded(),
                "failed": report.failed(),
            }),
        )?;
        Ok(report)
    }

    /// Re-requests a preview for an item whose last one finished.
    pub fn retry_preview(&mut self, item_id: &str) -> Result<u64, StudioError> {
        self.launch_preview(item_id, true)
    }

    pub fn open_edit(&mut self, item_id: &str) -> Result<(), StudioError> {
        let item = self
            .board
            .get_mut(item_id)
            .ok_or_else(|| StudioError::UnknownItem(item_id.to_string()))?;
        item.open_edit()?;
        self.persist_items()
    }

    pub fn cancel_edit(&mut self, item_id: &str) -> Result<(), StudioError> {
        let item = self
            .board
            .get_mut(item_id)
            .ok_or_else(|| StudioError::UnknownItem(item_id.to_string()))?;
        item.cancel_edit()?;
        self.persist_items()
    }

    /// Starts an edit of the item's current template. Rejected while another
    /// edit of the same item is outstanding.
    pub fn submit_edit(
        &mut self,
        item_id: &str,
        instruction: &str,
    ) -> Result<EditTicket, StudioError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(self.fail(StudioError::validation(EMPTY_INSTRUCTION)));
        }
        let Some(item) = self.board.get_mut(item_id) else {
            return Err(self.fail(StudioError::UnknownItem(item_id.to_string())));
        };
        let template = match item.begin_edit() {
            Ok(template) => template,
            Err(err) => {
                let err = StudioError::from(err);
                self.emit(
                    "edit_rejected",
                    json!({ "item_id": item_id, "reason": err.to_string() }),
                )?;
                return Err(self.fail(err));
            }
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let request = RequestBuilder::new(self.context.id.clone(), self.conversation.turns())
            .edit(&template, instruction);
        let job = EditJob {
            context: self.context.clone(),
            item_id: item_id.to_string(),
            ticket,
            request,
        };
        if let Err(err) = self.dispatcher.spawn_edit(job) {
            let message = error_chain_text(&err, 512);
            if let Some(item) = self.board.get_mut(item_id) {
                item.fail_edit(message.clone())?;
            }
            self.persist_items()?;
            return Err(self.fail(StudioError::Storage(message)));
        }
        self.edit_tickets.insert(item_id.to_string(), ticket);
        self.persist_items()?;
        self.emit(
            "edit_started",
            json!({ "item_id": item_id, "ticket": ticket, "instruction": instruction }),
        )?;
        Ok(EditTicket {
            item_id: item_id.to_string(),
            ticket,
        })
    }

    /// Applies completions until the edit behind `ticket` resolves or
    /// `timeout` passes, then returns the item as it stands.
    pub fn wait_for_edit(
        &mut self,
        ticket: &EditTicket,
        timeout: Duration,
    ) -> Result<GenerationItem, StudioError> {
        let deadline = Instant::now() + timeout;
        while self.edit_tickets.get(&ticket.item_id) == Some(&ticket.ticket) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.dispatcher.next_within(remaining) {
                Some(completion) => {
                    self.apply_completion(completion)?;
                }
                None => break,
            }
        }
        self.board
            .get(&ticket.item_id)
            .cloned()
            .ok_or_else(|| StudioError::UnknownItem(ticket.item_id.clone()))
    }

    /// Submits an edit and waits for it. A backend failure is not an `Err`:
    /// the returned item is in `EditFailed` with its template untouched.
    pub fn apply_edit(
        &mut self,
        item_id: &str,
        instruction: &str,
        timeout: Duration,
    ) -> Result<GenerationItem, StudioError> {
        let ticket = self.submit_edit(item_id, instruction)?;
        self.wait_for_edit(&ticket, timeout)
    }

    /// Applies whatever background work has already finished.
    pub fn pump(&mut self) -> Result<usize, StudioError> {
        let mut applied = 0;
        while let Some(completion) = self.dispatcher.try_next() {
            if self.apply_completion(completion)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Applies completions until nothing is in flight or `timeout` passes.
    /// Returns how many were still outstanding at the end.
    pub fn wait_for_previews(&mut self, timeout: Duration) -> Result<usize, StudioError> {
        let deadline = Instant::now() + timeout;
        while self.dispatcher.pending() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.dispatcher.next_within(remaining) {
                Some(completion) => {
                    self.apply_completion(completion)?;
                }
                None => break,
            }
        }
        Ok(self.dispatcher.pending())
    }

    /// Returns `true` if the completion changed an item, `false` if it was
    /// dropped as stale.
    pub fn apply_completion(&mut self, completion: Completion) -> Result<bool, StudioError> {
        match completion {
            Completion::Preview {
                context,
                item_id,
                template_version,
                result,
            } => self.apply_preview(&context, &item_id, template_version, result),
            Completion::Edit {
                context,
                item_id,
                ticket,
                instruction,
                result,
            } => self.apply_edit_result(&context, &item_id, ticket, &instruction, result),
        }
    }

    /// Renders a template at full size, independent of any item or preview.
    pub fn export_template(&mut self, template: &str) -> Result<ImageBytes, StudioError> {
        if template.trim().is_empty() {
            return Err(self.fail(StudioError::validation("Template is empty")));
        }
        self.backend
            .generate_image(&render(template, RenderPurpose::Export))
            .map_err(|err| {
                self.fail(StudioError::network(
                    "generate-image",
                    &err,
                    "Failed to generate image. Please try again.",
                ))
            })
    }

    /// Renders the item's current template for download and writes it with a
    /// receipt. Works whatever the preview state is.
    pub fn export_artifact(&mut self, item_id: &str) -> Result<ExportedArtifact, StudioError> {
        let Some(item) = self.board.get(item_id).cloned() else {
            return Err(self.fail(StudioError::UnknownItem(item_id.to_string())));
        };
        if !item.can_export() {
            return Err(self.fail(StudioError::ExportUnavailable {
                item_id: item_id.to_string(),
            }));
        }
        let fallback = render_fallback(item.platform(), item.size());
        let image = self
            .backend
            .generate_image(&render(item.template(), RenderPurpose::Export))
            .map_err(|err| self.fail(StudioError::network("generate-image", &err, &fallback)))?;

        let metadata = inspect_image(&image.bytes, image.mime_type.as_deref());
        let file_name = format!(
            "creative-banner-{}-{}-{}.{}",
            file_token(item.platform()),
            file_token(item.size()),
            chrono::Utc::now().timestamp_millis(),
            extension_for(metadata.mime_type.as_deref()),
        );
        let path = self.out_dir.join(EXPORTS_DIR).join(file_name);
        write_bytes(&path, &image.bytes).map_err(|err| self.fail(StudioError::storage(err)))?;

        let receipt = ExportReceipt::new(
            self.context.id.as_str(),
            item.id(),
            item.platform(),
            item.size(),
            item.dimensions(),
            item.template_version(),
            template_sha256(item.template()),
            EXPORT_PROMPT,
            &path,
            metadata.clone(),
            self.backend.name(),
        );
        let receipt_path = receipt_path_for(&path);
        write_receipt(&receipt_path, &receipt).map_err(StudioError::storage)?;

        self.summary.exports += 1;
        self.emit(
            "artifact_exported",
            json!({
                "item_id": item.id(),
                "template_version": item.template_version(),
                "item_state": item.state().as_str(),
                "path": path.to_string_lossy(),
                "receipt_path": receipt_path.to_string_lossy(),
                "bytes": metadata.bytes,
                "width": metadata.width,
                "height": metadata.height,
                "mime_type": metadata.mime_type,
            }),
        )?;
        Ok(ExportedArtifact {
            item_id: item.id().to_string(),
            path,
            receipt_path,
            image: metadata,
        })
    }

    /// Writes `summary.json` and closes the event log for this run.
    pub fn finish(&mut self) -> Result<RunSummary, StudioError> {
        self.summary.finished_at = now_utc_iso();
        let extra = map_object(json!({
            "backend": self.backend.name(),
            "items_in_batch": self.board.len(),
            "revisions": self.revisions.revisions.len(),
            "in_flight_abandoned": self.dispatcher.pending(),
        }));
        write_summary(&self.out_dir.join(SUMMARY_FILE), &self.summary, Some(&extra))
            .map_err(StudioError::storage)?;
        self.emit("session_finished", serde_json::to_value(&self.summary).unwrap_or(Value::Null))?;
        Ok(self.summary.clone())
    }

    fn apply_preview(
        &mut self,
        context: &SessionContext,
        item_id: &str,
        template_version: u64,
        result: Result<PreviewArtifact, String>,
    ) -> Result<bool, StudioError> {
        let current_session = context.is_current(&self.context);
        let outcome = if current_session {
            self.board
                .get_mut(item_id)
                .map(|item| item.finish_preview(template_version, result.clone()))
        } else {
            None
        };

        if outcome != Some(PreviewOutcome::Applied) {
            if let Ok(artifact) = &result {
                let _ = std::fs::remove_file(&artifact.path);
            }
            let reason = if !current_session {
                "session_reset"
            } else if outcome.is_none() {
                "item_replaced"
            } else {
                "template_version"
            };
            self.summary.previews_dropped += 1;
            self.emit(
                "preview_stale_dropped",
                json!({
                    "item_id": item_id,
                    "template_version": template_version,
                    "current_version": self
                        .board
                        .get(item_id)
                        .map(GenerationItem::template_version),
                    "reason": reason,
                }),
            )?;
            return Ok(false);
        }

        match &result {
            Ok(artifact) => {
                self.summary.previews_ready += 1;
                self.emit(
                    "preview_ready",
                    json!({
                        "item_id": item_id,
                        "template_version": template_version,
                        "path": artifact.path.to_string_lossy(),
                        "bytes": artifact.bytes,
                        "width": artifact.width,
                        "height": artifact.height,
                    }),
                )?;
            }
            Err(message) => {
                self.summary.previews_failed += 1;
                self.last_error = Some(PREVIEW_FAILED.to_string());
                self.emit(
                    "preview_failed",
                    json!({
                        "item_id": item_id,
                        "template_version": template_version,
                        "error": message,
                    }),
                )?;
            }
        }
        self.persist_items()?;
        Ok(true)
    }

    fn apply_edit_result(
        &mut self,
        context: &SessionContext,
        item_id: &str,
        ticket: u64,
        instruction: &str,
        result: Result<String, String>,
    ) -> Result<bool, StudioError> {
        let expected = context.is_current(&self.context)
            && self.edit_tickets.get(item_id) == Some(&ticket);
        if !expected {
            self.emit(
                "edit_stale_dropped",
                json!({ "item_id": item_id, "ticket": ticket }),
            )?;
            return Ok(false);
        }
        self.edit_tickets.remove(item_id);
        let item = self
            .board
            .get_mut(item_id)
            .ok_or_else(|| StudioError::UnknownItem(item_id.to_string()))?;

        match result {
            Ok(template) => {
                let version = item.complete_edit(template.clone())?;
                let target = item.target().clone();
                self.conversation.append(instruction, UPDATED_RESPONSE);
                let revision = self.revisions.record(
                    item_id,
                    version,
                    RevisionAction::Edit,
                    instruction,
                    &target,
                    &template,
                );
                self.revisions.save().map_err(StudioError::storage)?;
                self.summary.edits_applied += 1;
                self.emit(
                    "edit_applied",
                    json!({
                        "item_id": item_id,
                        "ticket": ticket,
                        "template_version": version,
                        "revision_id": revision.revision_id,
                        "parent_revision_id": revision.parent_revision_id,
                    }),
                )?;
                self.launch_preview(item_id, false)?;
            }
            Err(message) => {
                item.fail_edit(message.clone())?;
                self.summary.edits_failed += 1;
                self.last_error = Some(format!("{EDIT_FALLBACK}: {message}"));
                self.emit(
                    "edit_failed",
                    json!({ "item_id": item_id, "ticket": ticket, "error": message }),
                )?;
            }
        }
        self.persist_items()?;
        Ok(true)
    }

    fn launch_preview(&mut self, item_id: &str, retry: bool) -> Result<u64, StudioError> {
        let item = self
            .board
            .get_mut(item_id)
            .ok_or_else(|| StudioError::UnknownItem(item_id.to_string()))?;
        let template_version = item.begin_preview()?;
        let job = PreviewJob {
            context: self.context.clone(),
            item_id: item_id.to_string(),
            template_version,
            template: item.template().to_string(),
            platform: item.platform().to_string(),
            size: item.size().to_string(),
            out_dir: self.out_dir.join(PREVIEWS_DIR),
        };

        if let Err(err) = self.dispatcher.spawn_preview(job) {
            let message = error_chain_text(&err, 512);
            if let Some(item) = self.board.get_mut(item_id) {
                item.finish_preview(template_version, Err(message.clone()));
            }
            self.summary.previews_failed += 1;
            self.emit(
                "preview_failed",
                json!({
                    "item_id": item_id,
                    "template_version": template_version,
                    "error": message,
                }),
            )?;
            return Ok(template_version);
        }
        self.emit(
            "preview_started",
            json!({
                "item_id": item_id,
                "template_version": template_version,
                "retry": retry,
            }),
        )?;
        Ok(template_version)
    }

    fn persist_items(&self) -> Result<(), StudioError> {
        self.board
            .save(&self.out_dir.join(ITEMS_FILE))
            .map_err(StudioError::storage)
    }

    fn emit(&self, event_type: &str, payload: Value) -> Result<(), StudioError> {
        self.events
            .emit(event_type, map_object(payload))
            .map(|_| ())
            .map_err(StudioError::storage)
    }

    fn fail(&mut self, err: StudioError) -> StudioError {
        self.last_error = Some(err.to_string());
        err
    }
}

fn file_token(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_whitespace() || matches!(ch, '/' | '\\') {
                '_'
            } else {
                ch
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Condvar, Mutex, MutexGuard};

    use anyhow::{anyhow, bail, Result};
    use banner_contracts::events::{event_types, read_events};

    use super::*;
    use crate::backend::{EditRequest, GenerateRequest, GeneratedTemplate, RenderRequest};
    use crate::dryrun::DryrunBackend;

    const WAIT: Duration = Duration::from_secs(10);

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks renders or edits until opened.
    struct Gate {
        open: Mutex<bool>,
        signal: Condvar,
    }

    impl Gate {
        fn new() -> Self {
            Self {
                open: Mutex::new(true),
                signal: Condvar::new(),
            }
        }

        fn close(&self) {
            *lock(&self.open) = false;
        }

        fn open(&self) {
            *lock(&self.open) = true;
            self.signal.notify_all();
        }

        fn pass(&self) {
            let mut open = lock(&self.open);
            while !*open {
                open = self
                    .signal
                    .wait(open)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        }
    }

    /// Dry-run backend with a call log, injectable failures and gates.
    struct Scripted {
        inner: DryrunBackend,
        calls: Mutex<Vec<String>>,
        generate_calls: AtomicUsize,
        fail_generate_at: Option<usize>,
        fail_previews: AtomicBool,
        fail_edits: AtomicBool,
        history_sent: Mutex<Vec<usize>>,
        preview_gate: Gate,
        edit_gate: Gate,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                inner: DryrunBackend::new(),
                calls: Mutex::new(Vec::new()),
                generate_calls: AtomicUsize::new(0),
                fail_generate_at: None,
                fail_previews: AtomicBool::new(false),
                fail_edits: AtomicBool::new(false),
                history_sent: Mutex::new(Vec::new()),
                preview_gate: Gate::new(),
                edit_gate: Gate::new(),
            }
        }

        fn failing_generate_at(position: usize) -> Self {
            Self {
                fail_generate_at: Some(position),
                ..Self::new()
            }
        }

        fn log(&self, call: &str) {
            lock(&self.calls).push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            lock(&self.calls).clone()
        }
    }

    impl StudioBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_template(&self) -> Result<String> {
            self.log("template/default");
            self.inner.default_template()
        }

        fn template_dimensions(&self, template: &str) -> Result<TemplateDimensions> {
            self.log("template/dimensions");
            self.inner.template_dimensions(template)
        }

        fn platform_sizes(&self) -> Result<SizeCatalog> {
            self.log("platform/sizes");
            self.inner.platform_sizes()
        }

        fn generate_initial(&self, request: &GenerateRequest) -> Result<GeneratedTemplate> {
            self.log(&format!("generate-initial {}", request.target.name));
            lock(&self.history_sent).push(request.chat_history.len());
            let position = self.generate_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_generate_at == Some(position) {
                return Err(anyhow::Error::new(crate::backend::BackendResponseError {
                    operation: "generate-initial".to_string(),
                    status: 502,
                    detail: Some(format!("upstream failed for {}", request.target.name)),
                }));
            }
            self.inner.generate_initial(request)
        }

        fn generate_with_context(&self, request: &EditRequest) -> Result<String> {
            self.log("generate-with-context");
            self.edit_gate.pass();
            if self.fail_edits.load(Ordering::SeqCst) {
                bail!("edit service unavailable");
            }
            self.inner.generate_with_context(request)
        }

        fn generate_image(&self, request: &RenderRequest) -> Result<ImageBytes> {
            self.log(&format!("generate-image {:?}", request.purpose));
            if request.purpose == RenderPurpose::Preview {
                self.preview_gate.pass();
                if self.fail_previews.load(Ordering::SeqCst) {
                    bail!("renderer crashed");
                }
            }
            self.inner.generate_image(request)
        }

        fn chat_history(&self, session_id: &SessionId) -> Result<Vec<ConversationEntry>> {
            self.log("chat/history");
            self.inner.chat_history(session_id)
        }

        fn clear_chat_history(&self, session_id: &SessionId) -> Result<()> {
            self.log("chat/clear");
            self.inner.clear_chat_history(session_id)
        }
    }

    fn selection(names: &[&str]) -> SizeSelection {
        SizeSelection::new("Facebook", names.iter().map(|name| name.to_string()))
    }

    fn open(dir: &Path, backend: &Arc<Scripted>) -> Result<Studio> {
        let backend: Arc<dyn StudioBackend> = backend.clone();
        Ok(Studio::open(dir, backend)?)
    }

    fn first_item_id(studio: &Studio) -> Result<String> {
        studio
            .item_at(1)
            .map(|item| item.id().to_string())
            .ok_or_else(|| anyhow!("batch has no items"))
    }

    #[test]
    fn batch_has_one_item_per_size_in_selection_order() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;

        let report =
            studio.generate_batch("Autumn sale", &selection(&["Story", "Square", "Landscape"]))?;
        let sizes: Vec<&str> = report.items.iter().map(GenerationItem::size).collect();
        assert_eq!(sizes, vec!["Story", "Square", "Landscape"]);
        assert_eq!(report.succeeded(), 3);
        assert!(report
            .items
            .iter()
            .all(|item| item.state() == ItemState::PreviewLoading));

        let generate_calls: Vec<String> = backend
            .calls()
            .into_iter()
            .filter(|call| call.starts_with("generate-initial"))
            .collect();
        assert_eq!(
            generate_calls,
            vec![
                "generate-initial Story",
                "generate-initial Square",
                "generate-initial Landscape"
            ]
        );

        assert_eq!(studio.wait_for_previews(WAIT)?, 0);
        assert!(studio
            .items()
            .iter()
            .all(|item| item.state() == ItemState::PreviewReady));
        assert_eq!(studio.history().len(), 3);
        assert!(studio
            .history()
            .iter()
            .all(|entry| entry.ai_response == GENERATED_RESPONSE));
        Ok(())
    }

    #[test]
    fn invalid_requests_make_no_backend_calls() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;

        let empty_brief = studio.generate_batch("   ", &selection(&["Square"]));
        assert!(matches!(empty_brief, Err(StudioError::Validation(ref m)) if m == EMPTY_BRIEF));
        let no_sizes = studio.generate_batch("Autumn sale", &selection(&[]));
        assert!(matches!(no_sizes, Err(StudioError::Validation(ref m)) if m == NO_SIZE_SELECTED));

        assert!(backend.calls().is_empty());
        assert_eq!(studio.last_error(), Some(NO_SIZE_SELECTED));
        studio.dismiss_error();
        assert_eq!(studio.last_error(), None);
        Ok(())
    }

    #[test]
    fn unknown_size_is_a_validation_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;

        let result = studio.generate_batch("Autumn sale", &selection(&["Billboard"]));
        assert!(matches!(result, Err(ref err) if err.is_validation()));
        assert!(!backend
            .calls()
            .iter()
            .any(|call| call.starts_with("generate-initial")));
        Ok(())
    }

    #[test]
    fn failed_target_does_not_stop_the_batch() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::failing_generate_at(2));
        let mut studio = open(temp.path(), &backend)?;

        let report =
            studio.generate_batch("Autumn sale", &selection(&["Square", "Landscape", "Story"]))?;
        assert_eq!(report.items.len(), 3);
        assert!(report.is_partial());
        assert_eq!(report.items[1].state(), ItemState::Failed);
        assert_eq!(report.items[1].last_error(), Some("upstream failed for Landscape"));
        assert_ne!(report.items[0].state(), ItemState::Failed);
        assert_ne!(report.items[2].state(), ItemState::Failed);
        assert_eq!(studio.last_error(), Some("upstream failed for Landscape"));

        studio.wait_for_previews(WAIT)?;
        assert_eq!(studio.items()[0].state(), ItemState::PreviewReady);
        assert_eq!(studio.items()[1].state(), ItemState::Failed);
        assert_eq!(studio.items()[2].state(), ItemState::PreviewReady);
        assert_eq!(studio.history().len(), 2);

        let summary = studio.finish()?;
        assert_eq!(summary.items_generated, 2);
        assert_eq!(summary.items_failed, 1);
        assert!(temp.path().join(SUMMARY_FILE).exists());
        Ok(())
    }

    #[test]
    fn batch_context_is_the_snapshot_at_batch_start() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;

        studio.generate_batch("First brief", &selection(&["Square"]))?;
        studio.generate_batch("Second brief", &selection(&["Square", "Story"]))?;
        studio.wait_for_previews(WAIT)?;

        assert_eq!(*lock(&backend.history_sent), vec![0, 1, 1]);
        assert_eq!(studio.history().len(), 3);
        Ok(())
    }

    #[test]
    fn session_survives_reopen_until_reset() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let first = open(temp.path(), &backend)?.session_id().clone();
        let mut studio = open(temp.path(), &backend)?;
        assert_eq!(studio.session_id(), &first);

        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        studio.wait_for_previews(WAIT)?;
        assert_eq!(studio.load_history()?, HistorySync::Loaded(1));

        let fresh = studio.clear_history()?;
        assert_ne!(fresh, first);
        assert!(studio.items().is_empty());
        assert!(studio.history().is_empty());
        assert_eq!(studio.load_history()?, HistorySync::Loaded(0));
        assert_eq!(studio.session_context().epoch, 1);
        assert!(backend.calls().contains(&"chat/clear".to_string()));

        let types = event_types(&temp.path().join(EVENTS_FILE));
        assert!(types.contains(&"history_cleared".to_string()));
        assert!(types.contains(&"session_reset".to_string()));
        Ok(())
    }

    #[test]
    fn late_preview_for_replaced_template_is_dropped() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;

        backend.preview_gate.close();
        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        let item_id = first_item_id(&studio)?;
        assert_eq!(
            studio.item(&item_id).map(GenerationItem::state),
            Some(ItemState::PreviewLoading)
        );

        let edited = studio.apply_edit(&item_id, "make the headline larger", WAIT)?;
        assert_eq!(edited.template_version(), 2);
        assert_eq!(edited.state(), ItemState::PreviewLoading);

        backend.preview_gate.open();
        assert_eq!(studio.wait_for_previews(WAIT)?, 0);

        let item = studio
            .item(&item_id)
            .ok_or_else(|| anyhow!("item vanished"))?;
        assert_eq!(item.state(), ItemState::PreviewReady);
        assert_eq!(item.preview().map(|p| p.template_version), Some(2));
        assert!(!temp
            .path()
            .join(PREVIEWS_DIR)
            .join(format!("{item_id}-v1.png"))
            .exists());

        let types = event_types(&temp.path().join(EVENTS_FILE));
        assert!(types.contains(&"preview_stale_dropped".to_string()));
        assert_eq!(studio.finish()?.previews_dropped, 1);
        Ok(())
    }

    #[test]
    fn back_to_back_batches_never_share_item_ids() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;

        backend.preview_gate.close();
        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        let first_id = first_item_id(&studio)?;
        studio.generate_batch("Winter sale", &selection(&["Square"]))?;
        let second_id = first_item_id(&studio)?;
        assert_ne!(first_id, second_id);
        assert!(studio.item(&first_id).is_none());

        backend.preview_gate.open();
        assert_eq!(studio.wait_for_previews(WAIT)?, 0);

        let item = studio
            .item(&second_id)
            .ok_or_else(|| anyhow!("second batch item vanished"))?;
        assert_eq!(item.state(), ItemState::PreviewReady);
        let dropped: Vec<Value> = read_events(&temp.path().join(EVENTS_FILE))
            .into_iter()
            .filter(|row| row.get("type").and_then(Value::as_str) == Some("preview_stale_dropped"))
            .collect();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].get("item_id").and_then(Value::as_str), Some(first_id.as_str()));
        assert_eq!(dropped[0].get("reason").and_then(Value::as_str), Some("item_replaced"));
        assert_eq!(studio.finish()?.batches, 2);
        Ok(())
    }

    #[test]
    fn second_edit_is_rejected_while_first_is_applying() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;
        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        studio.wait_for_previews(WAIT)?;
        let item_id = first_item_id(&studio)?;

        backend.edit_gate.close();
        let ticket = studio.submit_edit(&item_id, "warmer colours")?;
        let second = studio.submit_edit(&item_id, "cooler colours");
        assert!(matches!(second, Err(StudioError::EditInProgress { .. })));
        assert_eq!(
            studio.item(&item_id).map(GenerationItem::state),
            Some(ItemState::EditApplying)
        );

        backend.edit_gate.open();
        let item = studio.wait_for_edit(&ticket, WAIT)?;
        assert_eq!(item.template_version(), 2);
        assert!(item.template().contains("revision 1: warmer colours"));
        assert!(!item.template().contains("cooler colours"));

        let edit_calls = backend
            .calls()
            .iter()
            .filter(|call| call.as_str() == "generate-with-context")
            .count();
        assert_eq!(edit_calls, 1);
        assert!(studio.submit_edit(&item_id, "cooler colours").is_ok());
        studio.wait_for_previews(WAIT)?;
        Ok(())
    }

    #[test]
    fn failed_edit_keeps_the_template() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;
        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        studio.wait_for_previews(WAIT)?;
        let item_id = first_item_id(&studio)?;
        let before = studio
            .item(&item_id)
            .map(|item| item.template().to_string())
            .unwrap_or_default();

        backend.fail_edits.store(true, Ordering::SeqCst);
        let item = studio.apply_edit(&item_id, "make it blue", WAIT)?;
        assert_eq!(item.state(), ItemState::EditFailed);
        assert_eq!(item.template(), before);
        assert_eq!(item.template_version(), 1);
        assert_eq!(
            studio.last_error(),
            Some("Failed to edit template: edit service unavailable")
        );
        assert_eq!(studio.history().len(), 1);

        studio.cancel_edit(&item_id)?;
        assert_eq!(
            studio.item(&item_id).map(GenerationItem::state),
            Some(ItemState::PreviewReady)
        );
        Ok(())
    }

    #[test]
    fn blank_instruction_is_rejected_without_a_call() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;
        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        let item_id = first_item_id(&studio)?;

        let result = studio.submit_edit(&item_id, "  ");
        assert!(matches!(result, Err(StudioError::Validation(ref m)) if m == EMPTY_INSTRUCTION));
        assert!(!backend.calls().contains(&"generate-with-context".to_string()));
        assert!(matches!(
            studio.submit_edit("template-0-9", "bigger"),
            Err(StudioError::UnknownItem(_))
        ));
        studio.wait_for_previews(WAIT)?;
        Ok(())
    }

    #[test]
    fn export_works_when_preview_failed() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        backend.fail_previews.store(true, Ordering::SeqCst);
        let mut studio = open(temp.path(), &backend)?;
        studio.generate_batch("Autumn sale", &selection(&["Landscape"]))?;
        studio.wait_for_previews(WAIT)?;
        let item_id = first_item_id(&studio)?;
        assert_eq!(
            studio.item(&item_id).map(GenerationItem::state),
            Some(ItemState::PreviewFailed)
        );
        assert_eq!(studio.last_error(), Some(PREVIEW_FAILED));

        let exported = studio.export_artifact(&item_id)?;
        assert!(exported.path.exists());
        assert_eq!(
            (exported.image.width, exported.image.height),
            (Some(1200), Some(628))
        );
        let name = exported
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        assert!(name.starts_with("creative-banner-Facebook-Landscape-"));
        assert!(name.ends_with(".png"));

        let receipt = banner_contracts::runs::receipts::read_receipt(&exported.receipt_path)
            .ok_or_else(|| anyhow!("receipt missing"))?;
        assert_eq!(receipt.item_id, item_id);
        assert_eq!(receipt.prompt, EXPORT_PROMPT);

        backend.fail_previews.store(false, Ordering::SeqCst);
        studio.retry_preview(&item_id)?;
        studio.wait_for_previews(WAIT)?;
        assert_eq!(
            studio.item(&item_id).map(GenerationItem::state),
            Some(ItemState::PreviewReady)
        );
        Ok(())
    }

    #[test]
    fn failed_items_cannot_be_exported() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::failing_generate_at(1));
        let mut studio = open(temp.path(), &backend)?;
        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        let item_id = first_item_id(&studio)?;

        assert!(matches!(
            studio.export_artifact(&item_id),
            Err(StudioError::ExportUnavailable { .. })
        ));
        assert!(matches!(
            studio.export_template(""),
            Err(StudioError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn previews_from_a_reset_session_are_discarded() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;

        backend.preview_gate.close();
        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        studio.reset_session()?;
        backend.preview_gate.open();
        studio.wait_for_previews(WAIT)?;

        assert!(studio.items().is_empty());
        let summary = studio.finish()?;
        assert_eq!(summary.previews_dropped, 1);
        assert_eq!(summary.previews_ready, 0);
        Ok(())
    }

    #[test]
    fn revisions_chain_generation_and_edits() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = Arc::new(Scripted::new());
        let mut studio = open(temp.path(), &backend)?;
        studio.generate_batch("Autumn sale", &selection(&["Square"]))?;
        let item_id = first_item_id(&studio)?;
        studio.apply_edit(&item_id, "add a button", WAIT)?;
        studio.wait_for_previews(WAIT)?;

        let loaded = RevisionManifest::load(temp.path().join(REVISIONS_FILE), "ignored");
        let history = loaded.history_for(&item_id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action, RevisionAction::Edit);
        assert_eq!(history[1].parent_revision_id.as_deref(), Some("r1"));
        assert!(history[1]
            .template_diff
            .as_ref()
            .map(|diff| diff.iter().any(|line| line.contains("revision 1: add a button")))
            .unwrap_or(false));
        Ok(())
    }
}
