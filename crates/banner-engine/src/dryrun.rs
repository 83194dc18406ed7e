use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use banner_contracts::catalog::{Dimensions, SizeCatalog};
use banner_contracts::conversation::ConversationEntry;
use banner_contracts::session::SessionId;
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::backend::{
    EditRequest, GenerateRequest, GeneratedTemplate, ImageBytes, RenderPurpose, RenderRequest,
    StudioBackend, TemplateDimensions,
};
use crate::escape_html;

const PREVIEW_MAX_SIDE: u32 = 480;
const REVISION_MARKER: &str = "<!-- revision ";

/// Offline backend with deterministic output. History is recorded as a side
/// effect of generate and edit calls, like the real service does.
#[derive(Debug, Default)]
pub struct DryrunBackend {
    history: Mutex<HashMap<SessionId, Vec<ConversationEntry>>>,
}

impl DryrunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, session_id: &SessionId, user_message: &str, ai_response: &str) -> Result<()> {
        let mut history = self
            .history
            .lock()
            .map_err(|_| anyhow!("dryrun history lock poisoned"))?;
        let rows = history.entry(session_id.clone()).or_default();
        rows.push(ConversationEntry {
            id: (rows.len() + 1).to_string(),
            user_message: user_message.to_string(),
            ai_response: ai_response.to_string(),
            created_at: crate::now_utc_iso(),
        });
        Ok(())
    }
}

impl StudioBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn default_template(&self) -> Result<String> {
        Ok(render_template(
            "Your message here",
            "Default",
            "Landscape",
            Dimensions {
                width: 1200,
                height: 628,
            },
        ))
    }

    fn template_dimensions(&self, template: &str) -> Result<TemplateDimensions> {
        let dims = parse_dimensions(template)
            .context("template carries no data-width/data-height attributes")?;
        Ok(TemplateDimensions {
            width: dims.width,
            height: dims.height,
            size_class: size_class(dims).to_string(),
        })
    }

    fn platform_sizes(&self) -> Result<SizeCatalog> {
        Ok(SizeCatalog::builtin())
    }

    fn generate_initial(&self, request: &GenerateRequest) -> Result<GeneratedTemplate> {
        if request.prompt.trim().is_empty() {
            bail!("prompt is required");
        }
        let dims = request.target.dimensions();
        let template = render_template(
            &request.prompt,
            &request.target.platform,
            &request.target.name,
            dims,
        );
        self.record(
            &request.session_id,
            &request.prompt,
            "Templates generated successfully",
        )?;
        Ok(GeneratedTemplate {
            template,
            platform: Some(request.target.platform.clone()),
            size: Some(request.target.name.clone()),
            dimensions: Some(dims),
        })
    }

    fn generate_with_context(&self, request: &EditRequest) -> Result<String> {
        if request.template.trim().is_empty() {
            bail!("template is required");
        }
        let revision = request.template.matches(REVISION_MARKER).count() + 1;
        let note = format!(
            "{REVISION_MARKER}{revision}: {} -->\n",
            escape_html(&request.prompt).replace("--", "- -")
        );
        let updated = match request.template.rfind("</body>") {
            Some(at) => {
                let mut updated = request.template.clone();
                updated.insert_str(at, &note);
                updated
            }
            None => format!("{}\n{note}", request.template),
        };
        self.record(
            &request.session_id,
            &request.prompt,
            "Template updated successfully",
        )?;
        Ok(updated)
    }

    fn generate_image(&self, request: &RenderRequest) -> Result<ImageBytes> {
        let dims = parse_dimensions(&request.template).unwrap_or(Dimensions {
            width: 1080,
            height: 1080,
        });
        let (width, height) = match request.purpose {
            RenderPurpose::Preview => fit_within(dims, PREVIEW_MAX_SIDE),
            RenderPurpose::Export => (dims.width, dims.height),
        };
        let (r, g, b) = color_from_template(&request.template);
        let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode dryrun png")?;
        Ok(ImageBytes {
            bytes,
            mime_type: Some("image/png".to_string()),
        })
    }

    fn chat_history(&self, session_id: &SessionId) -> Result<Vec<ConversationEntry>> {
        let history = self
            .history
            .lock()
            .map_err(|_| anyhow!("dryrun history lock poisoned"))?;
        Ok(history.get(session_id).cloned().unwrap_or_default())
    }

    fn clear_chat_history(&self, session_id: &SessionId) -> Result<()> {
        let mut history = self
            .history
            .lock()
            .map_err(|_| anyhow!("dryrun history lock poisoned"))?;
        history.remove(session_id);
        Ok(())
    }
}

fn render_template(brief: &str, platform: &str, size: &str, dims: Dimensions) -> String {
    let brief = escape_html(brief.trim());
    let width = dims.width;
    let height = dims.height;
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{brief}</title></head>\n\
<body data-width=\"{width}\" data-height=\"{height}\">\n\
<div class=\"banner\" style=\"width:{width}px;height:{height}px\">\n\
<h1>{brief}</h1>\n<p>{} {}</p>\n</div>\n</body>\n</html>\n",
        escape_html(platform),
        escape_html(size),
    )
}

fn parse_dimensions(template: &str) -> Option<Dimensions> {
    let attr = |name: &str| -> Option<u32> {
        let needle = format!("{name}=\"");
        let start = template.find(&needle)? + needle.len();
        let end = template[start..].find('"')? + start;
        template[start..end].trim().parse::<u32>().ok()
    };
    let width = attr("data-width")?;
    let height = attr("data-height")?;
    if width == 0 || height == 0 {
        return None;
    }
    Some(Dimensions { width, height })
}

fn size_class(dims: Dimensions) -> &'static str {
    let longest = dims.width.max(dims.height);
    if longest <= 400 {
        "small"
    } else if longest <= 1200 {
        "medium"
    } else {
        "large"
    }
}

fn fit_within(dims: Dimensions, max_side: u32) -> (u32, u32) {
    let longest = dims.width.max(dims.height);
    if longest <= max_side {
        return (dims.width, dims.height);
    }
    let scale = |value: u32| {
        ((u64::from(value) * u64::from(max_side)) / u64::from(longest)).max(1) as u32
    };
    (scale(dims.width), scale(dims.height))
}

fn color_from_template(template: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(template.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
