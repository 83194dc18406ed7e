use anyhow::{bail, Context, Result};
use banner_contracts::catalog::SizeCatalog;
use banner_contracts::conversation::ConversationEntry;
use banner_contracts::session::SessionId;
use reqwest::blocking::multipart::Form as MultipartForm;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::backend::{
    BackendResponseError, EditRequest, GenerateRequest, GeneratedTemplate, ImageBytes,
    RenderRequest, StudioBackend, TemplateDimensions,
};
use crate::config::BackendConfig;
use crate::error::truncate_text;

const GENERATE_INITIAL_PATH: &str = "chat/generate-content/generate-initial/";
const GENERATE_WITH_CONTEXT_PATH: &str = "chat/generate-with-context/";
const GENERATE_IMAGE_PATH: &str = "chat/generate-image/";

/// The content-generation service over HTTP. Form posts are multipart, as
/// the service expects.
pub struct HttpBackend {
    config: BackendConfig,
    http: HttpClient,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn get_json(&self, operation: &str, path: &str) -> Result<Value> {
        let url = self.config.endpoint(path);
        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("{operation} request failed ({url})"))?;
        response_json_or_error(operation, response)
    }

    fn post_form(
        &self,
        operation: &str,
        path: &str,
        fields: Vec<(&'static str, String)>,
    ) -> Result<HttpResponse> {
        let url = self.config.endpoint(path);
        let mut form = MultipartForm::new();
        for (key, value) in fields {
            form = form.text(key, value);
        }
        self.http
            .post(&url)
            .multipart(form)
            .send()
            .with_context(|| format!("{operation} request failed ({url})"))
    }
}

impl StudioBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn default_template(&self) -> Result<String> {
        let payload = self.get_json("template/default", "template/default")?;
        template_field("template/default", &payload)
    }

    fn template_dimensions(&self, template: &str) -> Result<TemplateDimensions> {
        let url = self.config.endpoint("template/dimensions");
        let response = self
            .http
            .get(&url)
            .query(&[("template", template)])
            .send()
            .with_context(|| format!("template/dimensions request failed ({url})"))?;
        let payload = response_json_or_error("template/dimensions", response)?;
        serde_json::from_value(payload)
            .context("template/dimensions returned an unexpected payload")
    }

    fn platform_sizes(&self) -> Result<SizeCatalog> {
        let payload = self.get_json("platform/sizes", "platform/sizes")?;
        SizeCatalog::from_value(&payload).context("platform/sizes returned an unexpected payload")
    }

    fn generate_initial(&self, request: &GenerateRequest) -> Result<GeneratedTemplate> {
        let response = self.post_form(
            "generate-initial",
            GENERATE_INITIAL_PATH,
            request.form_fields(),
        )?;
        let payload = response_json_or_error("generate-initial", response)?;
        let template = template_field("generate-initial", &payload)?;
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Ok(GeneratedTemplate {
            platform: text("platform"),
            size: text("size"),
            dimensions: payload
                .get("dimensions")
                .and_then(|value| serde_json::from_value(value.clone()).ok()),
            template,
        })
    }

    fn generate_with_context(&self, request: &EditRequest) -> Result<String> {
        let response = self.post_form(
            "generate-with-context",
            GENERATE_WITH_CONTEXT_PATH,
            request.form_fields(),
        )?;
        let payload = response_json_or_error("generate-with-context", response)?;
        template_field("generate-with-context", &payload)
    }

    fn generate_image(&self, request: &RenderRequest) -> Result<ImageBytes> {
        let response =
            self.post_form("generate-image", GENERATE_IMAGE_PATH, request.form_fields())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(response_error("generate-image", status.as_u16(), &body).into());
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .context("failed reading generate-image bytes")?
            .to_vec();
        if bytes.is_empty() {
            bail!("generate-image returned an empty body");
        }
        Ok(ImageBytes { bytes, mime_type })
    }

    fn chat_history(&self, session_id: &SessionId) -> Result<Vec<ConversationEntry>> {
        let payload = self.get_json("chat/history", &format!("chat/history/{session_id}"))?;
        let rows = payload
            .get("history")
            .unwrap_or(&payload)
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter_map(|row| serde_json::from_value::<ConversationEntry>(row).ok())
            .collect())
    }

    fn clear_chat_history(&self, session_id: &SessionId) -> Result<()> {
        let url = self.config.endpoint(&format!("chat/clear/{session_id}"));
        let response = self
            .http
            .delete(&url)
            .send()
            .with_context(|| format!("chat/clear request failed ({url})"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(response_error("chat/clear", status.as_u16(), &body).into());
        }
        Ok(())
    }
}

fn response_json_or_error(operation: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{operation} response body read failed"))?;
    if !status.is_success() {
        return Err(response_error(operation, status.as_u16(), &body).into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{operation} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn response_error(operation: &str, status: u16, body: &str) -> BackendResponseError {
    BackendResponseError {
        operation: operation.to_string(),
        status,
        detail: backend_detail(body),
    }
}

/// `detail` from an error body: a plain string, or the `msg` of each entry
/// of a validation error list.
fn backend_detail(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let detail = parsed.get("detail")?;
    let text = match detail {
        Value::String(text) => text.trim().to_string(),
        Value::Array(rows) => rows
            .iter()
            .filter_map(|row| row.get("msg").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("; "),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(truncate_text(&text, 512))
    }
}

fn template_field(operation: &str, payload: &Value) -> Result<String> {
    payload
        .get("template")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .with_context(|| format!("{operation} response carried no template"))
}
