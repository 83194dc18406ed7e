use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::Dimensions;
use crate::now_utc_iso;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bytes: u64,
    pub mime_type: Option<String>,
}

/// Sidecar written next to every downloaded artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReceipt {
    pub schema_version: u64,
    pub session_id: String,
    pub item_id: String,
    pub platform: String,
    pub size: String,
    pub dimensions: Dimensions,
    pub template_version: u64,
    pub template_sha256: String,
    pub prompt: String,
    pub image_path: PathBuf,
    pub image: ImageMetadata,
    pub backend: String,
    pub created_at: String,
}

impl ExportReceipt {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: &str,
        item_id: &str,
        platform: &str,
        size: &str,
        dimensions: Dimensions,
        template_version: u64,
        template_sha256: String,
        prompt: &str,
        image_path: &Path,
        image: ImageMetadata,
        backend: &str,
    ) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            session_id: session_id.to_string(),
            item_id: item_id.to_string(),
            platform: platform.to_string(),
            size: size.to_string(),
            dimensions,
            template_version,
            template_sha256,
            prompt: prompt.to_string(),
            image_path: image_path.to_path_buf(),
            image,
            backend: backend.to_string(),
            created_at: now_utc_iso(),
        }
    }
}

/// `creative-banner-1080x1080.png` → `creative-banner-1080x1080.receipt.json`.
pub fn receipt_path_for(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("artifact");
    image_path.with_file_name(format!("{stem}.receipt.json"))
}

pub fn write_receipt(path: &Path, receipt: &ExportReceipt) -> anyhow::Result<()> {
    crate::write_json_pretty(path, &serde_json::to_value(receipt)?)
}

pub fn read_receipt(path: &Path) -> Option<ExportReceipt> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    serde_json::from_value(parsed).ok()
}
