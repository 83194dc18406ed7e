use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use banner_contracts::items::{GenerationItem, ItemBoard, PreviewArtifact};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::escape_html;
use crate::studio::{ITEMS_FILE, PREVIEWS_DIR};

/// Writes a self-contained HTML page for the last batch of a run directory.
/// Previews are inlined as data URLs so the page survives being moved.
/// Returns the number of cards written.
pub fn write_gallery(run_dir: &Path, out_path: &Path) -> Result<usize> {
    let items_path = run_dir.join(ITEMS_FILE);
    let board = ItemBoard::load(&items_path)
        .with_context(|| format!("failed reading {}", items_path.display()))?;

    let mut cards = String::new();
    for item in board.items() {
        cards.push_str(&card(run_dir, item));
    }
    let title = board.batch_id().unwrap_or("banner run");
    let html_doc = format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset='utf-8'>\n  <title>{title}</title>\n  <style>\n    body {{ font-family: Arial, sans-serif; background: #f6f6f6; margin: 0; padding: 20px; }}\n    .grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(280px, 1fr)); gap: 16px; }}\n    .card {{ background: white; border-radius: 10px; overflow: hidden; box-shadow: 0 2px 8px rgba(0,0,0,0.08); }}\n    .thumb {{ width: 100%; height: 220px; background: #eee; display: flex; align-items: center; justify-content: center; }}\n    .thumb img {{ max-width: 100%; max-height: 100%; }}\n    .meta {{ padding: 10px; font-size: 13px; }}\n    .size {{ font-weight: bold; color: #444; }}\n    .error {{ color: #b00020; }}\n    pre {{ max-height: 200px; overflow: auto; background: #fafafa; font-size: 11px; }}\n  </style>\n</head>\n<body>\n  <h1>{title}</h1>\n  <div class='grid'>\n    {cards}\n  </div>\n</body>\n</html>\n",
        title = escape_html(title),
    );

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(out_path, html_doc)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    Ok(board.len())
}

fn card(run_dir: &Path, item: &GenerationItem) -> String {
    let thumb = match item.preview().and_then(|preview| data_url(run_dir, preview)) {
        Some(src) => format!("<img src='{src}' alt='preview'>"),
        None => "<span>no preview</span>".to_string(),
    };
    let error = item
        .last_error()
        .map(|message| format!("<div class='error'>{}</div>", escape_html(message)))
        .unwrap_or_default();
    let dims = item.dimensions();
    format!(
        "<div class='card'><div class='thumb'>{thumb}</div><div class='meta'><div class='size'>{platform} {size} ({width}x{height})</div><div>{state} v{version}</div>{error}<pre>{source}</pre></div></div>",
        platform = escape_html(item.platform()),
        size = escape_html(item.size()),
        width = dims.width,
        height = dims.height,
        state = item.state(),
        version = item.template_version(),
        source = escape_html(item.template()),
    )
}

/// Preview paths are stored as written; a moved run directory falls back to
/// its own previews folder.
fn data_url(run_dir: &Path, preview: &PreviewArtifact) -> Option<String> {
    let mut candidates = vec![preview.path.clone()];
    if let Some(name) = preview.path.file_name() {
        candidates.push(run_dir.join(PREVIEWS_DIR).join(name));
    }
    let bytes = candidates
        .iter()
        .find(|path: &&PathBuf| path.is_file())
        .and_then(|path| fs::read(path).ok())?;
    let mime = preview.mime_type.as_deref().unwrap_or("image/png");
    Some(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}
