pub mod catalog;
pub mod chat;
pub mod conversation;
pub mod events;
pub mod items;
pub mod runs;
pub mod session;

pub(crate) fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

pub(crate) fn write_json_pretty(
    path: &std::path::Path,
    payload: &serde_json::Value,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}
