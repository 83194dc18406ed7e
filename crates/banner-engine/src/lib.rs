pub mod backend;
pub mod config;
pub mod conversation;
pub mod dryrun;
pub mod error;
pub mod export;
pub mod http;
pub mod previews;
pub mod request;
pub mod studio;

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::{Map, Value};

pub use backend::StudioBackend;
pub use config::BackendConfig;
pub use error::StudioError;
pub use studio::{BatchReport, EditTicket, ExportedArtifact, Studio};

/// Backend by CLI name: `http` (default) or `dryrun`.
pub fn backend_for(name: &str, config: BackendConfig) -> Result<Arc<dyn StudioBackend>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" | "http" => Ok(Arc::new(http::HttpBackend::new(config)?)),
        "dryrun" => Ok(Arc::new(dryrun::DryrunBackend::new())),
        other => bail!("unknown backend '{other}' (expected http or dryrun)"),
    }
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

pub(crate) fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_resolve() -> anyhow::Result<()> {
        assert_eq!(backend_for("dryrun", BackendConfig::default())?.name(), "dryrun");
        assert_eq!(backend_for(" HTTP ", BackendConfig::default())?.name(), "http");
        assert!(backend_for("ftp", BackendConfig::default()).is_err());
        Ok(())
    }
}
