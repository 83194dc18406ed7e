use std::env;
use std::time::Duration;

pub const API_BASE_ENV: &str = "BANNER_API_BASE_URL";
pub const HTTP_TIMEOUT_ENV: &str = "BANNER_HTTP_TIMEOUT_S";
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const API_PREFIX: &str = "/api";
const DEFAULT_TIMEOUT_S: f64 = 120.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub api_base: String,
    pub timeout: Duration,
}

impl BackendConfig {
    /// Flag value first, then the environment, then the local default.
    pub fn resolve(api_base_flag: Option<&str>) -> Self {
        Self::from_values(
            api_base_flag
                .map(str::to_string)
                .or_else(|| non_empty_env(API_BASE_ENV)),
            non_empty_env(HTTP_TIMEOUT_ENV),
        )
    }

    pub fn from_values(api_base: Option<String>, timeout_s: Option<String>) -> Self {
        let api_base = api_base
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let timeout_s = timeout_s
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_TIMEOUT_S)
            .clamp(5.0, 600.0);
        Self {
            api_base,
            timeout: Duration::from_secs_f64(timeout_s),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{API_PREFIX}/{}",
            self.api_base,
            path.trim_start_matches('/')
        )
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_values(None, None)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
