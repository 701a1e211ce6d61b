use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:3001";
pub const API_URL_ENV: &str = "KNOWLEDGE_CONSOLE_API_URL";
pub const LOG_FILTER_ENV: &str = "KNOWLEDGE_CONSOLE_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub api_url: String,
    /// Path of the live invalidation endpoint, relative to `api_url`.
    pub live_path: String,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
    pub keyring_service: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            live_path: "/".to_string(),
            log_filter: "info".to_string(),
            log_dir: None,
            keyring_service: "knowledge-console".to_string(),
        }
    }
}

impl ClientConfig {
    /// File settings (when a path is given) with environment overrides on top.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                AppError::Config(format!("Config file not found: {}", path.display()))
            } else {
                AppError::Io(error.to_string())
            }
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_url) = lookup(API_URL_ENV).filter(|value| !value.trim().is_empty()) {
            self.api_url = api_url.trim().to_string();
        }
        if let Some(filter) = lookup(LOG_FILTER_ENV).filter(|value| !value.trim().is_empty()) {
            self.log_filter = filter.trim().to_string();
        }
        self
    }

    pub fn api_base(&self) -> AppResult<Url> {
        let url = Url::parse(&self.api_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(AppError::Config(format!(
                "apiUrl must use http or https, got '{}'",
                other
            ))),
        }
    }

    pub fn live_endpoint(&self) -> AppResult<Url> {
        Ok(self.api_base()?.join(&self.live_path)?)
    }
}
