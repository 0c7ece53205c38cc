use std::{fs, path::PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

/// Endpoint and limit settings for the files API.
///
/// Read from `filedeck.toml` in the user config directory when present;
/// every field has a default, so no file is needed to get going. The base
/// URL can also be set per invocation with `--base-url` or
/// `FILEDECK_BASE_URL`.
#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    pub files_path: String,
    pub max_upload_bytes: u64,
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:44356/api".to_string(),
            files_path: "/files".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ApiConfig {
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("ignoring malformed {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    fn config_path() -> Option<PathBuf> {
        let dirs = ProjectDirs::from("", "", "filedeck")?;
        Some(dirs.config_dir().join("filedeck.toml"))
    }

    /// Full URL of the files collection endpoint.
    pub fn files_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.files_path)
    }
}
