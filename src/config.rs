use crate::error::PipelineError;
use log::debug;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_WMS_BASE_URL: &str = "https://wms.3plwinner.com/VeraCore/Public.Api/api";
pub const TOKEN_KEY: &str = "WMS_TOKEN";

#[derive(Debug, Clone)]
pub struct Config {
    pub wms: WmsConfig,
    pub polling: PollConfig,
    pub docstore: Option<DocStoreConfig>,
    pub env_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WmsConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub system_id: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            interval: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocStoreConfig {
    pub site_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub target_folder: String,
    pub archive_folder: String,
}

impl Config {
    /// Loads `env_file` into the process environment (missing file is fine) and reads
    /// the configuration from it.
    pub fn from_env(env_file: &Path, require_docstore: bool) -> Result<Self, PipelineError> {
        match dotenvy::from_path(env_file) {
            Ok(()) => debug!("Loaded environment from {}", env_file.display()),
            Err(e) => debug!("No env file loaded from {}: {}", env_file.display(), e),
        }
        Self::from_lookup(|key| std::env::var(key).ok(), env_file, require_docstore)
    }

    pub fn from_lookup<F>(
        lookup: F,
        env_file: &Path,
        require_docstore: bool,
    ) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| PipelineError::Config(format!("{} must be set", key)))
        };

        let wms = WmsConfig {
            base_url: get("WMS_BASE_URL").unwrap_or_else(|| DEFAULT_WMS_BASE_URL.to_string()),
            username: required("WMS_USERNAME")?,
            password: required("WMS_PASSWORD")?,
            system_id: required("WMS_SYSTEM_ID")?,
            token: get(TOKEN_KEY),
            request_timeout: Duration::from_secs(parse_number(
                get("WMS_REQUEST_TIMEOUT_SECS"),
                "WMS_REQUEST_TIMEOUT_SECS",
                30,
            )?),
        };

        let defaults = PollConfig::default();
        let polling = PollConfig {
            max_attempts: parse_number(
                get("WMS_POLL_ATTEMPTS"),
                "WMS_POLL_ATTEMPTS",
                defaults.max_attempts,
            )?,
            interval: Duration::from_secs(parse_number(
                get("WMS_POLL_INTERVAL_SECS"),
                "WMS_POLL_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
        };
        if polling.max_attempts == 0 {
            return Err(PipelineError::Config(
                "WMS_POLL_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let docstore = if require_docstore {
            Some(DocStoreConfig {
                site_url: required("DOCSTORE_SITE_URL")?,
                token_url: required("DOCSTORE_TOKEN_URL")?,
                client_id: required("DOCSTORE_CLIENT_ID")?,
                client_secret: required("DOCSTORE_CLIENT_SECRET")?,
                scope: get("DOCSTORE_SCOPE").unwrap_or_default(),
                target_folder: required("DOCSTORE_FOLDER")?,
                archive_folder: get("DOCSTORE_ARCHIVE_FOLDER")
                    .unwrap_or_else(|| "Archive".to_string()),
            })
        } else {
            None
        };

        Ok(Config {
            wms,
            polling,
            docstore,
            env_file: env_file.to_path_buf(),
        })
    }
}

/// Parses into the target type directly; out-of-range values are errors.
fn parse_number<T: FromStr>(
    raw: Option<String>,
    key: &str,
    default: T,
) -> Result<T, PipelineError> {
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| {
            PipelineError::Config(format!("{} is not a valid number: {}", key, v))
        }),
    }
}

/// Writes `key=value` into the env file, replacing an existing assignment of `key`.
pub async fn persist_env_value(path: &Path, key: &str, value: &str) -> std::io::Result<()> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let assignment = format!("{}={}", key, value);
    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            let assigns_key = line
                .trim_start()
                .strip_prefix(key)
                .is_some_and(|rest| rest.trim_start().starts_with('='));
            if assigns_key && !replaced {
                replaced = true;
                assignment.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(assignment);
    }

    let mut contents = lines.join("\n");
    contents.push('\n');
    tokio::fs::write(path, contents).await
}
