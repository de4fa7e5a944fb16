//! Persistent configuration for the hello-patient CLI.
//!
//! Config file lives at `~/.config/hello-patient/config.toml`.
//! Session state (user and thread ids) is kept separately by the SDK's
//! `FileStore`, by default in `~/.config/hello-patient/session.toml`.

use std::path::{Path, PathBuf};

use hello_patient_sdk::session::{DEFAULT_API_URL, DEFAULT_USER_ID};
use hello_patient_sdk::store::FileStore;
use serde::Deserialize;

/// User configuration (config.toml).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Backend base URL. Default: http://localhost:8000
    pub api_url: Option<String>,
    /// User id to use the first time a conversation is created.
    pub user_id: Option<String>,
    /// Override for the session state file.
    pub state_file: Option<PathBuf>,
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hello-patient")
        .join("config.toml")
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Missing file means defaults; an unreadable one is reported and ignored.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return c,
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Bad config file"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Can't read config file"),
            }
        }
        Self::default()
    }
}

/// Effective settings after merging every source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub api_url: String,
    pub user_id: String,
    pub state_file: PathBuf,
}

impl Resolved {
    /// Merge: CLI overrides > config file > defaults.
    pub fn merge(cli: &super::Cli, config: &Config) -> Self {
        let api_url = cli
            .api_url
            .clone()
            .or_else(|| config.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        // Tolerate a pasted URL with trailing slashes.
        let api_url = api_url.trim_end_matches('/').to_string();

        let user_id = cli
            .user_id
            .clone()
            .or_else(|| config.user_id.clone())
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string());

        let state_file = cli
            .state_file
            .clone()
            .or_else(|| config.state_file.clone())
            .unwrap_or_else(FileStore::default_path);

        Self {
            api_url,
            user_id,
            state_file,
        }
    }
}
