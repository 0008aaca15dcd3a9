//! Process-level settings ingested from `GITDIR_*` environment variables.
//! Everything that can change at runtime lives in the admin repo instead;
//! this is only what the binary needs before it can read that repo.

use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::PublicKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Console,
    #[default]
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "console" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            _ => Err(Error::Config(
                "GITDIR_LOG_FORMAT: must be console or json".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub base_dir: PathBuf,
    pub log_format: LogFormat,
    pub debug: bool,

    /// Bootstrap seed: make this user an admin on first load.
    pub admin_user: Option<String>,
    pub admin_public_key: Option<PublicKey>,

    /// Set by the server for its own hook re-entry, never by operators.
    pub hook_repo_path: Option<String>,
    pub hook_public_key: Option<String>,
}

impl ServerConfig {
    pub const DEFAULT_BIND_ADDR: &'static str = "0.0.0.0:2222";

    /// Read the full config from the environment. `GITDIR_BASE_DIR` is the
    /// only required variable and must name an existing directory.
    pub fn from_env() -> Result<Self> {
        let base_dir = env::var("GITDIR_BASE_DIR")
            .map_err(|_| Error::Config("GITDIR_BASE_DIR: not set".to_string()))?;

        let base_dir = PathBuf::from(base_dir)
            .canonicalize()
            .map_err(|e| Error::Config(format!("GITDIR_BASE_DIR: {e}")))?;

        if !base_dir.is_dir() {
            return Err(Error::Config("GITDIR_BASE_DIR: not a directory".to_string()));
        }

        let log_format = match env::var("GITDIR_LOG_FORMAT") {
            Ok(raw) => LogFormat::parse(&raw)?,
            Err(_) => LogFormat::default(),
        };

        let debug = match env::var("GITDIR_DEBUG") {
            Ok(raw) => raw
                .parse::<bool>()
                .map_err(|_| Error::Config("GITDIR_DEBUG: must be true or false".to_string()))?,
            Err(_) => false,
        };

        let admin_public_key = match env::var("GITDIR_ADMIN_PUBLIC_KEY") {
            Ok(raw) => Some(
                PublicKey::parse(&raw)
                    .map_err(|_| Error::Config("GITDIR_ADMIN_PUBLIC_KEY: malformed".to_string()))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            bind_addr: env::var("GITDIR_BIND_ADDR")
                .unwrap_or_else(|_| Self::DEFAULT_BIND_ADDR.to_string()),
            base_dir,
            log_format,
            debug,
            admin_user: env::var("GITDIR_ADMIN_USER").ok(),
            admin_public_key,
            hook_repo_path: env::var("GITDIR_HOOK_REPO_PATH").ok(),
            hook_public_key: env::var("GITDIR_HOOK_PUBLIC_KEY").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("console").unwrap(), LogFormat::Console);
        assert_eq!(LogFormat::parse("json").unwrap(), LogFormat::Json);
        assert!(LogFormat::parse("pretty").is_err());
    }
}
