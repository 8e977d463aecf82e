//! Configuration loading and server endpoint resolution

use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// Default backend address when nothing else is configured
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5151";

/// Environment variable naming the backend address
pub const SERVER_URL_ENV: &str = "FOVEA_SERVER_URL";

/// Environment variable enabling stateless mode
pub const NO_STATE_ENV: &str = "FOVEA_NO_STATE";

/// Environment variable carrying the embedding host context
pub const CONTEXT_ENV: &str = "FOVEA_CONTEXT";

/// Resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the backend session server
    pub server_url: String,

    /// Stateless mode: initial dataset/view come from the current URL
    /// instead of the session payload
    pub stateless: bool,

    /// Embedding host context ("notebook", "colab", ...), when hosted
    pub context: Option<String>,
}

/// On-disk config file shape (`~/.config/fovea/config.toml`)
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    server_url: Option<String>,
    stateless: Option<bool>,
    context: Option<String>,
}

impl AppConfig {
    /// Resolve configuration in priority order:
    /// 1. Command-line arguments (highest priority)
    /// 2. Environment variables
    /// 3. TOML config file
    /// 4. Compiled defaults (fallback)
    pub fn resolve(
        cli_server_url: Option<&str>,
        cli_stateless: bool,
        cli_context: Option<&str>,
    ) -> Result<Self> {
        let file = load_config_file()
            .and_then(|path| {
                let contents = std::fs::read_to_string(&path)?;
                toml::from_str::<ConfigFile>(&contents)
                    .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))
            })
            .unwrap_or_default();

        let server_url = cli_server_url
            .map(str::to_string)
            .or_else(|| std::env::var(SERVER_URL_ENV).ok())
            .or(file.server_url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

        let stateless = cli_stateless
            || std::env::var(NO_STATE_ENV).is_ok_and(|value| value != "0" && value != "false")
            || file.stateless.unwrap_or(false);

        let context = cli_context
            .map(str::to_string)
            .or_else(|| std::env::var(CONTEXT_ENV).ok())
            .or(file.context);

        debug!(%server_url, stateless, "configuration resolved");
        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            stateless,
            context,
        })
    }
}

/// Get the platform config file path, if one exists
fn load_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|dir| dir.join("fovea").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fovea/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_argument_wins() {
        let config =
            AppConfig::resolve(Some("http://localhost:9999/"), false, Some("notebook")).unwrap();
        assert_eq!(config.server_url, "http://localhost:9999");
        assert_eq!(config.context.as_deref(), Some("notebook"));
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        // Env vars are absent in the test environment unless exported
        if std::env::var(SERVER_URL_ENV).is_ok() {
            return;
        }
        let config = AppConfig::resolve(None, false, None).unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert!(!config.stateless);
    }
}
