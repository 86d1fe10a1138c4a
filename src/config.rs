// Configuration collaborator.
//
// Values come from `~/.codethreatconfig.json` first; any field missing
// there is filled from the environment. The result is a single immutable
// `RemoteConfig` handed to the transport client. Nothing in the scan
// pipeline reads configuration again after that.

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_BASE_URL: &str = "CODETHREAT_BASE_URL";
pub const ENV_ORG_NAME: &str = "CODETHREAT_ORG_NAME";
pub const ENV_ACCESS_TOKEN: &str = "CODETHREAT_ACCESS_TOKEN";

/// On-disk shape of the config file. Keys match what the web UI exports.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, rename = "ctAccessToken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl FileConfig {
    /// Read the config file. A missing file is an empty config, a
    /// malformed one is a configuration error.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config.file.absent");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| ScanError::config(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ScanError::config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Write the config as pretty JSON. The file holds a token, so on unix
    /// it is created readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| ScanError::config(format!("failed to serialize config: {e}")))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ScanError::io(parent, e))?;
            }
        }
        fs::write(path, data).map_err(|e| ScanError::io(path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(|e| ScanError::io(path, e))?;
        }
        debug!(path = %path.display(), "config.file.saved");
        Ok(())
    }
}

/// Connection settings for the remote scanning service.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub organization_name: Option<String>,
    pub access_token: Option<String>,
}

// Hand-written so tokens never end up in logs.
impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("organization_name", &self.organization_name)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RemoteConfig {
    /// Load from the default config file and the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path(), |key| std::env::var(key).ok())
    }

    /// Same as `load` with an explicit file and env lookup, so tests don't
    /// have to touch the real home directory or process environment.
    pub fn load_from<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = FileConfig::read(path)?;
        let cfg = Self::resolve(file, env);
        debug!(config = ?cfg, "config.resolved");
        Ok(cfg)
    }

    /// Layered resolution: file value wins, env fills the gaps. Blank
    /// values on either side count as missing.
    pub fn resolve<F>(file: FileConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |from_file: Option<String>, key: &str| {
            non_blank(from_file).or_else(|| non_blank(env(key)))
        };
        Self {
            base_url: pick(file.base_url, ENV_BASE_URL),
            organization_name: pick(file.organization_name, ENV_ORG_NAME),
            access_token: pick(file.access_token, ENV_ACCESS_TOKEN),
        }
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// `~/.codethreatconfig.json`, or `./.codethreatconfig.json` when the home
/// directory cannot be determined.
pub fn config_file_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codethreatconfig.json")
}
