//! The two raw, partially-filled configuration sources the
//! [`super::loader::ConfigLoader`] merges: a TOML file on disk and the
//! process environment. Grounded in the teacher's `FileConfig`/`EnvConfig`
//! split (`infra/config/sources.rs`), trimmed to the fields this server
//! actually has (spec §6).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Raw configuration as defined in a TOML file. Every field is optional so
/// a config file can specify only the values it wants to override.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub store: FileStoreConfig,
    #[serde(default)]
    pub files: FileFilesConfig,
    #[serde(default)]
    pub permissions: FilePermissionsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdav_base_url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_core_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFilesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePermissionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// Environment-derived configuration values (spec §6).
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub store_url: Option<String>,
    pub store_prefix: Option<String>,
    pub meta_core_path: Option<PathBuf>,
    pub files_root: Option<PathBuf>,
    pub file_mode: Option<u32>,
    pub dir_mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub config_dir: Option<PathBuf>,
    pub webdav_base_url: Option<String>,
    pub config_path: Option<PathBuf>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            server_host: std::env::var("API_HOST").ok(),
            server_port: std::env::var("API_PORT").ok().and_then(|s| s.parse().ok()),
            store_url: std::env::var("STORE_URL").ok(),
            store_prefix: std::env::var("STORE_PREFIX").ok(),
            meta_core_path: std::env::var("META_CORE_PATH").ok().map(PathBuf::from),
            files_root: std::env::var("FILES_ROOT").ok().map(PathBuf::from),
            file_mode: parse_octal_var("FILE_MODE"),
            dir_mode: parse_octal_var("DIR_MODE"),
            uid: std::env::var("UID").ok().and_then(|s| s.parse().ok()),
            gid: std::env::var("GID").ok().and_then(|s| s.parse().ok()),
            config_dir: std::env::var("CONFIG_DIR").ok().map(PathBuf::from),
            webdav_base_url: std::env::var("WEBDAV_BASE_URL").ok(),
            config_path: std::env::var("METAFS_CONFIG_PATH").ok().map(PathBuf::from),
        }
    }
}

/// Parses an octal mode string (e.g. `"0644"` or `"644"`) from an
/// environment variable.
fn parse_octal_var(name: &str) -> Option<u32> {
    std::env::var(name)
        .ok()
        .and_then(|raw| u32::from_str_radix(raw.trim_start_matches("0o"), 8).ok())
}

/// Parses an octal mode string from a TOML-file value (spec §6: `fileMode`
/// / `dirMode` are given in octal, e.g. `"0644"`).
pub fn parse_octal_field(raw: &str) -> Option<u32> {
    u32::from_str_radix(raw.trim_start_matches("0o"), 8).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_octal_mode_strings() {
        assert_eq!(parse_octal_field("0644"), Some(0o644));
        assert_eq!(parse_octal_field("755"), Some(0o755));
        assert_eq!(parse_octal_field("not-octal"), None);
    }
}
