//! Resolved configuration types (spec §6 "Configuration"): the typed,
//! fully-defaulted shape every other part of the server reads from. Built
//! by [`super::loader::ConfigLoader`] out of a layered
//! [`super::sources::FileConfig`] + [`super::sources::EnvConfig`] +
//! CLI overlay.

use std::path::PathBuf;

/// The fully resolved server configuration (spec §6 configuration keys).
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub files: FilesConfig,
    pub permissions: PermissionsConfig,
    pub config_dir: PathBuf,
    pub webdav_base_url: Option<String>,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where the event-sourced metadata store lives (spec §6: `storeUrl`,
/// `storePrefix`, `metaCorePath`).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    /// Key prefix for per-file property keys, e.g. `file:` in
    /// `file:<fileId>/<property>` (spec §6 store key schema).
    pub prefix: String,
    /// Optional on-disk path to a companion metadata-core instance running
    /// alongside this engine, for deployments that colocate the two.
    /// Reserved for operational tooling; the projection engine itself only
    /// ever talks to the store over `store.url`.
    pub meta_core_path: Option<PathBuf>,
}

/// Where upstream file bytes live, and the optional network share gateway
/// used to build `webdavUrl` in `read` responses.
#[derive(Debug, Clone)]
pub struct FilesConfig {
    pub root: PathBuf,
}

/// POSIX-style attribute defaults reported by `getattr` (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct PermissionsConfig {
    pub file_mode: u32,
    pub dir_mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Provenance metadata surfaced for diagnostics (which file was loaded, if
/// any, and whether a `.env` was picked up) — mirrors the teacher's
/// `ConfigMetadata` pattern of recording how a `Config` was assembled
/// rather than just its resolved values.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            file_mode: 0o644,
            dir_mode: 0o755,
            uid: 0,
            gid: 0,
        }
    }
}
