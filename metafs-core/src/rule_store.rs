//! Rule Config Store (spec §4.6): durable, atomic persistence of the rule
//! set that the `/api/fuse/rules` endpoints read and write.
//!
//! Writes land via a temp-file-then-rename so a reader (or a crash) never
//! observes a half-written config, and the previous file is rotated into a
//! bounded set of numbered backups before being replaced — the same
//! "write to a sibling temp path, then persist into place" shape the
//! teacher uses for its own cache persistence
//! (`ferrex-player/src/domains/auth/storage.rs`), generalized here with an
//! explicit rename step for the atomicity guarantee that call site doesn't
//! need.

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::rules::RuleConfig;

const BACKUP_RETENTION: usize = 5;
const RULES_FILE_NAME: &str = "renaming-rules.json";

/// Reads and durably persists the rule configuration under a directory on
/// disk (spec §4.6).
#[derive(Debug, Clone)]
pub struct RuleConfigStore {
    config_dir: PathBuf,
}

impl RuleConfigStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    fn rules_path(&self) -> PathBuf {
        self.config_dir.join(RULES_FILE_NAME)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config_dir.join(format!("{RULES_FILE_NAME}.bak{index}"))
    }

    /// Loads the persisted rule config, or the seeded default if none has
    /// ever been saved (spec §4.6: "if absent, the seeded default is used
    /// and treated as not-yet-customized").
    pub async fn get_rules_config(&self) -> Result<RuleConfig> {
        let path = self.rules_path();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(RuleConfig::seed());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let config: RuleConfig = serde_json::from_str(&data)?;
        Ok(config)
    }

    /// Validates every rule, then durably persists `config` (spec §4.6):
    /// rotate existing backups, write the new config to a temp file in the
    /// same directory, and rename it into place.
    pub async fn save_rules_config(&self, mut config: RuleConfig) -> Result<()> {
        for rule in &config.rules {
            let validation = RuleConfig::validate_rule(rule, None);
            if !validation.valid {
                return Err(CoreError::Validation(format!(
                    "rule '{}' is invalid: {}",
                    rule.id,
                    validation.errors.join("; ")
                )));
            }
        }

        config.last_modified = Some(chrono::Utc::now());
        config.is_default = false;

        tokio::fs::create_dir_all(&self.config_dir).await?;
        self.rotate_backups().await?;

        let data = serde_json::to_string_pretty(&config)?;
        self.write_atomic(&self.rules_path(), &data).await
    }

    /// Shifts `rules.json.bak1..bakN` up by one slot, dropping the oldest,
    /// then copies the current `rules.json` into `bak1` (spec §4.6
    /// supplemental: "keep the last 5 prior versions").
    async fn rotate_backups(&self) -> Result<()> {
        let current = self.rules_path();
        if !tokio::fs::try_exists(&current).await.unwrap_or(false) {
            return Ok(());
        }

        let oldest = self.backup_path(BACKUP_RETENTION);
        if tokio::fs::try_exists(&oldest).await.unwrap_or(false) {
            tokio::fs::remove_file(&oldest).await?;
        }
        for index in (1..BACKUP_RETENTION).rev() {
            let from = self.backup_path(index);
            if tokio::fs::try_exists(&from).await.unwrap_or(false) {
                tokio::fs::rename(&from, self.backup_path(index + 1)).await?;
            }
        }
        tokio::fs::copy(&current, self.backup_path(1)).await?;
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, data: &str) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}
