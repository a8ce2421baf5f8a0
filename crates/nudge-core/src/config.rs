use crate::error::{NudgeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "nudge.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local; coordination only holds within one process.
    #[default]
    Memory,
    /// Durable redb file. Relative paths resolve against the config file.
    Redb {
        #[serde(default = "default_redb_path")]
        path: PathBuf,
    },
}

fn default_redb_path() -> PathBuf {
    PathBuf::from(".nudge/store.redb")
}

// ---------------------------------------------------------------------------
// CoordinationConfig
// ---------------------------------------------------------------------------

/// Tunables for the coordination primitives. All TTLs are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,
    #[serde(default = "default_scan_lock_ttl")]
    pub scan_lock_ttl_secs: u64,
    #[serde(default = "default_analyze_lock_ttl")]
    pub analyze_lock_ttl_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_analysis_ttl")]
    pub analysis_ttl_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    #[serde(default = "default_supersede_wait")]
    pub supersede_wait_secs: u64,
}

fn default_idempotency_ttl() -> u64 {
    600
}

fn default_scan_lock_ttl() -> u64 {
    900
}

fn default_analyze_lock_ttl() -> u64 {
    300
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_analysis_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_batch_size() -> usize {
    5
}

fn default_deadline() -> u64 {
    240
}

fn default_supersede_wait() -> u64 {
    30
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_secs: default_idempotency_ttl(),
            scan_lock_ttl_secs: default_scan_lock_ttl(),
            analyze_lock_ttl_secs: default_analyze_lock_ttl(),
            session_ttl_secs: default_session_ttl(),
            analysis_ttl_secs: default_analysis_ttl(),
            batch_size: default_batch_size(),
            deadline_secs: default_deadline(),
            supersede_wait_secs: default_supersede_wait(),
        }
    }
}

impl CoordinationConfig {
    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn scan_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_lock_ttl_secs)
    }

    pub fn analyze_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.analyze_lock_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn analysis_ttl(&self) -> Duration {
        Duration::from_secs(self.analysis_ttl_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn supersede_wait(&self) -> Duration {
        Duration::from_secs(self.supersede_wait_secs)
    }
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// A statically configured repository, used when no hosting API is wired up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub last_modified: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    /// Repositories per owner.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repos: BTreeMap<String, Vec<RepoConfig>>,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            store: StoreConfig::default(),
            coordination: CoordinationConfig::default(),
            repos: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Rewrite relative store paths against `base` (the config file's directory).
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        if let StoreConfig::Redb { path } = &mut self.store {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let c = &self.coordination;

        if c.batch_size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "coordination.batch_size must be at least 1".to_string(),
            });
        }

        for (field, value) in [
            ("idempotency_ttl_secs", c.idempotency_ttl_secs),
            ("scan_lock_ttl_secs", c.scan_lock_ttl_secs),
            ("analyze_lock_ttl_secs", c.analyze_lock_ttl_secs),
            ("session_ttl_secs", c.session_ttl_secs),
        ] {
            if value == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("coordination.{field} must be greater than zero"),
                });
            }
        }

        // The coarse lock must outlive a full sweep, including one wave of
        // overshoot, or a second sweep can start while the first still runs.
        if c.scan_lock_ttl_secs < c.deadline_secs + c.analyze_lock_ttl_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "scan_lock_ttl_secs={} is shorter than deadline_secs + analyze_lock_ttl_secs ({}); \
                     a slow final wave can outlive the scan lock",
                    c.scan_lock_ttl_secs,
                    c.deadline_secs + c.analyze_lock_ttl_secs
                ),
            });
        }

        if c.idempotency_ttl_secs < 60 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "idempotency_ttl_secs={} is shorter than typical upstream redelivery windows",
                    c.idempotency_ttl_secs
                ),
            });
        }

        for (owner, repos) in &self.repos {
            let mut names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
            names.sort_unstable();
            if names.windows(2).any(|w| w[0] == w[1]) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("owner '{owner}' lists the same repository twice"),
                });
            }
        }

        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }

    /// Validate and fail on any error-level finding. Returns the warnings
    /// that remain.
    pub fn ensure_valid(&self) -> Result<Vec<ConfigWarning>> {
        let (errors, warnings): (Vec<_>, Vec<_>) = self
            .validate()
            .into_iter()
            .partition(|w| w.level == WarnLevel::Error);
        if !errors.is_empty() {
            let messages: Vec<String> = errors.into_iter().map(|w| w.message).collect();
            return Err(NudgeError::InvalidConfig(messages.join("; ")));
        }
        Ok(warnings)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
