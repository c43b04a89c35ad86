//! Role-based gating of named operations
//!
//! A single persisted role decides which operations may run. The role file is
//! read once into an in-memory cache; role changes are written to disk
//! (through `tokio::fs`) before the cache is updated, so the cache only ever
//! reflects durably stored state.
//!
//! An unreadable, missing or invalid role file (including a role spelled any
//! way other than exactly `admin` or `operator`) resolves to the configured
//! fallback role. The default fallback is `admin` (fail-open), keeping
//! existing installs usable when the file is lost or corrupted;
//! `InvalidConfigPolicy::FailClosed` resolves to `operator` instead.

pub mod role;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

use crate::constants::ADMIN_ONLY_OPERATIONS;
use crate::logging::now_timestamp;
pub use role::Role;

/// Persisted role configuration: `{role, configuredBy, configuredAt}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RbacConfig {
    pub role: Role,
    pub configured_by: String,
    pub configured_at: String,
}

/// On-disk shape, read leniently so an unknown role can be detected
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    role: String,
    #[serde(default)]
    configured_by: String,
    #[serde(default)]
    configured_at: String,
}

/// Role used when the role file cannot be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidConfigPolicy {
    /// Resolve to `admin`
    #[default]
    #[serde(alias = "admin")]
    FailOpen,
    /// Resolve to `operator`
    #[serde(alias = "operator")]
    FailClosed,
}

impl InvalidConfigPolicy {
    pub fn fallback_role(self) -> Role {
        match self {
            InvalidConfigPolicy::FailOpen => Role::Admin,
            InvalidConfigPolicy::FailClosed => Role::Operator,
        }
    }
}

#[derive(Debug, Error)]
pub enum RbacError {
    #[error("Failed to persist role configuration to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize role configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct RbacEngine {
    path: PathBuf,
    policy: InvalidConfigPolicy,
    cache: RwLock<RbacConfig>,
    /// Serializes role changes so the file and the cache agree on the last writer
    change_lock: tokio::sync::Mutex<()>,
}

impl RbacEngine {
    /// Engine backed by `path`; holds the fallback role until initialized
    pub fn new(path: impl Into<PathBuf>, policy: InvalidConfigPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            cache: RwLock::new(fallback_config(policy)),
            change_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted role into the cache. Never fails.
    pub fn initialize(&self) -> RbacConfig {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(reason) => {
                let fallback = fallback_config(self.policy);
                log::warn!(
                    "Role configuration {} not usable ({}); using '{}'",
                    self.path.display(),
                    reason,
                    fallback.role
                );
                fallback
            }
        };

        log::info!("Active role: {}", config.role);
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = config.clone();
        config
    }

    pub fn current_role(&self) -> Role {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).role
    }

    pub fn config(&self) -> RbacConfig {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Persist a new role, then update the cache. On error the previous role
    /// stays active.
    pub async fn set_role(&self, role: Role) -> Result<RbacConfig, RbacError> {
        let config = RbacConfig {
            role,
            configured_by: crate::audit::current_username(),
            configured_at: now_timestamp(),
        };

        let _change = self.change_lock.lock().await;
        persist_config(&self.path, &config).await?;
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = config.clone();

        log::info!("Role changed to '{}' by {}", config.role, config.configured_by);
        Ok(config)
    }

    pub fn is_permitted(&self, operation: &str) -> bool {
        match self.current_role() {
            Role::Admin => true,
            Role::Operator => !is_admin_only(operation),
        }
    }

    pub fn admin_only_operations(&self) -> Vec<String> {
        ADMIN_ONLY_OPERATIONS.iter().map(|s| s.to_string()).collect()
    }
}

/// Whether `operation` is restricted to the admin role
pub fn is_admin_only(operation: &str) -> bool {
    ADMIN_ONLY_OPERATIONS.contains(&operation)
}

fn fallback_config(policy: InvalidConfigPolicy) -> RbacConfig {
    RbacConfig {
        role: policy.fallback_role(),
        configured_by: "default".to_string(),
        configured_at: now_timestamp(),
    }
}

fn load_config(path: &Path) -> Result<RbacConfig, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let stored: StoredConfig = serde_json::from_str(&content).map_err(|e| e.to_string())?;
    let role = Role::parse(&stored.role).ok_or_else(|| format!("unknown role '{}'", stored.role))?;

    Ok(RbacConfig {
        role,
        configured_by: stored.configured_by,
        configured_at: stored.configured_at,
    })
}

/// Write via a sibling temp file and rename so readers never see a partial file
async fn persist_config(path: &Path, config: &RbacConfig) -> Result<(), RbacError> {
    let content = serde_json::to_string_pretty(config)?;
    let persist_err = |source: std::io::Error| RbacError::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await.map_err(persist_err)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(persist_err(e));
    }
    Ok(())
}
