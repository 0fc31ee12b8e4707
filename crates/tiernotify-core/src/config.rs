//! TierNotify configuration system.

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TierNotifyError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierNotifyConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub recipients: RecipientsConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Optional TOML catalog replacing the built-in definitions.
    #[serde(default)]
    pub catalog_path: Option<String>,
}

impl TierNotifyConfig {
    /// Load config from the default path (~/.tiernotify/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TierNotifyError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TierNotifyError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_tenants == 0 {
            return Err(TierNotifyError::Config(
                "scheduler.max_concurrent_tenants must be at least 1".into(),
            ));
        }
        if self.scheduler.persist_attempts == 0 {
            return Err(TierNotifyError::Config(
                "scheduler.persist_attempts must be at least 1".into(),
            ));
        }
        if self.scheduler.io_timeout_secs == 0 {
            return Err(TierNotifyError::Config(
                "scheduler.io_timeout_secs must be at least 1".into(),
            ));
        }
        if StrftimeItems::new(&self.scheduler.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(TierNotifyError::Config(format!(
                "scheduler.date_format '{}' is not a valid strftime format",
                self.scheduler.date_format
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the TierNotify home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tiernotify")
    }
}

/// Run-level scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tenants: usize,
    /// Deadline applied to every individual collaborator call.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    /// Overall run deadline; unset means unbounded.
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,
    #[serde(default = "default_persist_delay")]
    pub persist_delay_ms: u64,
    #[serde(default = "default_trial_period")]
    pub default_trial_period_days: i64,
    /// chrono format string for the `date` template field.
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_max_concurrent() -> usize { 16 }
fn default_io_timeout() -> u64 { 30 }
fn default_persist_attempts() -> u32 { 5 }
fn default_persist_delay() -> u64 { 1000 }
fn default_trial_period() -> i64 { 45 }
fn default_date_format() -> String { "%b %-d, %Y".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tenants: default_max_concurrent(),
            io_timeout_secs: default_io_timeout(),
            run_deadline_secs: None,
            persist_attempts: default_persist_attempts(),
            persist_delay_ms: default_persist_delay(),
            default_trial_period_days: default_trial_period(),
            date_format: default_date_format(),
        }
    }
}

/// Who receives notifications besides tenant admins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientsConfig {
    /// Internal copy address; empty disables it.
    #[serde(default = "default_internal_address")]
    pub internal_address: String,
    #[serde(default = "default_account_team_role")]
    pub account_team_role: String,
    /// User roles treated as tenant admins by the record store.
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,
}

fn default_internal_address() -> String { "trial-notifications@tiernotify.local".into() }
fn default_account_team_role() -> String { "fsr".into() }
fn default_admin_roles() -> Vec<String> { vec!["admin".into()] }

impl Default for RecipientsConfig {
    fn default() -> Self {
        Self {
            internal_address: default_internal_address(),
            account_team_role: default_account_team_role(),
            admin_roles: default_admin_roles(),
        }
    }
}

/// Template selection inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Asset types that mark a zero-entitlement tenant as procurement-only.
    #[serde(default = "default_recognized_assets")]
    pub recognized_asset_types: Vec<String>,
}

fn default_recognized_assets() -> Vec<String> {
    [
        "google-cloud",
        "amazon-web-services",
        "microsoft-azure",
        "office-365",
        "g-suite",
        "looker",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            recognized_asset_types: default_recognized_assets(),
        }
    }
}

/// Local record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.tiernotify/records.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Templated-mail HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Overridden by `TIERNOTIFY_DELIVERY_API_KEY` when set.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String { "http://localhost:8025/api/v1/send".into() }
fn default_delivery_timeout() -> u64 { 10 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            timeout_secs: default_delivery_timeout(),
        }
    }
}
