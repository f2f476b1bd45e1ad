//! Fleet limits configuration.
//!
//! The surrounding application sources its numeric limits from wherever its
//! settings live; this module handles the common case of a YAML limits file
//! listing the fleet-wide caps and one entry per sending account.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SendgateError};
use crate::throttle::{AccountId, Throttler};

/// Limits for an entire sending fleet: an optional global tier plus one
/// entry per account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Fleet-wide caps; omit to leave the global tier unbounded
    #[serde(default)]
    pub global: Option<GlobalLimitsConfig>,

    /// Per-account caps
    #[serde(default)]
    pub accounts: Vec<AccountLimitsConfig>,
}

/// Fleet-wide rate and concurrency caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLimitsConfig {
    /// Sends admitted per window across all accounts
    pub rate_capacity: usize,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// In-flight sends across all accounts
    #[serde(default = "default_global_concurrency")]
    pub max_concurrency: usize,
}

/// Rate and concurrency caps for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLimitsConfig {
    /// Account id
    pub id: AccountId,

    /// Sends admitted per trailing minute
    pub per_minute: usize,

    /// Sends admitted per trailing hour
    pub per_hour: usize,

    /// Sends admitted per trailing day
    pub per_day: usize,

    /// In-flight sends for this account
    #[serde(default = "default_account_concurrency")]
    pub max_concurrency: usize,
}

fn default_window_secs() -> u64 {
    60
}

fn default_global_concurrency() -> usize {
    5
}

fn default_account_concurrency() -> usize {
    1
}

impl FleetConfig {
    /// Load a fleet limits file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading fleet limits");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse fleet limits from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| SendgateError::Config(format!("Failed to parse fleet limits: {}", e)))
    }

    /// Configure `throttler` with every limit in this config.
    ///
    /// Zero-valued limits are rejected by the throttler; the error names
    /// the offending scope and earlier entries stay configured.
    pub fn apply(&self, throttler: &Throttler) -> Result<()> {
        if let Some(ref global) = self.global {
            throttler.configure_global(
                global.rate_capacity,
                Duration::from_secs(global.window_secs),
                global.max_concurrency,
            )?;
        }
        for account in &self.accounts {
            throttler.configure_account(
                account.id,
                account.per_minute,
                account.per_hour,
                account.per_day,
                account.max_concurrency,
            )?;
        }
        Ok(())
    }
}
