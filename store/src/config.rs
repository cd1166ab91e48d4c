//! Configuration for a store tree.

use serde::{Deserialize, Serialize};
use std::env;

/// Environment variable read by [`StoreConfig::from_env`].
pub const LOCK_ON_READ_VAR: &str = "CARRY_LOCK_ON_READ";

/// Settings applied to every store a tree creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Pin a lock the first time a chained store reads a key. Each store can
    /// override this with [`crate::StoreTree::set_lock_on_read`].
    pub lock_on_read: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { lock_on_read: true }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_on_read(mut self, enabled: bool) -> Self {
        self.lock_on_read = enabled;
        self
    }

    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lock_on_read = match env::var(LOCK_ON_READ_VAR) {
            Ok(value) => parse_flag(&value).ok_or(ConfigError::InvalidLockOnRead(value))?,
            Err(_) => true,
        };

        Ok(Self { lock_on_read })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid CARRY_LOCK_ON_READ value: {0}")]
    InvalidLockOnRead(String),
}
