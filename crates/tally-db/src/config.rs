//! # Engine Configuration
//!
//! Configuration for the storage layer, retry wrapper and document numbering.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     TALLY_DB_PATH=/var/lib/tally/tally.db                               │
//! │     TALLY_MAX_CONNECTIONS=8                                             │
//! │     TALLY_RETRY_MAX_ATTEMPTS=5                                          │
//! │     TALLY_RETRY_INITIAL_BACKOFF_MS=25                                   │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/tally/engine.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.tally.ledger/engine.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "tally.db"
//! max_connections = 5
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 20
//! max_backoff_ms = 1000
//! multiplier = 2.0
//!
//! [numbering]
//! max_collision_retries = 3
//! sales_invoice_prefix = "SI"
//! purchase_invoice_prefix = "PI"
//! pos_ticket_prefix = "POS"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tally_core::DocumentType;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;
use crate::retry::RetryPolicy;

// =============================================================================
// Database Settings
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tally.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// `[retry]` section: backoff for busy/conflict failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    20
}
fn default_max_backoff() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

// =============================================================================
// Numbering Settings
// =============================================================================

/// `[numbering]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberingSettings {
    /// Regenerations attempted when a generated number already exists.
    #[serde(default = "default_collision_retries")]
    pub max_collision_retries: u32,

    #[serde(default = "default_sales_prefix")]
    pub sales_invoice_prefix: String,

    #[serde(default = "default_purchase_prefix")]
    pub purchase_invoice_prefix: String,

    #[serde(default = "default_pos_prefix")]
    pub pos_ticket_prefix: String,
}

fn default_collision_retries() -> u32 {
    3
}
fn default_sales_prefix() -> String {
    "SI".to_string()
}
fn default_purchase_prefix() -> String {
    "PI".to_string()
}
fn default_pos_prefix() -> String {
    "POS".to_string()
}

impl Default for NumberingSettings {
    fn default() -> Self {
        NumberingSettings {
            max_collision_retries: default_collision_retries(),
            sales_invoice_prefix: default_sales_prefix(),
            purchase_invoice_prefix: default_purchase_prefix(),
            pos_ticket_prefix: default_pos_prefix(),
        }
    }
}

impl NumberingSettings {
    /// Prefix for a document type.
    pub fn prefix(&self, document_type: DocumentType) -> &str {
        match document_type {
            DocumentType::SalesInvoice => &self.sales_invoice_prefix,
            DocumentType::PurchaseInvoice => &self.purchase_invoice_prefix,
            DocumentType::PosTicket => &self.pos_ticket_prefix,
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub numbering: NumberingSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| DbError::Config(format!("{}: {}", path.display(), e)))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        toml::from_str(contents).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.max_connections == 0 {
            return Err(DbError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(DbError::Config(
                "database.min_connections cannot exceed max_connections".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(DbError::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(DbError::Config("retry.multiplier must be at least 1.0".into()));
        }
        for document_type in [
            DocumentType::SalesInvoice,
            DocumentType::PurchaseInvoice,
            DocumentType::PosTicket,
        ] {
            if self.numbering.prefix(document_type).trim().is_empty() {
                return Err(DbError::Config(format!(
                    "numbering prefix for {:?} must not be empty",
                    document_type
                )));
            }
        }
        Ok(())
    }

    /// Applies overrides from a variable lookup (the process environment in
    /// [`EngineConfig::load`]).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("TALLY_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("TALLY_MAX_CONNECTIONS") {
            match raw.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid TALLY_MAX_CONNECTIONS"),
            }
        }

        if let Some(raw) = lookup("TALLY_RETRY_MAX_ATTEMPTS") {
            match raw.parse::<u32>() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid TALLY_RETRY_MAX_ATTEMPTS"),
            }
        }

        if let Some(raw) = lookup("TALLY_RETRY_INITIAL_BACKOFF_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => self.retry.initial_backoff_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring invalid TALLY_RETRY_INITIAL_BACKOFF_MS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "ledger")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Builds the pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
    }

    /// Builds the retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
        }
    }
}
