//! Configuration resolution for the registry engine.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/registry/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::clock::DAY;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Complete registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub contacts: ContactPolicy,
    /// Per-TLD grace periods and prices, keyed by TLD without a leading dot.
    #[serde(default)]
    pub tlds: BTreeMap<String, TldPolicy>,
}

/// Process-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Login negotiation and lockout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub supported_versions: Vec<String>,
    pub supported_languages: Vec<String>,
    pub object_services: Vec<String>,
    pub extensions: Vec<String>,
    /// Failed password attempts a session may accumulate before lockout.
    pub max_failed_logins: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            supported_versions: vec!["1.0".to_string()],
            supported_languages: vec!["en".to_string()],
            object_services: vec![
                "urn:ietf:params:xml:ns:domain-1.0".to_string(),
                "urn:ietf:params:xml:ns:host-1.0".to_string(),
                "urn:ietf:params:xml:ns:contact-1.0".to_string(),
            ],
            extensions: vec![
                "urn:ietf:params:xml:ns:rgp-1.0".to_string(),
                "urn:ietf:params:xml:ns:secDNS-1.1".to_string(),
            ],
            max_failed_logins: 3,
        }
    }
}

/// Contacts are not tied to a TLD; their transfer timing is global.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContactPolicy {
    pub automatic_transfer_secs: i64,
}

impl Default for ContactPolicy {
    fn default() -> Self {
        Self {
            automatic_transfer_secs: 5 * DAY,
        }
    }
}

/// Grace-period lengths and prices for one TLD.
///
/// Durations are seconds; costs are minor currency units per registration
/// year.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TldPolicy {
    pub add_grace_period_secs: i64,
    pub renew_grace_period_secs: i64,
    pub transfer_grace_period_secs: i64,
    pub autorenew_grace_period_secs: i64,
    pub redemption_grace_period_secs: i64,
    pub pending_delete_secs: i64,
    pub automatic_transfer_secs: i64,
    pub currency: String,
    pub create_cost: i64,
    pub renew_cost: i64,
    pub transfer_cost: i64,
}

impl Default for TldPolicy {
    fn default() -> Self {
        Self {
            add_grace_period_secs: 5 * DAY,
            renew_grace_period_secs: 5 * DAY,
            transfer_grace_period_secs: 5 * DAY,
            autorenew_grace_period_secs: 45 * DAY,
            redemption_grace_period_secs: 30 * DAY,
            pending_delete_secs: 5 * DAY,
            automatic_transfer_secs: 5 * DAY,
            currency: "USD".to_string(),
            create_cost: 1_300,
            renew_cost: 1_100,
            transfer_cost: 1_100,
        }
    }
}

impl Config {
    /// Policy for a TLD, if the registry serves it.
    pub fn tld(&self, tld: &str) -> Option<&TldPolicy> {
        self.tlds.get(tld)
    }

    /// Longest configured TLD that `name` is a strict subdomain of.
    pub fn matching_tld(&self, name: &str) -> Option<&str> {
        self.tlds
            .keys()
            .filter(|tld| {
                name.len() > tld.len() + 1
                    && name.ends_with(tld.as_str())
                    && name.as_bytes()[name.len() - tld.len() - 1] == b'.'
            })
            .max_by_key(|tld| tld.len())
            .map(String::as_str)
    }

    /// Convenience for tests and single-TLD deployments.
    #[must_use]
    pub fn with_tld(mut self, tld: &str, policy: TldPolicy) -> Self {
        self.tlds.insert(tld.to_string(), policy);
        self
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    // Load explicit config
    if let Some(path) = explicit {
        let overlay = load_config_file(path)?;
        merge_config(&mut config, overlay);
    }

    // Apply environment overrides
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        .map(|p| p.join("registry").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    if overlay.server.database_path.is_some() {
        base.server.database_path = overlay.server.database_path;
    }
    base.server.log_level = overlay.server.log_level;
    base.server.log_json = overlay.server.log_json;

    base.session = overlay.session;
    base.retry = overlay.retry;
    base.contacts = overlay.contacts;

    base.tlds.extend(overlay.tlds);
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("REGISTRY_DATABASE_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("REGISTRY_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Ok(val) = std::env::var("REGISTRY_MAX_FAILED_LOGINS") {
        if let Ok(n) = val.parse() {
            config.session.max_failed_logins = n;
        }
    }
    if let Ok(val) = std::env::var("REGISTRY_RETRY_MAX_ATTEMPTS") {
        if let Ok(n) = val.parse() {
            config.retry.max_attempts = n;
        }
    }
}
