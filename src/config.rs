// ⚙️ Configuration - JSON file (FEES_CONFIG) then FEES_* environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::db::DEFAULT_MONTHLY_FEE;

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub monthly_fee: f64,
    pub credentials_path: PathBuf,
    pub session_path: PathBuf,
    pub server_addr: String,

    /// How long an API bearer token stays valid
    pub session_ttl_hours: i64,

    /// JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("membership_fees.db"),
            monthly_fee: DEFAULT_MONTHLY_FEE,
            credentials_path: PathBuf::from("credentials.json"),
            session_path: PathBuf::from(".membership_fees_session.json"),
            server_addr: "0.0.0.0:3000".to_string(),
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Defaults, then the file named by FEES_CONFIG (if set), then env vars
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FEES_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Override fields from `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FEES_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(fee) = lookup("FEES_MONTHLY_FEE") {
            self.monthly_fee = fee
                .trim()
                .parse()
                .with_context(|| format!("FEES_MONTHLY_FEE is not a number: {}", fee))?;
        }
        if let Some(path) = lookup("FEES_CREDENTIALS") {
            self.credentials_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("FEES_SESSION") {
            self.session_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("FEES_SERVER_ADDR") {
            self.server_addr = addr;
        }
        if let Some(hours) = lookup("FEES_SESSION_TTL_HOURS") {
            self.session_ttl_hours = hours
                .trim()
                .parse()
                .with_context(|| format!("FEES_SESSION_TTL_HOURS is not a number: {}", hours))?;
        }
        if let Some(flag) = lookup("FEES_JSON_LOGS") {
            self.json_logs = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if !self.monthly_fee.is_finite() || self.monthly_fee <= 0.0 {
            anyhow::bail!("monthly fee must be positive, got {}", self.monthly_fee);
        }
        if self.session_ttl_hours <= 0 {
            anyhow::bail!("session TTL must be positive, got {} hours", self.session_ttl_hours);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.monthly_fee, 3000.0);
        assert_eq!(config.database_path, PathBuf::from("membership_fees.db"));
        assert!(!config.json_logs);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("FEES_DB_PATH", "/tmp/fees.db"),
                ("FEES_MONTHLY_FEE", " 3500 "),
                ("FEES_JSON_LOGS", "true"),
                ("FEES_SERVER_ADDR", "127.0.0.1:8080"),
                ("FEES_SESSION_TTL_HOURS", "2"),
            ]))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/fees.db"));
        assert_eq!(config.monthly_fee, 3500.0);
        assert!(config.json_logs);
        assert_eq!(config.server_addr, "127.0.0.1:8080");
        assert_eq!(config.session_ttl_hours, 2);
        assert_eq!(config.session_path, PathBuf::from(".membership_fees_session.json"));
    }

    #[test]
    fn test_invalid_fee_rejected() {
        let mut config = AppConfig::default();
        assert!(config
            .apply_overrides(lookup_from(&[("FEES_MONTHLY_FEE", "tres mil")]))
            .is_err());

        let mut config = AppConfig::default();
        assert!(config
            .apply_overrides(lookup_from(&[("FEES_MONTHLY_FEE", "-1")]))
            .is_err());

        let mut config = AppConfig::default();
        assert!(config
            .apply_overrides(lookup_from(&[("FEES_SESSION_TTL_HOURS", "0")]))
            .is_err());
    }

    #[test]
    fn test_partial_config_file() {
        let path = std::env::temp_dir().join(format!("fees-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{ "monthly_fee": 4000, "json_logs": true }"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.monthly_fee, 4000.0);
        assert!(config.json_logs);
        assert_eq!(config.server_addr, "0.0.0.0:3000");

        std::fs::remove_file(&path).ok();
    }
}
