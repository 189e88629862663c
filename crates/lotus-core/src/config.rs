//! Lotus configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LotusError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotusConfig {
    #[serde(default = "default_studio_name")]
    pub studio_name: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

fn default_studio_name() -> String { "Lotus Yoga Studio".into() }
fn default_database_path() -> String { "~/.lotus/lotus.db".into() }

impl Default for LotusConfig {
    fn default() -> Self {
        Self {
            studio_name: default_studio_name(),
            database_path: default_database_path(),
            gateway: GatewayConfig::default(),
            scheduler: SchedulerConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

impl LotusConfig {
    /// Load config from `LOTUS_CONFIG` or the default path, falling back to
    /// defaults when no file exists. Environment secrets are applied last.
    pub fn load() -> Result<Self> {
        let path = std::env::var("LOTUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LotusError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| LotusError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LotusError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override secrets from the environment. `lookup` is injected so tests
    /// don't touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("TWILIO_ACCOUNT_SID") {
            self.whatsapp.account_sid = v;
        }
        if let Some(v) = get("TWILIO_AUTH_TOKEN") {
            self.whatsapp.auth_token = v;
        }
        if let Some(v) = get("TWILIO_WHATSAPP_NUMBER") {
            self.whatsapp.from_number = v;
        }
        if let Some(v) = get("RESEND_API_KEY") {
            self.email.api_key = v;
        }
        if let Some(v) = get("LOTUS_API_KEY") {
            self.gateway.api_key = Some(v);
        }
        if let Some(v) = get("LOTUS_DATABASE") {
            self.database_path = v;
        }
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.database_path)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Lotus home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lotus")
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// When set, every non-public route requires `X-Api-Key`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// URL of the public lead form, used as the default QR target.
    #[serde(default = "default_form_url")]
    pub public_form_url: String,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3000 }
fn default_form_url() -> String { "http://localhost:3000/".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
            public_form_url: default_form_url(),
        }
    }
}

/// Automation scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Rows drained per queue run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inactive_days")]
    pub inactive_days: i64,
    /// No re-engagement if any message was queued within this window.
    #[serde(default = "default_cooldown_days")]
    pub reengagement_cooldown_days: i64,
    /// `new` leads older than this become `lost`.
    #[serde(default = "default_lead_expiry_days")]
    pub lead_expiry_days: i64,
}

fn bool_true() -> bool { true }
fn default_interval_secs() -> u64 { 300 }
fn default_batch_size() -> usize { 10 }
fn default_inactive_days() -> i64 { 90 }
fn default_cooldown_days() -> i64 { 30 }
fn default_lead_expiry_days() -> i64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            inactive_days: default_inactive_days(),
            reengagement_cooldown_days: default_cooldown_days(),
            lead_expiry_days: default_lead_expiry_days(),
        }
    }
}

/// WhatsApp delivery through the Twilio Messages API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    /// Sender, e.g. `whatsapp:+14155238886`.
    #[serde(default)]
    pub from_number: String,
    /// Override for tests and proxies; defaults to the public Twilio API.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl WhatsAppConfig {
    pub fn is_configured(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty() && !self.from_number.is_empty()
    }
}

/// Which transport carries email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    #[default]
    Resend,
    Smtp,
}

/// Email delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub provider: EmailProvider,
    /// Resend API key.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
}

fn default_from_address() -> String { "Lotus Yoga Studio <noreply@lotusyoga.studio>".into() }
fn default_smtp_port() -> u16 { 587 }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: EmailProvider::Resend,
            api_key: String::new(),
            from_address: default_from_address(),
            api_base: None,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = LotusConfig::from_toml("").unwrap();
        assert_eq!(cfg.scheduler.batch_size, 10);
        assert_eq!(cfg.scheduler.inactive_days, 90);
        assert_eq!(cfg.gateway.port, 3000);
        assert_eq!(cfg.email.provider, EmailProvider::Resend);
        assert!(!cfg.whatsapp.is_configured());
    }

    #[test]
    fn test_partial_sections() {
        let cfg = LotusConfig::from_toml(
            r#"
            studio_name = "Talo"
            [scheduler]
            batch_size = 25
            [email]
            provider = "smtp"
            smtp_host = "smtp.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.studio_name, "Talo");
        assert_eq!(cfg.scheduler.batch_size, 25);
        assert_eq!(cfg.scheduler.lead_expiry_days, 30);
        assert_eq!(cfg.email.provider, EmailProvider::Smtp);
        assert_eq!(cfg.email.smtp_port, 587);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut cfg = LotusConfig::from_toml("[whatsapp]\naccount_sid = \"file-sid\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "tok"),
            ("TWILIO_WHATSAPP_NUMBER", "whatsapp:+100"),
            ("RESEND_API_KEY", ""),
        ]
        .into_iter()
        .collect();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.whatsapp.account_sid, "AC123");
        assert!(cfg.whatsapp.is_configured());
        // Blank env values don't clobber the file.
        assert!(cfg.email.api_key.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("lotus-cfg-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut cfg = LotusConfig::default();
        cfg.gateway.port = 8088;
        cfg.save_to(&path).unwrap();
        let loaded = LotusConfig::load_from(&path).unwrap();
        assert_eq!(loaded.gateway.port, 8088);
        std::fs::remove_dir_all(&dir).ok();
    }
}
