/// `load_config` module: loads a static YAML config and injects secrets from the environment
/// into the [`AppConfig`] value handed to every component constructor.
///
/// # Responsibilities
/// - Parse the optional YAML file (no secrets) into typed sections with defaults
/// - Read credentials, SMTP settings and recipients from the environment
/// - Fail fast, naming the missing variable, when a command needs a secret that is absent
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ddd_export_core::date_match::{DateBasis, DateMatcher};
use serde::Deserialize;
use tracing::{error, info};

use crate::mailer::SmtpSettings;
use crate::user_store::DEFAULT_STORE_PATH;
use crate::wialon::{ApiTimeouts, DEFAULT_BASE_URL};

pub const ENV_TOKEN: &str = "TOKEN";
pub const ENV_SMTP_SERVER: &str = "SMTP_SERVER";
pub const ENV_SMTP_PORT: &str = "SMTP_PORT";
pub const ENV_SMTP_USER: &str = "SMTP_USER";
pub const ENV_SMTP_PASS: &str = "SMTP_PASS";
pub const ENV_RECIPIENTS: &str = "RECIPIENTS";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub timeouts: ApiTimeouts,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeouts: ApiTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportSection {
    pub date_basis: DateBasis,
    /// Newest files shipped when nothing matches the date; unset ships nothing.
    pub fallback_recent: Option<usize>,
    pub concurrency: usize,
    pub catalog_cache_ttl_secs: u64,
    /// Login name whose created vehicles are listed first.
    pub owner: Option<String>,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            date_basis: DateBasis::Utc,
            fallback_recent: None,
            concurrency: 1,
            catalog_cache_ttl_secs: 600,
            owner: None,
        }
    }
}

impl ExportSection {
    pub fn matcher(&self) -> DateMatcher {
        DateMatcher::new(self.date_basis)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmtpSection {
    pub host: String,
    pub port: u16,
}

impl Default for SmtpSection {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreSection {
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StaticConfig {
    api: ApiSection,
    export: ExportSection,
    smtp: SmtpSection,
    store: StoreSection,
}

/// Values taken from the environment. Never read from the YAML file.
#[derive(Default, Clone)]
pub struct Secrets {
    pub token: Option<String>,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<String>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub recipients: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("token_set", &self.token.is_some())
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_pass_set", &self.smtp_pass.is_some())
            .field("recipients", &self.recipients)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiSection,
    pub export: ExportSection,
    pub smtp: SmtpSection,
    pub store: StoreSection,
    pub secrets: Secrets,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v.clone()),
        None => {
            error!(var = name, "Required environment variable not set");
            anyhow::bail!("{name} environment variable not set")
        }
    }
}

impl AppConfig {
    pub fn require_token(&self) -> Result<String> {
        required(&self.secrets.token, ENV_TOKEN)
    }

    pub fn require_recipients(&self) -> Result<String> {
        required(&self.secrets.recipients, ENV_RECIPIENTS)
    }

    pub fn smtp_settings(&self) -> Result<SmtpSettings> {
        Ok(SmtpSettings {
            host: self.smtp.host.clone(),
            port: self.smtp.port,
            user: required(&self.secrets.smtp_user, ENV_SMTP_USER)?,
            password: required(&self.secrets.smtp_pass, ENV_SMTP_PASS)?,
        })
    }

    /// Everything the unattended job needs, checked before any remote call.
    /// The relay must come from the environment here, not from file defaults.
    pub fn validate_headless(&self, needs_token: bool) -> Result<()> {
        if needs_token {
            self.require_token()?;
            self.require_recipients()?;
        }
        required(&self.secrets.smtp_server, ENV_SMTP_SERVER)?;
        required(&self.secrets.smtp_port, ENV_SMTP_PORT)?;
        self.smtp_settings()?;
        Ok(())
    }
}

/// Loads the optional YAML config file and injects environment secrets.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let static_conf = match path {
        Some(path_ref) => {
            info!(config_path = ?path_ref, "Loading configuration from file");
            let content = fs::read_to_string(path_ref).map_err(|e| {
                error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
                anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
            })?;
            match serde_yaml::from_str::<StaticConfig>(&content) {
                Ok(conf) => {
                    info!(config_path = ?path_ref, "Parsed config YAML successfully");
                    conf
                }
                Err(e) => {
                    error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                    return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
                }
            }
        }
        None => {
            info!("No config file given, using defaults");
            StaticConfig::default()
        }
    };

    let smtp_server = env_opt(ENV_SMTP_SERVER);
    let smtp_port = env_opt(ENV_SMTP_PORT);
    let mut smtp = static_conf.smtp;
    if let Some(host) = &smtp_server {
        smtp.host = host.clone();
    }
    if let Some(port) = &smtp_port {
        smtp.port = port
            .trim()
            .parse()
            .with_context(|| format!("{ENV_SMTP_PORT} must be a valid port number, got {port:?}"))?;
    }

    let secrets = Secrets {
        token: env_opt(ENV_TOKEN),
        smtp_server,
        smtp_port,
        smtp_user: env_opt(ENV_SMTP_USER),
        smtp_pass: env_opt(ENV_SMTP_PASS),
        recipients: env_opt(ENV_RECIPIENTS),
    };

    if static_conf.export.concurrency == 0 {
        anyhow::bail!("export.concurrency must be at least 1");
    }

    let config = AppConfig {
        api: static_conf.api,
        export: static_conf.export,
        smtp,
        store: static_conf.store,
        secrets,
    };
    info!(
        base_url = %config.api.base_url,
        smtp_host = %config.smtp.host,
        date_basis = ?config.export.date_basis,
        "Config loaded and merged successfully"
    );
    Ok(config)
}
