//! Application configuration, resolved from environment variables.
//!
//! Every credential and tunable comes from the environment (a `.env` file is
//! loaded by the binary before this runs). Required variables missing at
//! startup are fatal; optional ones fall back to defaults. Parent
//! directories for the audit store and log file are created at load time.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::model::ActionType;

// ── Sections ────────────────────────────────────────────────────────

/// OAuth credential triple for the mailbox provider.
#[derive(Debug, Clone)]
pub struct GmailAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

/// Classifier provider settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: SecretString,
    pub model: String,
}

/// SMTP fallback transport settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Fixed action→team address routing.
#[derive(Debug, Clone)]
pub struct TeamRouting {
    pub backend: String,
    pub code: String,
    pub rehit: String,
}

impl TeamRouting {
    /// Resolve the team address for an action. `None` (and any future
    /// unknown value) falls back to the backend team.
    pub fn address_for(&self, action: Option<ActionType>) -> &str {
        match action {
            Some(ActionType::ReHit) => &self.rehit,
            Some(ActionType::Backend) => &self.backend,
            Some(ActionType::Code) => &self.code,
            None => &self.backend,
        }
    }

    /// Default recipient for error notifications and failed records.
    pub fn default_team(&self) -> &str {
        &self.backend
    }
}

/// Batch, interval, and retry tunables.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub check_interval_minutes: u64,
    pub max_emails_per_batch: usize,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

/// Logging destination settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub file: PathBuf,
}

// ── AppConfig ───────────────────────────────────────────────────────

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gmail: GmailAuthConfig,
    pub llm: LlmSettings,
    pub smtp: SmtpConfig,
    /// Prefer SMTP over the mailbox API for outbound mail.
    pub smtp_fallback: bool,
    pub teams: TeamRouting,
    pub audit_path: PathBuf,
    pub log: LogConfig,
    pub processing: ProcessingConfig,
}

impl AppConfig {
    /// Build configuration from the environment. Fails on the first missing
    /// required variable or unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let gmail = GmailAuthConfig {
            client_id: required("GMAIL_CLIENT_ID")?,
            client_secret: required("GMAIL_CLIENT_SECRET")?.into(),
            refresh_token: required("GMAIL_REFRESH_TOKEN")?.into(),
        };

        let llm = LlmSettings {
            api_key: required("GEMINI_API_KEY")?.into(),
            model: optional("GEMINI_MODEL", "gemini-pro"),
        };

        let smtp = SmtpConfig {
            server: optional("SMTP_SERVER", "smtp.gmail.com"),
            port: parsed("SMTP_PORT", 587)?,
            username: required("SMTP_USERNAME")?,
            password: required("SMTP_PASSWORD")?.into(),
        };

        let teams = TeamRouting {
            backend: required("BACKEND_TEAM_EMAIL")?,
            code: required("CODE_TEAM_EMAIL")?,
            rehit: required("REHIT_TEAM_EMAIL")?,
        };

        let config = Self {
            gmail,
            llm,
            smtp,
            smtp_fallback: parsed("SMTP_FALLBACK", false)?,
            teams,
            audit_path: PathBuf::from(optional("DATABASE_PATH", "data/processed_emails.csv")),
            log: LogConfig {
                level: optional("LOG_LEVEL", "info"),
                file: PathBuf::from(optional("LOG_FILE", "logs/alertiq.log")),
            },
            processing: ProcessingConfig {
                check_interval_minutes: parsed("CHECK_INTERVAL_MINUTES", 5)?,
                max_emails_per_batch: parsed("MAX_EMAILS_PER_BATCH", 10)?,
                retry_attempts: parsed("RETRY_ATTEMPTS", 3)?,
                retry_delay_seconds: parsed("RETRY_DELAY_SECONDS", 5)?,
            },
        };

        config.ensure_dirs()?;
        Ok(config)
    }

    /// Create parent directories for the audit store and log file.
    fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for path in [&self.audit_path, &self.log.file] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Team address for an action, defaulting to the backend team.
    pub fn get_team_email(&self, action: Option<ActionType>) -> &str {
        self.teams.address_for(action)
    }

    /// Directory and file-name pair for the rolling log appender.
    pub fn log_split(&self) -> (PathBuf, String) {
        let dir = self
            .log
            .file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let name = self
            .log
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "alertiq.log".to_string());
        (dir, name)
    }
}

// ── Env helpers ─────────────────────────────────────────────────────

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        }
        _ => Ok(default),
    }
}
