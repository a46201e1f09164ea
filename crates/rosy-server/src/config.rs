//! Server configuration, read from the environment (and `.env`).
//!
//! ```bash
//! ROSY_HOST=0.0.0.0
//! ROSY_PORT=4000
//! ROSY_DB_PATH=rosy.db
//! ROSY_UPLOAD_DIR=./uploads
//! ROSY_JWT_SECRET=...
//!
//! # Classifier; offline unless both URL and key are set
//! ROSY_CLASSIFIER_URL=https://api.openai.com/v1/chat/completions
//! ROSY_CLASSIFIER_KEY=sk-...
//! ROSY_CLASSIFIER_MODEL=gpt-4o-mini
//! ROSY_CLASSIFIER_TIMEOUT_SECS=20
//! ROSY_OFFLINE_MODE=random        # or deterministic
//!
//! # Mail; codes are only logged unless a host is set
//! ROSY_SMTP_HOST=smtp.gmail.com
//! ROSY_SMTP_PORT=587
//! ROSY_SMTP_USERNAME=...
//! ROSY_SMTP_PASSWORD=...
//! ROSY_SMTP_TLS=true
//! ROSY_MAIL_FROM=noreply@rosyscan.id
//!
//! ROSY_CODE_MAX_ATTEMPTS=5
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use rosy_api::codes::DEFAULT_MAX_ATTEMPTS;
use rosy_api::mailer::SmtpConfig;
use rosy_classifier::{ClassifierConfig, OfflineMode};
use rosy_classifier::gateway::{DEFAULT_MODEL, DEFAULT_TIMEOUT};

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },

    #[error("{0}")]
    OfflineMode(String),

    #[error("ROSY_MAIL_FROM is required when ROSY_SMTP_HOST is set")]
    MissingFromAddress,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
    pub classifier: ClassifierConfig,
    pub offline_mode: OfflineMode,
    /// `None` means the development log mailer.
    pub smtp: Option<SmtpConfig>,
    pub code_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("ROSY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = parse_var("ROSY_PORT", 4000)?;
        let db_path = env::var("ROSY_DB_PATH")
            .unwrap_or_else(|_| "rosy.db".into())
            .into();
        let upload_dir = env::var("ROSY_UPLOAD_DIR")
            .unwrap_or_else(|_| "./uploads".into())
            .into();
        let jwt_secret = env::var("ROSY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let classifier = ClassifierConfig {
            endpoint: non_empty("ROSY_CLASSIFIER_URL"),
            api_key: non_empty("ROSY_CLASSIFIER_KEY"),
            model: env::var("ROSY_CLASSIFIER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            timeout: Duration::from_secs(parse_var(
                "ROSY_CLASSIFIER_TIMEOUT_SECS",
                DEFAULT_TIMEOUT.as_secs(),
            )?),
        };
        let offline_mode = match env::var("ROSY_OFFLINE_MODE") {
            Ok(v) => v.parse().map_err(ConfigError::OfflineMode)?,
            Err(_) => OfflineMode::default(),
        };

        Ok(Self {
            host,
            port,
            db_path,
            upload_dir,
            jwt_secret,
            classifier,
            offline_mode,
            smtp: smtp_from_env()?,
            code_max_attempts: parse_var("ROSY_CODE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret.is_empty() || self.jwt_secret == DEV_JWT_SECRET
    }
}

fn smtp_from_env() -> Result<Option<SmtpConfig>, ConfigError> {
    let Some(host) = non_empty("ROSY_SMTP_HOST") else {
        return Ok(None);
    };
    let from = non_empty("ROSY_MAIL_FROM").ok_or(ConfigError::MissingFromAddress)?;
    Ok(Some(SmtpConfig {
        host,
        port: parse_var("ROSY_SMTP_PORT", 587)?,
        username: non_empty("ROSY_SMTP_USERNAME"),
        password: non_empty("ROSY_SMTP_PASSWORD"),
        from,
        use_tls: env::var("ROSY_SMTP_TLS")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true),
    }))
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}
