//! Service configuration.
//!
//! Settings come from an optional RON file, then environment variables
//! override individual fields:
//!
//! ```ron
//! (
//!     smtp: (
//!         host: "smtp.example.com",
//!         port: 587,
//!         username: "noreply@example.com",
//!         password: "secret",
//!     ),
//!     dispatch: (
//!         workers: 5,
//!         queue_capacity: 100,
//!         backpressure: block,
//!     ),
//! )
//! ```

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use mailer_dispatch::{BackpressurePolicy, DispatchConfig, DispatchError, SmtpTransportConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Points at the config file to use.
pub const CONFIG_ENV: &str = "MAILER_CONFIG";

/// Searched in order when neither `--config` nor `MAILER_CONFIG` is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./mailer.config.ron", "/etc/mailer/mailer.config.ron"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("{var} points to non-existent file: {}", path.display())]
    Missing { var: &'static str, path: PathBuf },

    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailerConfig {
    #[serde(default)]
    pub smtp: SmtpTransportConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl MailerConfig {
    /// Parse a RON document. Missing fields take their defaults.
    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_ron(&content)
    }

    /// Build the effective configuration from the process environment.
    ///
    /// The file is `path` if given, otherwise whatever [`locate`] finds; with
    /// no file at all the defaults are used. Environment overrides are applied
    /// last and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |var| std::env::var(var).ok())
    }

    /// [`MailerConfig::load`] with an explicit environment.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => locate(&lookup)?,
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(lookup)?;
        config.validate()?;

        Ok(config)
    }

    /// Override fields from environment variables.
    ///
    /// Unset variables leave the field alone; set but unparsable ones are an
    /// error rather than silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let smtp = &mut self.smtp;
        let dispatch = &mut self.dispatch;

        if let Some(host) = lookup("SMTP_HOST") {
            smtp.host = host;
        }
        if let Some(port) = env_parse::<u16>(&lookup, "SMTP_PORT")? {
            smtp.port = port;
        }
        if let Some(username) = lookup("SMTP_USERNAME") {
            smtp.username = username;
        }
        if let Some(password) = lookup("SMTP_PASSWORD") {
            smtp.password = password;
        }
        if let Some(from) = lookup("SMTP_FROM") {
            smtp.from = Some(from);
        }
        if let Some(value) = lookup("SMTP_INSECURE_SKIP_VERIFY") {
            smtp.accept_invalid_certs = parse_bool("SMTP_INSECURE_SKIP_VERIFY", &value)?;
        }

        if let Some(workers) = env_parse(&lookup, "MAILER_WORKERS")? {
            dispatch.workers = workers;
        }
        if let Some(capacity) = env_parse(&lookup, "MAILER_QUEUE_CAPACITY")? {
            dispatch.queue_capacity = capacity;
        }
        if let Some(retries) = env_parse(&lookup, "MAILER_MAX_RETRIES")? {
            dispatch.max_retries = retries;
        }
        if let Some(delay) = env_parse(&lookup, "MAILER_RETRY_DELAY_SECS")? {
            dispatch.retry_delay_secs = delay;
        }
        if let Some(policy) = env_parse::<BackpressurePolicy>(&lookup, "MAILER_BACKPRESSURE")? {
            dispatch.backpressure = policy;
        }

        Ok(())
    }

    /// Reject settings the service cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp.host.trim().is_empty() {
            return Err(ConfigError::Invalid("smtp.host must be set".to_string()));
        }

        if self.smtp.port == 0 {
            return Err(ConfigError::Invalid("smtp.port must not be 0".to_string()));
        }

        if self.smtp.from_address().is_empty() {
            return Err(ConfigError::Invalid(
                "one of smtp.from or smtp.username must be set".to_string(),
            ));
        }

        self.dispatch.validate()?;

        Ok(())
    }

    /// A copy that is safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.smtp.password.is_empty() {
            config.smtp.password = "<redacted>".to_string();
        }
        config
    }
}

/// Find the config file: `MAILER_CONFIG` first, then [`DEFAULT_CONFIG_PATHS`].
///
/// Having no file is fine. `MAILER_CONFIG` naming a missing file is not.
pub fn locate<F>(lookup: F) -> Result<Option<PathBuf>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(CONFIG_ENV).map(PathBuf::from) {
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::Missing {
            var: CONFIG_ENV,
            path,
        });
    }

    Ok(DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}

fn env_parse<T>(
    lookup: impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(var)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|err: T::Err| ConfigError::InvalidEnv {
                    var,
                    reason: err.to_string(),
                    value,
                })
        })
        .transpose()
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
