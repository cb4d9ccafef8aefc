use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("SESSION_SECRET must be at least {MIN_SESSION_SECRET_LEN} bytes long")]
    WeakSessionSecret,

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub openrouter_api_key: String,
    pub session_secret: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub max_upload_bytes: usize,
    pub database_url: Option<String>,
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let openrouter_api_key = required("OPENROUTER_API_KEY")?;
        let session_secret = required("SESSION_SECRET")?;
        if session_secret.len() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::WeakSessionSecret);
        }

        Ok(Self {
            openrouter_api_key,
            session_secret,
            port: parse_or(&lookup, "PORT", 3000)?,
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            llm_model: lookup("LLM_MODEL").unwrap_or_else(|| "openai/gpt-4.1-mini".to_string()),
            llm_timeout: Duration::from_secs(parse_or(&lookup, "LLM_TIMEOUT_SECS", 120)?),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?,
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            session_ttl: Duration::from_secs(parse_or(&lookup, "SESSION_TTL_SECS", 86_400)?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
