use std::{env, path::PathBuf};

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CODE_LENGTH: usize = 7;
const DEFAULT_SESSION_TTL_DAYS: i64 = 7;

pub const MIN_GENERATED_CODE_LENGTH: usize = 4;
pub const MAX_GENERATED_CODE_LENGTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub kvs_url: Option<String>,
    pub public_base_url: String,
    pub code_length: usize,
    pub session_ttl_days: i64,
    pub cookie_secure: bool,
    pub cors_origins: Vec<String>,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn read_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match var("SERVER_PORT") {
            Some(port) => parse("SERVER_PORT", &port)?,
            None => DEFAULT_PORT,
        };

        let code_length = match var("CODE_LENGTH") {
            Some(length) => parse("CODE_LENGTH", &length)?,
            None => DEFAULT_CODE_LENGTH,
        };
        if !(MIN_GENERATED_CODE_LENGTH..=MAX_GENERATED_CODE_LENGTH).contains(&code_length) {
            return Err(ConfigError::Invalid {
                key: "CODE_LENGTH",
                reason: format!(
                    "must be between {MIN_GENERATED_CODE_LENGTH} and {MAX_GENERATED_CODE_LENGTH}"
                ),
            });
        }

        let session_ttl_days = match var("SESSION_TTL_DAYS") {
            Some(days) => parse("SESSION_TTL_DAYS", &days)?,
            None => DEFAULT_SESSION_TTL_DAYS,
        };
        if session_ttl_days <= 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_DAYS",
                reason: "must be positive".to_string(),
            });
        }

        let public_base_url = var("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&public_base_url).map_err(|error| ConfigError::Invalid {
            key: "PUBLIC_BASE_URL",
            reason: error.to_string(),
        })?;

        Ok(Config {
            port,
            database_url: var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            kvs_url: var("KVS_URL"),
            public_base_url,
            code_length,
            session_ttl_days,
            cookie_secure: match var("COOKIE_SECURE") {
                Some(secure) => parse("COOKIE_SECURE", &secure)?,
                None => false,
            },
            cors_origins: var("CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            static_dir: var("STATIC_DIR").map(PathBuf::from),
        })
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|error: T::Err| ConfigError::Invalid {
            key,
            reason: error.to_string(),
        })
}
