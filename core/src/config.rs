//! Client configuration resolved from environment variables.
//!
//! Each deployment environment (`dev`, `stg`, `prd`) has a preset; individual
//! variables override the preset. `from_lookup` takes the variable source as a
//! function so tests never mutate the process environment.

use std::str::FromStr;
use std::time::Duration;

use crate::envelope::EnvelopePolicy;
use crate::error::ApiError;

pub const DEFAULT_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_TOKEN_PREFIX: &str = "Token ";
pub const DEFAULT_MOCK_DELAY_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Stg,
    Prd,
}

impl FromStr for Environment {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "stg" => Ok(Environment::Stg),
            "prd" => Ok(Environment::Prd),
            other => Err(ApiError::Config(format!("unknown CONSOLE_ENV: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub environment: Environment,
    /// Real backend base address, without a trailing slash.
    pub base_api: String,
    /// Mock backend base address, without a trailing slash.
    pub mock_api: String,
    /// Send calls to `mock_api` instead of `base_api`.
    pub use_mock_backend: bool,
    pub timeout: Duration,
    /// Prepended to the token in the `Authorization` header.
    pub token_prefix: String,
    pub mock_delay: Duration,
    pub envelope: EnvelopePolicy,
}

impl Config {
    pub fn preset(environment: Environment) -> Self {
        Self {
            environment,
            base_api: "/api".to_string(),
            mock_api: "/mock-api".to_string(),
            use_mock_backend: environment == Environment::Dev,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            mock_delay: Duration::from_millis(DEFAULT_MOCK_DELAY_MS),
            envelope: EnvelopePolicy::default(),
        }
    }

    /// Staging preset pointed at one backend for both modes.
    pub fn for_backend(base_api: &str) -> Self {
        let base_api = base_api.trim_end_matches('/').to_string();
        Self {
            mock_api: base_api.clone(),
            base_api,
            use_mock_backend: false,
            ..Self::preset(Environment::Stg)
        }
    }

    /// Build from the process environment.
    ///
    /// Required:
    /// - `CONSOLE_BASE_API`: absolute `http(s)://` base address. The presets'
    ///   relative paths only resolve against a browser origin.
    ///
    /// Optional:
    /// - `CONSOLE_ENV`: `dev`, `stg` (default) or `prd`
    /// - `CONSOLE_MOCK_API`: absolute mock base address, defaults to
    ///   `CONSOLE_BASE_API`
    /// - `CONSOLE_MOCK`: `true`/`false`, default `true` in `dev` only
    /// - `CONSOLE_TIMEOUT_MS`: default 8000
    /// - `CONSOLE_TOKEN_PREFIX`: default `"Token "`
    /// - `CONSOLE_MOCK_DELAY_MS`: default 10
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("CONSOLE_ENV") {
            Some(raw) => raw.parse()?,
            None => Environment::Stg,
        };
        let mut config = Self::preset(environment);

        let base = lookup("CONSOLE_BASE_API")
            .ok_or_else(|| ApiError::Config("CONSOLE_BASE_API is not set".to_string()))?;
        config.base_api = absolute_url("CONSOLE_BASE_API", &base)?;
        config.mock_api = match lookup("CONSOLE_MOCK_API") {
            Some(mock) => absolute_url("CONSOLE_MOCK_API", &mock)?,
            None => config.base_api.clone(),
        };
        if let Some(raw) = lookup("CONSOLE_MOCK") {
            config.use_mock_backend = parse_bool("CONSOLE_MOCK", &raw)?;
        }
        if let Some(raw) = lookup("CONSOLE_TIMEOUT_MS") {
            config.timeout = Duration::from_millis(parse_u64("CONSOLE_TIMEOUT_MS", &raw)?);
        }
        if let Some(prefix) = lookup("CONSOLE_TOKEN_PREFIX") {
            config.token_prefix = prefix;
        }
        if let Some(raw) = lookup("CONSOLE_MOCK_DELAY_MS") {
            config.mock_delay = Duration::from_millis(parse_u64("CONSOLE_MOCK_DELAY_MS", &raw)?);
        }

        Ok(config)
    }
}

fn absolute_url(key: &str, raw: &str) -> Result<String, ApiError> {
    let url = raw.trim().trim_end_matches('/');
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or_default();
    if rest.is_empty() || rest.starts_with('/') {
        return Err(ApiError::Config(format!("{key}: expected an absolute http(s) URL, got {raw}")));
    }
    Ok(url.to_string())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ApiError> {
    match raw.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(ApiError::Config(format!("{key}: expected true/false, got {other}"))),
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::Config(format!("{key}: expected an integer, got {raw}")))
}
