use std::env;
use std::time::Duration;
use hyper::Uri;
use thiserror::Error;
use crate::services::proxy::ProxyRoute;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_JWT_SECRET: &str = "change-me-in-production";
pub const RATE_LIMIT_REQUESTS: u32 = 100; // requests per window
pub const RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60; // window size in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const MAX_JSON_BODY_BYTES: u64 = 16 * 1024;
pub const MAX_PROXY_BODY_BYTES: u64 = 100 * 1024 * 1024; // APK uploads
pub const MAX_JWT_EXPIRATION_SECS: u64 = 10 * 365 * 24 * 60 * 60; // ten years

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: &'static str) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason,
        }
    }
}

/// Gateway settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expiration: Duration,
    pub apk_analyzer_url: String,
    pub github_analyzer_url: String,
    pub ai_service_url: String,
    pub report_service_url: String,
    /// Allowed CORS origins. `*` allows any origin.
    pub cors_origins: Vec<String>,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub proxy_timeout: Duration,
    /// Largest request body forwarded to a backend, declared or streamed.
    pub max_upload_bytes: u64,
    /// Key rate limits on `x-forwarded-for` instead of the socket peer.
    /// Only safe when a reverse proxy in front of the gateway sets that header.
    pub trust_proxy: bool,
    pub bcrypt_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expiration: Duration::from_secs(24 * 60 * 60), // 24h
            apk_analyzer_url: "http://localhost:8001".to_string(),
            github_analyzer_url: "http://localhost:8002".to_string(),
            ai_service_url: "http://localhost:8003".to_string(),
            report_service_url: "http://localhost:8004".to_string(),
            cors_origins: vec!["*".to_string()],
            rate_limit_max: RATE_LIMIT_REQUESTS,
            rate_limit_window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            proxy_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            max_upload_bytes: MAX_PROXY_BODY_BYTES,
            trust_proxy: false,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("PORT", &port, "expected a port number"))?;
        }

        if let Some(secret) = var("JWT_SECRET") {
            config.jwt_secret = secret;
        }

        if let Some(expiration) = var("JWT_EXPIRATION") {
            config.jwt_expiration = parse_duration(&expiration).ok_or_else(|| {
                ConfigError::invalid("JWT_EXPIRATION", &expiration, "expected e.g. 3600, 30m, 24h or 7d, at most 3650d")
            })?;
        }

        if let Some(url) = var("APK_ANALYZER_URL") {
            config.apk_analyzer_url = parse_service_url("APK_ANALYZER_URL", &url)?;
        }
        if let Some(url) = var("GITHUB_ANALYZER_URL") {
            config.github_analyzer_url = parse_service_url("GITHUB_ANALYZER_URL", &url)?;
        }
        if let Some(url) = var("AI_SERVICE_URL") {
            config.ai_service_url = parse_service_url("AI_SERVICE_URL", &url)?;
        }
        if let Some(url) = var("REPORT_SERVICE_URL") {
            config.report_service_url = parse_service_url("REPORT_SERVICE_URL", &url)?;
        }

        if let Some(origins) = var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        if let Some(max) = var("RATE_LIMIT_MAX") {
            config.rate_limit_max = max
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|m| *m > 0)
                .ok_or_else(|| ConfigError::invalid("RATE_LIMIT_MAX", &max, "expected a positive integer"))?;
        }

        if let Some(window) = var("RATE_LIMIT_WINDOW_SECS") {
            config.rate_limit_window = window
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ConfigError::invalid("RATE_LIMIT_WINDOW_SECS", &window, "expected a positive number of seconds")
                })?;
        }

        if let Some(timeout) = var("PROXY_TIMEOUT_SECS") {
            config.proxy_timeout = timeout
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ConfigError::invalid("PROXY_TIMEOUT_SECS", &timeout, "expected a positive number of seconds")
                })?;
        }

        if let Some(limit) = var("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = limit
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::invalid("MAX_UPLOAD_BYTES", &limit, "expected a positive number of bytes"))?;
        }

        if let Some(trust) = var("TRUST_PROXY") {
            config.trust_proxy = match trust.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::invalid("TRUST_PROXY", &trust, "expected true or false")),
            };
        }

        if let Some(cost) = var("BCRYPT_COST") {
            config.bcrypt_cost = cost
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|c| (4..=31).contains(c))
                .ok_or_else(|| ConfigError::invalid("BCRYPT_COST", &cost, "expected 4..=31"))?;
        }

        Ok(config)
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }

    /// The backend services mounted under `/api`.
    pub fn routes(&self) -> Vec<ProxyRoute> {
        vec![
            ProxyRoute::new("apk", "/api/apk", &self.apk_analyzer_url, "/api"),
            ProxyRoute::new("github", "/api/github", &self.github_analyzer_url, "/api"),
            ProxyRoute::new("ai", "/api/ai", &self.ai_service_url, "/api"),
            ProxyRoute::new("reports", "/api/reports", &self.report_service_url, "/api/reports"),
        ]
    }
}

/// Parse `JWT_EXPIRATION` style durations: `3600`, `45s`, `30m`, `24h`, `7d`.
/// Zero and anything over [`MAX_JWT_EXPIRATION_SECS`] are rejected.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last()? {
        (i, 's') => (&value[..i], 1),
        (i, 'm') => (&value[..i], 60),
        (i, 'h') => (&value[..i], 60 * 60),
        (i, 'd') => (&value[..i], 24 * 60 * 60),
        _ => (value, 1),
    };

    let amount: u64 = digits.trim().parse().ok()?;
    let secs = amount.checked_mul(multiplier)?;
    if secs == 0 || secs > MAX_JWT_EXPIRATION_SECS {
        return None;
    }
    Some(Duration::from_secs(secs))
}

fn parse_service_url(var: &'static str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    let uri: Uri = trimmed
        .parse()
        .map_err(|_| ConfigError::invalid(var, value, "not a valid URL"))?;

    // The upstream client speaks plain HTTP only.
    if uri.scheme_str() != Some("http") {
        return Err(ConfigError::invalid(var, value, "expected an http:// URL"));
    }
    if uri.authority().is_none() {
        return Err(ConfigError::invalid(var, value, "missing host"));
    }

    Ok(trimmed.to_string())
}
