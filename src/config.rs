use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";

fn get_env(src: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    src(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_u64(src: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match get_env(src, key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<u64>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(src: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    get_env(src, key).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Server
    pub host: String,
    pub port: u16,
    pub allowed_origin: String,

    // Upstream
    pub coingecko_base_url: String,
    #[serde(skip_serializing)]
    pub coingecko_api_key: Option<String>,

    // Terminal client
    pub backend_url: String,
    pub poll_interval_secs: u64,
}

impl Settings {
    /// Loads `.env` (if present) and then the process environment.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("config.dotenv path={}", path.display());
        }
        Self::load_from(&|key: &str| env::var(key).ok())
    }

    fn load_from(src: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = get_env_u64(src, "PORT", 5000)?;
        let port = u16::try_from(port).map_err(|_| anyhow!("PORT out of range (got {port})"))?;

        let s = Self {
            host: get_env_string(src, "HOST", "0.0.0.0"),
            port,
            allowed_origin: get_env_string(src, "ALLOWED_ORIGIN", "http://localhost:5173"),
            coingecko_base_url: get_env_string(src, "COINGECKO_BASE_URL", DEFAULT_COINGECKO_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            coingecko_api_key: get_env(src, "COINGECKO_KEY_API"),
            backend_url: get_env_string(src, "BACKEND_URL", "http://localhost:5000")
                .trim_end_matches('/')
                .to_string(),
            poll_interval_secs: get_env_u64(src, "POLL_INTERVAL_SECS", 60)?,
        };

        s.validate()?;
        Ok(s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs < 1 {
            return Err(anyhow!(
                "POLL_INTERVAL_SECS must be >= 1 (got {})",
                self.poll_interval_secs
            ));
        }
        if self.allowed_origin.parse::<axum::http::HeaderValue>().is_err() {
            return Err(anyhow!(
                "ALLOWED_ORIGIN is not a valid header value (got {})",
                self.allowed_origin
            ));
        }
        if !self.coingecko_base_url.starts_with("http") {
            return Err(anyhow!(
                "COINGECKO_BASE_URL must be an http(s) url (got {})",
                self.coingecko_base_url
            ));
        }
        if !self.backend_url.starts_with("http") {
            return Err(anyhow!(
                "BACKEND_URL must be an http(s) url (got {})",
                self.backend_url
            ));
        }
        Ok(())
    }
}
