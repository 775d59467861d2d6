use std::env;

use anyhow::{bail, Result};

const DEFAULT_BASE_URL: &str = "https://www.sapdatasheet.org/abap/tabl/";
const DEFAULT_DB_PATH: &str = "data/sapds.sqlite";
const DEFAULT_CONTRACTS_DIR: &str = "contracts";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// All runtime settings, resolved from the environment exactly once in `main`
/// and passed by reference into each component. Every knob has a default.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub db_path: String,
    pub contracts_dir: String,
    pub delay_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub concurrency: usize,
    pub contract_version: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            base_url: env_or("BASE_URL", DEFAULT_BASE_URL),
            db_path: env_or("DB_PATH", DEFAULT_DB_PATH),
            contracts_dir: env_or("CONTRACTS_DIR", DEFAULT_CONTRACTS_DIR),
            delay_ms: env_parse("DELAY_BETWEEN_REQUESTS_MS", 2000)?,
            max_retries: env_parse("MAX_RETRIES", 3)?,
            backoff_base_ms: env_parse("BACKOFF_BASE_MS", 2000)?,
            concurrency: env_parse("CONCURRENCY", 8)?,
            contract_version: env_or("CONTRACT_VERSION", "1.0.0"),
            gemini_api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            gemini_model: env_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            gemini_api_base: env_or("GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE),
        })
    }

    /// The generative extractor cannot run without a key; everything else has
    /// a workable default, so this is the one fatal startup check.
    pub fn require_gemini_key(&self) -> Result<&str> {
        match &self.gemini_api_key {
            Some(k) => Ok(k),
            None => bail!("GEMINI_API_KEY must be set for the generative extractor"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => match raw.parse() {
            Ok(v) => Ok(v),
            Err(e) => bail!("invalid {}={:?}: {}", key, raw, e),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        // Serialized access: config tests share the process environment.
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.contract_version, "1.0.0");
        assert!(cfg.base_url.starts_with("https://"));
    }

    #[test]
    fn generative_requires_key() {
        let cfg = Config {
            gemini_api_key: None,
            ..Config::from_env().unwrap()
        };
        assert!(cfg.require_gemini_key().is_err());
    }
}
