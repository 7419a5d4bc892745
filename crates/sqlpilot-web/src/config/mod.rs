use std::path::PathBuf;

use axum::http::HeaderValue;
use sqlpilot_db::DEFAULT_PAGE_SIZE;

pub const HTTP_ADDR_ENV: &str = "SQLPILOT_HTTP";
pub const UPLOAD_DIR_ENV: &str = "SQLPILOT_UPLOAD_DIR";
pub const EXPORT_PAGE_SIZE_ENV: &str = "SQLPILOT_EXPORT_PAGE_SIZE";
pub const MAX_UPLOAD_BYTES_ENV: &str = "SQLPILOT_MAX_UPLOAD_BYTES";
pub const CORS_ORIGIN_ENV: &str = "SQLPILOT_CORS_ORIGIN";

pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Server settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub http_addr: String,
    pub upload_dir: PathBuf,
    pub export_page_size: usize,
    pub max_upload_bytes: usize,
    pub cors_origin: Option<HeaderValue>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            export_page_size: DEFAULT_PAGE_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            cors_origin: None,
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let export_page_size = match var(EXPORT_PAGE_SIZE_ENV) {
            Some(raw) => parse_count(EXPORT_PAGE_SIZE_ENV, &raw)?,
            None => defaults.export_page_size,
        };
        let max_upload_bytes = match var(MAX_UPLOAD_BYTES_ENV) {
            Some(raw) => parse_count(MAX_UPLOAD_BYTES_ENV, &raw)?,
            None => defaults.max_upload_bytes,
        };
        let cors_origin = var(CORS_ORIGIN_ENV)
            .map(|raw| {
                HeaderValue::from_str(raw.trim())
                    .map_err(|e| format!("invalid {CORS_ORIGIN_ENV} {raw:?}: {e}"))
            })
            .transpose()?;

        Ok(Self {
            http_addr: var(HTTP_ADDR_ENV).unwrap_or(defaults.http_addr),
            upload_dir: var(UPLOAD_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            export_page_size,
            max_upload_bytes,
            cors_origin,
        })
    }
}

fn parse_count(key: &str, raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(format!("{key} must be at least 1")),
        Ok(value) => Ok(value),
        Err(e) => Err(format!("invalid {key} {raw:?}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<WebConfig, String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        WebConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(config_from(&[]), Ok(WebConfig::default()));
        assert_eq!(WebConfig::default().export_page_size, 1000);
    }

    #[test]
    fn overrides_are_read() {
        let config = config_from(&[
            (HTTP_ADDR_ENV, "0.0.0.0:8080"),
            (UPLOAD_DIR_ENV, "/tmp/dbs"),
            (EXPORT_PAGE_SIZE_ENV, "250"),
            (MAX_UPLOAD_BYTES_ENV, "1024"),
            (CORS_ORIGIN_ENV, "http://localhost:5173"),
        ])
        .expect("config");
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.upload_dir, PathBuf::from("/tmp/dbs"));
        assert_eq!(config.export_page_size, 250);
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(
            config.cors_origin,
            Some(HeaderValue::from_static("http://localhost:5173"))
        );
    }

    #[test]
    fn zero_or_garbage_counts_are_rejected() {
        let error = config_from(&[(EXPORT_PAGE_SIZE_ENV, "0")]).expect_err("zero page size");
        assert!(error.contains("at least 1"), "{error}");
        assert!(config_from(&[(MAX_UPLOAD_BYTES_ENV, "lots")]).is_err());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[(HTTP_ADDR_ENV, "  "), (CORS_ORIGIN_ENV, "")]).expect("config");
        assert_eq!(config.http_addr, DEFAULT_HTTP_ADDR);
        assert!(config.cors_origin.is_none());
    }
}
