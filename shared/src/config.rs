use std::env;
use std::time::Duration;
use thiserror::Error;

use labeling_block::layout::{DEFAULT_DATASET_ROOT, DEFAULT_LABELED_ROOT};
use labeling_block::{RetryPolicy, StoreLayout};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is not a valid number: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Settings read once at cold start.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub table_name: String,
    pub bucket_name: String,
    pub dataset_root: String,
    pub labeled_root: String,
    pub public_base_url: Option<String>,
    pub url_expiry: Duration,
    pub document_write_attempts: u32,
    pub document_retry_backoff: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset and blank values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match get(key) {
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name: key, value }),
                None => Ok(default),
            }
        };

        let attempts = number("DOCUMENT_WRITE_ATTEMPTS", 3)?;
        Ok(Self {
            table_name: get("TABLE_NAME").unwrap_or_else(|| "labelme".to_string()),
            bucket_name: get("BUCKET_NAME").ok_or(ConfigError::Missing("BUCKET_NAME"))?,
            dataset_root: get("DATASET_ROOT").unwrap_or_else(|| DEFAULT_DATASET_ROOT.to_string()),
            labeled_root: get("LABELED_ROOT").unwrap_or_else(|| DEFAULT_LABELED_ROOT.to_string()),
            public_base_url: get("PUBLIC_BASE_URL"),
            url_expiry: Duration::from_secs(number("URL_EXPIRY_SECS", 3600)?),
            document_write_attempts: u32::try_from(attempts).unwrap_or(u32::MAX).max(1),
            document_retry_backoff: Duration::from_millis(number("DOCUMENT_RETRY_BACKOFF_MS", 200)?),
        })
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(self.dataset_root.clone(), self.labeled_root.clone())
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            document_attempts: self.document_write_attempts,
            backoff: self.document_retry_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("BUCKET_NAME", "labels")])).unwrap();
        assert_eq!(config.table_name, "labelme");
        assert_eq!(config.layout(), StoreLayout::default());
        assert_eq!(config.retry(), RetryPolicy::default());
        assert_eq!(config.url_expiry, Duration::from_secs(3600));
        assert_eq!(config.public_base_url, None);
    }

    #[test]
    fn bucket_is_required_and_numbers_are_checked() {
        assert_eq!(Config::from_lookup(lookup(&[])), Err(ConfigError::Missing("BUCKET_NAME")));
        assert_eq!(
            Config::from_lookup(lookup(&[("BUCKET_NAME", "b"), ("URL_EXPIRY_SECS", "soon")])),
            Err(ConfigError::Invalid {
                name: "URL_EXPIRY_SECS",
                value: "soon".to_string()
            })
        );
    }
}
