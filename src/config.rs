//! Loader configuration.
//!
//! Read from an optional YAML file, then overridden field by field from the
//! command line. Every field has a default, so an empty file is valid.

use crate::error::{LoadError, Result};
use crate::pipeline::RetryPolicy;
use crate::reader::{encoding_for_label, EncodingResolver, StrictDecodeProbe};
use crate::rewrite::RewriteConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Retry settings for retryable store errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per statement, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub workers: usize,
    /// Statements per chunk
    pub chunk_size: usize,
    /// Chunks allowed in flight; twice the worker count when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
    pub statement_timeout_secs: u64,
    pub retry: RetryConfig,
    /// Cancel the whole run on the first failed statement
    pub stop_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_schema: Option<String>,
    pub target_schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_table_prefix: Option<String>,
    /// Encoding hint for source files
    pub encoding: String,
    pub target_encoding: String,
    /// Encodings tried after the hint; the built-in list when empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback_encodings: Vec<String>,
    /// Probe only this many bytes per candidate instead of the whole file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_bytes: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            chunk_size: 1000,
            queue_depth: None,
            statement_timeout_secs: 30,
            retry: RetryConfig::default(),
            stop_on_error: false,
            source_schema: None,
            target_schema: "public".to_string(),
            strip_table_prefix: None,
            encoding: "utf-8".to_string(),
            target_encoding: "utf-8".to_string(),
            fallback_encodings: Vec::new(),
            sample_bytes: None,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LoadError::config("workers must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(LoadError::config("chunk_size must be at least 1"));
        }
        if self.queue_depth == Some(0) {
            return Err(LoadError::config("queue_depth must be at least 1"));
        }
        if self.statement_timeout_secs == 0 {
            return Err(LoadError::config("statement_timeout_secs must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(LoadError::config("retry.max_attempts must be at least 1"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(LoadError::config("retry.multiplier must be a finite number >= 1"));
        }
        if self.target_schema.trim().is_empty() {
            return Err(LoadError::config("target_schema cannot be empty"));
        }

        let labels = std::iter::once(&self.encoding)
            .chain(std::iter::once(&self.target_encoding))
            .chain(self.fallback_encodings.iter());
        for label in labels {
            if encoding_for_label(label).is_none() {
                return Err(LoadError::config(format!("unknown encoding: {}", label)));
            }
        }
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.workers * 2).max(1)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn rewrite_config(&self) -> RewriteConfig {
        RewriteConfig {
            source_schema: self.source_schema.clone(),
            target_schema: self.target_schema.clone(),
            strip_table_prefix: self.strip_table_prefix.clone(),
        }
    }

    /// Resolver with the configured fallbacks and probe size.
    /// Unknown labels are dropped; `validate` reports them first.
    pub fn encoding_resolver(&self) -> EncodingResolver {
        let resolver = if self.fallback_encodings.is_empty() {
            EncodingResolver::default()
        } else {
            EncodingResolver::new(
                self.fallback_encodings
                    .iter()
                    .filter_map(|l| encoding_for_label(l))
                    .collect(),
            )
        };
        match self.sample_bytes {
            Some(limit) => resolver.with_probe(StrictDecodeProbe::sampled(limit)),
            None => resolver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_depth(), 8);
        assert_eq!(config.statement_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.rewrite_config().target_schema, "public");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("load.yaml");
        fs::write(
            &path,
            "workers: 8\nsource_schema: EMR_HIS\nretry:\n  max_attempts: 5\nfallback_encodings: [gbk, big5]\n",
        )
        .unwrap();

        let config = LoaderConfig::load(&path).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.source_schema.as_deref(), Some("EMR_HIS"));
        assert_eq!(config.encoding_resolver().fallbacks().len(), 2);
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        let mut config = LoaderConfig {
            workers: 0,
            ..LoaderConfig::default()
        };
        assert!(matches!(config.validate(), Err(LoadError::Config { .. })));

        config.workers = 2;
        config.queue_depth = Some(0);
        assert!(config.validate().is_err());

        config.queue_depth = None;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_encoding() {
        let config = LoaderConfig {
            target_encoding: "ebcdic-ish".to_string(),
            ..LoaderConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ebcdic-ish"));
    }
}
