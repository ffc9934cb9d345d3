//! Configuration surface.
//!
//! Mirrors the corpus's `ScanConfig`: a single struct with `Default`,
//! optionally layered with a `.codeintel.toml` file, then overridden
//! programmatically. Unknown keys in the TOML file are rejected rather than
//! silently ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, ErrorContext, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EmbeddingModelConfig {
    pub name: String,
    pub dim: usize,
    pub revision: Option<String>,
}

impl Default for EmbeddingModelConfig {
    fn default() -> Self {
        Self { name: "sentence-transformers/all-MiniLM-L6-v2".to_string(), dim: 384, revision: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay_ms: 100, max_delay_ms: 5_000, jitter: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CachePolicyConfig {
    pub read: bool,
    pub write: bool,
    pub max_entries: usize,
    pub ttl_ms: u64,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self { read: true, write: true, max_entries: 512, ttl_ms: 5 * 60 * 1000 }
    }
}

/// Recognized configuration surface (spec §6). Serialized/deserialized from
/// an optional `.codeintel.toml` at the workspace root, with unknown keys
/// rejected so typos fail loudly instead of being silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub state_dir_name: String,
    pub embedding_model: EmbeddingModelConfig,
    pub embedding_batch_max_items: usize,
    pub embedding_batch_max_bytes: usize,
    pub embedding_retry: RetryConfig,
    pub parse_pool_size: usize,
    pub embed_pool_size: usize,
    pub bootstrap_timeout_ms: u64,
    pub query_default_timeout_ms: u64,
    pub cache_policy: CachePolicyConfig,
    pub exclusions: Vec<String>,
    pub max_file_bytes: u64,
    pub synthesis_disabled: bool,
    pub retry_failed_parses: bool,
    pub tokenizer: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir_name: ".codeintel".to_string(),
            embedding_model: EmbeddingModelConfig::default(),
            embedding_batch_max_items: 32,
            embedding_batch_max_bytes: 256 * 1024,
            embedding_retry: RetryConfig::default(),
            parse_pool_size: default_parallelism(),
            embed_pool_size: 2,
            bootstrap_timeout_ms: 120_000,
            query_default_timeout_ms: 5_000,
            cache_policy: CachePolicyConfig::default(),
            exclusions: default_exclusions(),
            max_file_bytes: 512 * 1024,
            synthesis_disabled: false,
            retry_failed_parses: false,
            tokenizer: "bytes-estimate".to_string(),
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(12)
}

fn default_exclusions() -> Vec<String> {
    [
        ".git", "node_modules", "__pycache__", "target", "dist", "build", ".next", "vendor",
        ".codeintel",
    ]
    .into_iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// Load from `<workspace>/.codeintel.toml` if present, falling back to
    /// defaults. Programmatic overrides should be applied after this call.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join(".codeintel.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::io(e, ErrorContext::workspace(workspace_root)))?;
        toml::from_str(&raw).map_err(|e| EngineError::Configuration {
            reason: format!("invalid .codeintel.toml: {e}"),
            context: ErrorContext::workspace(workspace_root),
        })
    }

    pub fn state_dir(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(&self.state_dir_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.state_dir_name, cfg.state_dir_name);
        assert_eq!(parsed.max_file_bytes, cfg.max_file_bytes);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml_str = "state_dir_name = \".codeintel\"\nbogus_key = 1\n";
        let result: std::result::Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.state_dir_name, Config::default().state_dir_name);
    }
}
