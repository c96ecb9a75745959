//! Bridge configuration.
//!
//! TOML file with `[gateway]`, `[sync]`, and `[storage]` sections; every
//! field has a default so a missing file or a partial one still yields a
//! runnable (locked-down) configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Gateway port (default: 8600)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Origins allowed to talk to the bridge. Exact allow-list; there is
    /// no wildcard mode.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Pre-shared capability key for service-to-service writes.
    #[serde(default)]
    pub capability_key: Option<String>,
    /// Bearer tokens of authenticated editors (each write also needs a
    /// fresh X-Edit-Nonce).
    #[serde(default)]
    pub editor_tokens: Vec<String>,
    /// Batch writes allowed per principal per minute (0 disables).
    #[serde(default = "default_batches_per_minute")]
    pub batches_per_minute: u32,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Optional rebuild/redeploy hook POSTed after a successful save.
    #[serde(default)]
    pub rebuild_hook_url: Option<String>,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8600
}

fn default_batches_per_minute() -> u32 {
    60
}

fn default_max_body_bytes() -> usize {
    262_144
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            allowed_origins: Vec::new(),
            capability_key: None,
            editor_tokens: Vec::new(),
            batches_per_minute: default_batches_per_minute(),
            max_body_bytes: default_max_body_bytes(),
            rebuild_hook_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Save attempts before giving up (transport failures only).
    #[serde(default = "default_save_attempts")]
    pub save_attempts: u32,
    /// Base backoff between save attempts, milliseconds (linear).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Pause between broadcasting changes and requesting verification.
    #[serde(default = "default_notify_delay_ms")]
    pub notify_delay_ms: u64,
    /// Wait per verification request, milliseconds.
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
    /// Verification requests before escalating.
    #[serde(default = "default_verify_requests")]
    pub verify_requests: u32,
    /// Wait after a forced refresh, milliseconds.
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
}

fn default_save_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_notify_delay_ms() -> u64 {
    250
}

fn default_verify_timeout_ms() -> u64 {
    3_000
}

fn default_verify_requests() -> u32 {
    2
}

fn default_refresh_timeout_ms() -> u64 {
    4_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            save_attempts: default_save_attempts(),
            retry_base_ms: default_retry_base_ms(),
            notify_delay_ms: default_notify_delay_ms(),
            verify_timeout_ms: default_verify_timeout_ms(),
            verify_requests: default_verify_requests(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding the content snapshot.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Embedded-side cache file.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("editbridge.db")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("editbridge-cache.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cache_path: default_cache_path(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load from a file when present, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn sync_timings(&self) -> crate::sync::SyncTimings {
        crate::sync::SyncTimings {
            notify_delay: std::time::Duration::from_millis(self.sync.notify_delay_ms),
            verify_timeout: std::time::Duration::from_millis(self.sync.verify_timeout_ms),
            verify_requests: self.sync.verify_requests,
            refresh_timeout: std::time::Duration::from_millis(self.sync.refresh_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> crate::sync::RetryPolicy {
        crate::sync::RetryPolicy::new(
            self.sync.save_attempts,
            std::time::Duration::from_millis(self.sync.retry_base_ms),
        )
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_locked_down() {
        let config = BridgeConfig::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert!(config.gateway.allowed_origins.is_empty());
        assert!(config.gateway.capability_key.is_none());
        assert_eq!(config.gateway.batches_per_minute, 60);
        assert_eq!(config.sync.save_attempts, 3);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [gateway]
            port = 9000
            allowed_origins = ["https://site.example"]
            capability_key = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.allowed_origins.len(), 1);
        assert_eq!(config.sync.verify_requests, 2);
        assert_eq!(config.storage.database_path, PathBuf::from("editbridge.db"));
    }

    #[test]
    fn load_reports_missing_file() {
        let error = BridgeConfig::load(Path::new("/nonexistent/editbridge.toml")).unwrap_err();
        assert!(error.to_string().contains("editbridge.toml"));
    }
}
