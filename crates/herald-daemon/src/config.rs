//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use herald_cursor::CursorCodec;
use herald_delivery::{GatewayConfig, PageConfig, RetryPolicy, RouterConfig, SyncConfig};

/// Errors in an otherwise well-formed config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cursor_key_hex must be 64 hex characters: {0}")]
    InvalidCursorKey(String),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub paging: PagingConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Ingestion and live-push settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Bounded wait for a live-push acknowledgment.
    #[serde(default = "default_push_ack_timeout_ms")]
    pub push_ack_timeout_ms: u64,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// Attempts per send on transient store failure, same idempotency key.
    #[serde(default = "default_send_max_attempts")]
    pub send_max_attempts: u32,
    #[serde(default = "default_send_retry_backoff_ms")]
    pub send_retry_backoff_ms: u64,
}

/// Reconnection synchronizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_syncing_ttl_secs")]
    pub syncing_ttl_secs: u64,
    /// Heartbeat lease on an online session. 0 = no lease.
    #[serde(default = "default_online_ttl_secs")]
    pub online_ttl_secs: u64,
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: u32,
    /// Bound on FinalCheck drain rounds.
    #[serde(default = "default_final_check_rounds")]
    pub final_check_rounds: u32,
    #[serde(default = "default_drain_ack_timeout_ms")]
    pub drain_ack_timeout_ms: u64,
}

/// Conversation history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagingConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// 32-byte cursor key as hex. Empty = random per process, so cursors
    /// do not survive a restart.
    #[serde(default)]
    pub cursor_key_hex: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Server affinity written into presence records.
    #[serde(default = "default_node_name")]
    pub node_name: String,
}

// Default value functions

fn default_push_ack_timeout_ms() -> u64 {
    herald_types::DEFAULT_PUSH_ACK_TIMEOUT_MS
}

fn default_max_content_chars() -> usize {
    herald_delivery::gateway::DEFAULT_MAX_CONTENT_CHARS
}

fn default_send_max_attempts() -> u32 {
    3
}

fn default_send_retry_backoff_ms() -> u64 {
    200
}

fn default_syncing_ttl_secs() -> u64 {
    herald_types::DEFAULT_SYNCING_TTL_SECS
}

fn default_online_ttl_secs() -> u64 {
    90
}

fn default_drain_batch_size() -> u32 {
    herald_delivery::sync::DEFAULT_DRAIN_BATCH_SIZE
}

fn default_final_check_rounds() -> u32 {
    herald_delivery::sync::DEFAULT_FINAL_CHECK_ROUNDS
}

fn default_drain_ack_timeout_ms() -> u64 {
    5000
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_node_name() -> String {
    "herald-local".to_string()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            push_ack_timeout_ms: default_push_ack_timeout_ms(),
            max_content_chars: default_max_content_chars(),
            send_max_attempts: default_send_max_attempts(),
            send_retry_backoff_ms: default_send_retry_backoff_ms(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            syncing_ttl_secs: default_syncing_ttl_secs(),
            online_ttl_secs: default_online_ttl_secs(),
            drain_batch_size: default_drain_batch_size(),
            final_check_rounds: default_final_check_rounds(),
            drain_ack_timeout_ms: default_drain_ack_timeout_ms(),
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            cursor_key_hex: String::new(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            node_name: default_node_name(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            ack_timeout: Duration::from_millis(self.delivery.push_ack_timeout_ms),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_content_chars: self.delivery.max_content_chars,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.delivery.send_max_attempts,
            backoff: Duration::from_millis(self.delivery.send_retry_backoff_ms),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        let online_ttl = match self.sync.online_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        SyncConfig {
            syncing_ttl: Duration::from_secs(self.sync.syncing_ttl_secs),
            online_ttl,
            batch_size: self.sync.drain_batch_size,
            final_check_rounds: self.sync.final_check_rounds,
            ack_timeout: Duration::from_millis(self.sync.drain_ack_timeout_ms),
            server_affinity: self.advanced.node_name.clone(),
        }
    }

    pub fn page_config(&self) -> PageConfig {
        PageConfig {
            default_limit: self.paging.default_page_size,
            max_limit: self.paging.max_page_size,
        }
    }

    /// Cursor codec under the configured key, or a random one.
    pub fn cursor_codec(&self) -> Result<CursorCodec, ConfigError> {
        let key_hex = self.paging.cursor_key_hex.trim();
        if key_hex.is_empty() {
            return Ok(CursorCodec::random());
        }
        let key = hex::decode(key_hex).map_err(|e| ConfigError::InvalidCursorKey(e.to_string()))?;
        if key.len() != 32 {
            return Err(ConfigError::InvalidCursorKey(format!(
                "decoded to {} bytes",
                key.len()
            )));
        }
        Ok(CursorCodec::new(&key))
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        // Check env var override first
        if let Ok(dir) = std::env::var("HERALD_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("HERALD_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Herald")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".herald")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/herald"))
}
