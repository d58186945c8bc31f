use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use manifold_protocol::{
    HEARTBEAT_INTERVAL_SECS, PAIRING_TIMEOUT_SECS, QR_EXPIRY_SECS, RECONNECT_BASE_SECS,
    RECONNECT_MAX_ATTEMPTS,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifoldConfig {
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

/// Upstream gateway connection settings. Timing defaults come from the
/// protocol constants; tests shrink them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// WebSocket URL of the external gateway process.
    pub url: String,
    pub heartbeat_secs: u64,
    pub reconnect_base_secs: u64,
    pub reconnect_max_attempts: u32,
    pub pairing_timeout_secs: u64,
    pub qr_expiry_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9070/gateway".into(),
            heartbeat_secs: HEARTBEAT_INTERVAL_SECS,
            reconnect_base_secs: RECONNECT_BASE_SECS,
            reconnect_max_attempts: RECONNECT_MAX_ATTEMPTS,
            pairing_timeout_secs: PAIRING_TIMEOUT_SECS,
            qr_expiry_secs: QR_EXPIRY_SECS,
        }
    }
}

/// Front-end HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8460,
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Defaults to `<data_dir>/manifold.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("manifold.db"))
    }
}
