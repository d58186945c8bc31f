use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env::substitute_env, schema::ManifoldConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "manifold.toml",
    "manifold.yaml",
    "manifold.yml",
    "manifold.json",
];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, discovery only looks in this
/// directory; project-local and user-global paths are skipped. Tests call
/// this to isolate themselves from the host machine.
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.lock() {
        *guard = Some(path);
    }
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE.lock().ok().and_then(|g| g.clone())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ManifoldConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ManifoldConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let cfg = match ext {
        "toml" => toml::from_str(raw)?,
        "yaml" | "yml" => serde_yaml::from_str(raw)?,
        "json" => serde_json::from_str(raw)?,
        other => anyhow::bail!("unsupported config format: .{other}"),
    };
    Ok(cfg)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./manifold.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/manifold/manifold.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ManifoldConfig::default()` if no config file is found or the
/// found file fails to parse.
pub fn discover_and_load() -> ManifoldConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    ManifoldConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
        // Override is set — don't fall through to other locations.
        return None;
    }

    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/manifold/
    if let Some(dir) = home_dir().map(|h| h.join(".config").join("manifold")) {
        for name in CONFIG_FILENAMES {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the config directory: override, or `~/.config/manifold/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("manifold"))
}

/// Returns the data directory: `~/.manifold/` on all platforms.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".manifold"))
        .unwrap_or_else(|| PathBuf::from(".manifold"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifold.toml");
        std::fs::write(
            &path,
            r#"
[gateway]
url = "ws://gw.internal:9070/gateway"
pairing_timeout_secs = 30

[server]
port = 9000
"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.gateway.url, "ws://gw.internal:9070/gateway");
        assert_eq!(cfg.gateway.pairing_timeout_secs, 30);
        // Unset fields keep their defaults.
        assert_eq!(cfg.gateway.reconnect_max_attempts, 5);
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "127.0.0.1");
    }

    #[test]
    fn loads_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifold.json");
        std::fs::write(&path, r#"{"gateway": {"heartbeat_secs": 10}}"#).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.gateway.heartbeat_secs, 10);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifold.ini");
        std::fs::write(&path, "gateway=x").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn defaults_track_protocol_constants() {
        let cfg = ManifoldConfig::default();
        assert_eq!(cfg.gateway.heartbeat_secs, 30);
        assert_eq!(cfg.gateway.reconnect_base_secs, 5);
        assert_eq!(cfg.gateway.reconnect_max_attempts, 5);
        assert_eq!(cfg.gateway.pairing_timeout_secs, 120);
        assert_eq!(cfg.gateway.qr_expiry_secs, 60);
    }
}
