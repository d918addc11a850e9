//! Configuration loading from `~/.botnet/botnet.toml` with defaults.

use botnet_types::config::NodeConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load node configuration from a TOML file, with defaults.
///
/// A missing or unreadable file yields `NodeConfig::default()`; the caller
/// still runs `NodeConfig::validate` before booting.
pub fn load_config(path: Option<&Path>) -> NodeConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<NodeConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    NodeConfig::default()
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    botnet_home().join("botnet.toml")
}

/// Get the default BotNet home directory.
pub fn botnet_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".botnet")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("missing.toml")));
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("botnet.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
node_id = "a.example"
domain = "a.example"

[bootstrap]
seeds = ["b.example"]

[network]
max_neighbors = 4
"#
        )
        .unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.node_id, "a.example");
        assert_eq!(config.bootstrap.seeds, vec!["b.example".to_string()]);
        assert_eq!(config.network.max_neighbors, 4);
        assert_eq!(config.network.health_check_interval_secs, 60);
    }

    #[test]
    fn test_load_config_malformed_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("botnet.toml");
        std::fs::write(&path, "node_id = [not toml").unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.node_id, "botnet.localhost");
    }
}
