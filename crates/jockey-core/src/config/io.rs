//! YAML persistence for [`EngineConfig`]

use anyhow::{Context, Result};
use std::path::Path;

use super::EngineConfig;

/// Parse an engine config from YAML text
///
/// Missing fields take their defaults; out-of-range values are sanitized.
pub fn parse_config(yaml: &str) -> Result<EngineConfig> {
    let config: EngineConfig =
        serde_yaml::from_str(yaml).context("Failed to parse engine config")?;
    Ok(config.sanitized())
}

/// Load the engine config from a YAML file
///
/// A missing file yields the defaults. An unreadable or invalid file logs a
/// warning and also yields the defaults, so startup never fails on config.
pub fn load_config(path: &Path) -> EngineConfig {
    if !path.exists() {
        log::info!("No engine config at {:?}, using defaults", path);
        return EngineConfig::default();
    }

    let loaded = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read engine config {:?}", path))
        .and_then(|contents| parse_config(&contents));

    match loaded {
        Ok(config) => {
            log::info!("Loaded engine config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            EngineConfig::default()
        }
    }
}

/// Write the engine config as YAML, creating parent directories
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize engine config")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write engine config: {:?}", path))?;

    log::info!("Saved engine config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config(Path::new("/nonexistent/jockey/engine.yaml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = parse_config("sample_rate: 48000\nnum_players: 4\n").unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.num_players, 4);
        assert_eq!(config.poll_interval_ms, EngineConfig::default().poll_interval_ms);
    }

    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "sample_rate: [not, a, number]").unwrap();
        assert_eq!(load_config(&path), EngineConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.yaml");

        let mut config = EngineConfig::default();
        config.initial_bpm = 128.0;
        config.player.sync = false;

        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path), config);
    }
}
