//! Standard locations for jockey configuration files

use std::path::PathBuf;

/// Directory holding jockey configuration
///
/// Returns: `{config_dir}/jockey`, falling back to the working directory when
/// the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jockey")
}

/// Default engine config file path
///
/// Returns: `{config_dir}/jockey/engine.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("engine.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("jockey/engine.yaml"));
    }
}
