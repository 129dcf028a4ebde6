use super::Config;
use crate::core::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Configuration loader that layers defaults, a TOML file and env overrides.
pub struct ConfigLoader {
    /// Path to standalone config file.
    config_file: Option<PathBuf>,
    /// Whether to apply `NUTTX_CRATE_BENCH_*` overrides.
    use_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader.
    pub fn new() -> Self {
        Self {
            config_file: None,
            use_env: true,
        }
    }

    /// Set a standalone configuration file path.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Disable env var overrides.
    pub fn no_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Load configuration from all enabled sources.
    ///
    /// Priority (later sources override earlier):
    /// 1. Default values
    /// 2. Standalone TOML file
    /// 3. Individual env var overrides (`NUTTX_CRATE_BENCH_*`)
    pub fn load(self) -> Result<Config> {
        let mut config = Config::default();

        if let Some(ref config_path) = self.config_file {
            config = Self::load_toml_file(config_path)?;
        }

        if self.use_env {
            super::env::apply_env_overrides(&mut config);
            for (key, value) in super::env::detect_active_overrides() {
                log::debug!("env override {}={}", key, value);
            }
        }

        log::debug!(
            "loaded configuration ({} board(s) available)",
            config.supported_boards().len()
        );
        Ok(config)
    }

    /// Load configuration from a standalone TOML file.
    fn load_toml_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse TOML config: {}", e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::tests::with_env_vars;
    use std::time::Duration;

    #[test]
    fn test_load_standalone_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bench.toml");
        std::fs::write(
            &config_path,
            r#"
[session]
boot_timeout = 15

[boards.qemu-virt]
launch = ["qemu-system-riscv64", "-M", "virt", "-kernel", "{binary}"]
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .no_env()
            .config_file(&config_path)
            .load()
            .unwrap();

        assert_eq!(config.session.boot_timeout, Duration::from_secs(15));
        assert!(config.supported_boards().contains(&"qemu-virt".to_string()));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bench.toml");
        std::fs::write(&config_path, "[session]\nboot_timeout = 15\n").unwrap();

        with_env_vars(&[("NUTTX_CRATE_BENCH_BOOT_TIMEOUT", "3")], || {
            let config = ConfigLoader::new().config_file(&config_path).load().unwrap();
            assert_eq!(config.session.boot_timeout, Duration::from_secs(3));
        });
    }

    #[test]
    fn test_missing_config_file_error() {
        let result = ConfigLoader::new()
            .no_env()
            .config_file("/nonexistent/config.toml")
            .load();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("config file"));
    }

    #[test]
    fn test_invalid_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bad.toml");
        std::fs::write(&config_path, "this is not valid { toml [[[").unwrap();

        let result = ConfigLoader::new().no_env().config_file(&config_path).load();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("TOML"));
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ConfigLoader::new().no_env().load().unwrap();
        assert_eq!(config.supported_boards().len(), 3);
    }
}
