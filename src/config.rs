use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub templates: TemplateDefaults,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root_dir: PathBuf,
}

/// Option values used when a command line does not say otherwise
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateDefaults {
    pub strict_variables: bool,
    pub rollback_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            root_dir: PathBuf::from("./storyworld-data"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `storyworld` config file,
    /// then `STORYWORLD_` environment variables
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from("storyworld")
    }

    pub fn load_from(file_stem: &str) -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name(file_stem).required(false));

        // STORYWORLD_STORAGE__ROOT_DIR=/data
        config = config.add_source(
            config::Environment::with_prefix("STORYWORLD")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load_from("definitely-not-a-config-file").unwrap();
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(!config.templates.strict_variables);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[storage]\nbackend = \"memory\"\n\n[templates]\nrollback_on_failure = true"
        )
        .unwrap();

        let stem = file.path().with_extension("");
        let config = AppConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.root_dir, PathBuf::from("./storyworld-data"));
        assert!(config.templates.rollback_on_failure);
    }
}
