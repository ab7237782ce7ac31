use anyhow::{Context, Result};
use mirror_sync::{BackendConfig, FilterOptions, HashAlgorithm, ScanOptions, SyncOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATABASE_URL: &str = "MIRROR_DATABASE_URL";
pub const ENV_REST_URL: &str = "MIRROR_REST_URL";
pub const ENV_SERVICE_KEY: &str = "MIRROR_SERVICE_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub backend: BackendConfig,
    pub scan: ScanSettings,
    pub apply: ApplySettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub root: PathBuf,
    pub ignored_dirs: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub include_hidden: bool,
    pub hash_algorithm: HashAlgorithm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplySettings {
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Write the log file as JSON lines
    pub json: bool,
    /// Optional log file, console only when unset
    pub file: Option<PathBuf>,
    pub rotation: LogRotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl Default for ScanSettings {
    fn default() -> Self {
        let filter = FilterOptions::default();
        Self {
            root: PathBuf::from("."),
            ignored_dirs: filter.ignored_dirs,
            allowed_extensions: filter.allowed_extensions,
            exclude_patterns: filter.exclude_patterns,
            include_hidden: filter.include_hidden,
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            max_concurrency: SyncOptions::default().max_concurrency,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: true,
            file: None,
            rotation: LogRotation::default(),
        }
    }
}

impl MirrorConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: MirrorConfig =
            toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` when it exists, defaults otherwise
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, self.to_toml()?).await?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source; empty values are ignored
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.backend.database_url = Some(url);
        }
        if let Some(url) = lookup(ENV_REST_URL) {
            self.backend.rest_url = Some(url);
        }
        if let Some(key) = lookup(ENV_SERVICE_KEY) {
            self.backend.service_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.database_url.is_none() && self.backend.rest_url.is_none() {
            anyhow::bail!("No backend configured: set backend.database_url or backend.rest_url");
        }

        if let Some(database_url) = &self.backend.database_url {
            url::Url::parse(database_url).with_context(|| format!("Invalid database_url: {}", database_url))?;
        }
        if let Some(rest_url) = &self.backend.rest_url {
            let parsed = url::Url::parse(rest_url).with_context(|| format!("Invalid rest_url: {}", rest_url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("rest_url must use http or https: {}", rest_url);
            }
        }

        if self.backend.max_connections == 0 {
            anyhow::bail!("backend.max_connections must be positive");
        }
        if self.scan.allowed_extensions.is_empty() {
            anyhow::bail!("scan.allowed_extensions cannot be empty");
        }
        if self.apply.max_concurrency == 0 {
            anyhow::bail!("apply.max_concurrency must be positive");
        }

        parse_level(&self.logging.level)?;
        Ok(())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            root: self.scan.root.clone(),
            scan: ScanOptions {
                filter: FilterOptions {
                    ignored_dirs: self.scan.ignored_dirs.clone(),
                    allowed_extensions: self.scan.allowed_extensions.clone(),
                    exclude_patterns: self.scan.exclude_patterns.clone(),
                    include_hidden: self.scan.include_hidden,
                },
                hash_algorithm: self.scan.hash_algorithm,
                follow_links: false,
            },
            max_concurrency: self.apply.max_concurrency,
        }
    }

    /// Same config with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "********".to_string());

        let mut config = self.clone();
        config.backend.service_key = mask(&config.backend.service_key);
        config.backend.admin_password = mask(&config.backend.admin_password);
        config
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("content-mirror")
        .join("mirror.toml")
}

pub fn parse_level(level: &str) -> Result<tracing::Level> {
    level
        .parse::<tracing::Level>()
        .map_err(|_| anyhow::anyhow!("Unknown log level: {}", level))
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn configured() -> MirrorConfig {
        let mut config = MirrorConfig::default();
        config.backend.database_url = Some("sqlite://mirror.db".to_string());
        config
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.sync_options(), SyncOptions::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: MirrorConfig = toml::from_str(
            r#"
            [backend]
            rest_url = "http://localhost:8090"

            [scan]
            root = "./content"
            include_hidden = false
            hash_algorithm = "blake3"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.rest_url.as_deref(), Some("http://localhost:8090"));
        assert_eq!(config.backend.max_connections, 5);
        assert_eq!(config.scan.root, PathBuf::from("./content"));
        assert!(!config.scan.include_hidden);
        assert_eq!(config.scan.hash_algorithm, HashAlgorithm::Blake3);
        assert!(config.scan.allowed_extensions.contains(&"json".to_string()));
        assert_eq!(config.apply, ApplySettings::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("mirror.toml");

        let mut config = configured();
        config.apply.max_concurrency = 9;
        config.logging.file = Some(PathBuf::from("/tmp/mirror.log"));
        config.save(&path).await.unwrap();

        let loaded = MirrorConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = MirrorConfig::load_or_default(temp.path().join("absent.toml")).await.unwrap();
        assert_eq!(config, MirrorConfig::default());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mirror.toml");
        tokio::fs::write(&path, "[backend\nbroken").await.unwrap();

        assert!(MirrorConfig::load(&path).await.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_DATABASE_URL, "postgres://db/mirror"),
            (ENV_REST_URL, ""),
            (ENV_SERVICE_KEY, "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = MirrorConfig::default();
        config.backend.rest_url = Some("http://localhost:8090".to_string());
        config.apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.backend.database_url.as_deref(), Some("postgres://db/mirror"));
        assert_eq!(config.backend.rest_url.as_deref(), Some("http://localhost:8090"));
        assert_eq!(config.backend.service_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_validate() {
        assert!(configured().validate().is_ok());

        // No backend at all
        assert!(MirrorConfig::default().validate().is_err());

        let mut config = configured();
        config.backend.rest_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        let mut config = configured();
        config.backend.rest_url = Some("ftp://example.com".to_string());
        assert!(config.validate().is_err());

        let mut config = configured();
        config.scan.allowed_extensions.clear();
        assert!(config.validate().is_err());

        let mut config = configured();
        config.apply.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = configured();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = configured();
        config.backend.service_key = Some("secret".to_string());
        config.backend.admin_password = Some("hunter2".to_string());

        let shown = config.redacted().to_toml().unwrap();
        assert!(!shown.contains("secret"));
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("sqlite://mirror.db"));
    }

    #[test]
    fn test_default_path_is_a_toml_file() {
        assert_eq!(
            default_config_path().extension().and_then(|e| e.to_str()),
            Some("toml")
        );
    }
}
