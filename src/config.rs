use crate::constants::{
    DEFAULT_ACCOUNT_CODE, DEFAULT_BASE_URL, DEFAULT_BUNDLE_NAME, DEFAULT_CONFIG_FILE,
    DEFAULT_REGISTRY_URL, REGISTRY_MARKER_TOKENS,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::enrich::ColumnRule;
use chrono::Datelike;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub paths: PathsConfig,
    pub processing: ProcessingConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Directory index holding one sub-directory per year.
    pub base_url: String,
    /// Directory index holding the operator registry snapshot.
    pub registry_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            connect_timeout_ms: 30_000,
            read_timeout_ms: 60_000,
        }
    }
}

impl SourcesConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub download_dir: PathBuf,
    pub extract_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            extract_dir: PathBuf::from("extraidos"),
            output_dir: PathBuf::from("output"),
            temp_dir: PathBuf::from("temp"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// How many of the most recent quarters to retrieve.
    pub periods: usize,
    /// Exact accounting code selecting the in-scope line items.
    pub account_code: String,
    /// Year assigned to files whose name carries no `<q>T<yyyy>` marker.
    pub fallback_year: i32,
    pub bundle_name: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            periods: 3,
            account_code: DEFAULT_ACCOUNT_CODE.to_string(),
            fallback_year: chrono::Local::now().year(),
            bundle_name: DEFAULT_BUNDLE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Tokens that mark the preferred registry CSV among the listed links.
    pub marker_tokens: Vec<String>,
    /// Extra header patterns appended to the built-in column mapping.
    pub extra_columns: Vec<ColumnRule>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            marker_tokens: REGISTRY_MARKER_TOKENS.iter().map(|t| t.to_string()).collect(),
            extra_columns: Vec::new(),
        }
    }
}

impl Config {
    /// Loads defaults, then the TOML file (explicit path or `pipeline.toml` when present),
    /// then `ANS_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_var("ANS_BASE_URL") {
            self.sources.base_url = v;
        }
        if let Some(v) = env_var("ANS_REGISTRY_URL") {
            self.sources.registry_url = v;
        }
        if let Some(v) = env_var("ANS_CONNECT_TIMEOUT_MS") {
            self.sources.connect_timeout_ms = parse_env("ANS_CONNECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = env_var("ANS_READ_TIMEOUT_MS") {
            self.sources.read_timeout_ms = parse_env("ANS_READ_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = env_var("ANS_PERIODS") {
            self.processing.periods = parse_env("ANS_PERIODS", &v)?;
        }
        if let Some(v) = env_var("ANS_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("ANS_DOWNLOAD_DIR") {
            self.paths.download_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("ANS_EXTRACT_DIR") {
            self.paths.extract_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("ANS_TEMP_DIR") {
            self.paths.temp_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.periods == 0 {
            return Err(PipelineError::Config(
                "processing.periods must be at least 1".to_string(),
            ));
        }
        if self.processing.account_code.trim().is_empty() {
            return Err(PipelineError::Config(
                "processing.account_code must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{} has an invalid value '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::enrich::{HeaderPattern, RegistryField};
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.processing.periods, 3);
        assert_eq!(config.processing.account_code, "41");
        assert_eq!(config.sources.connect_timeout(), Duration::from_millis(30_000));
        assert_eq!(config.paths.extract_dir, PathBuf::from("extraidos"));
        assert!(config.sources.base_url.ends_with("demonstracoes_contabeis/"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[processing]
periods = 5
fallback_year = 2024

[[registry.extra_columns]]
field = "region"
patterns = [{{ match = "exact", value = "sg_uf" }}]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.processing.periods, 5);
        assert_eq!(config.processing.fallback_year, 2024);
        assert_eq!(config.processing.account_code, "41");
        assert_eq!(config.sources.read_timeout_ms, 60_000);
        assert_eq!(config.registry.extra_columns.len(), 1);
        assert_eq!(config.registry.extra_columns[0].field, RegistryField::Region);
        assert_eq!(
            config.registry.extra_columns[0].patterns,
            vec![HeaderPattern::Exact("sg_uf".to_string())]
        );
    }

    #[test]
    fn test_validate_rejects_zero_periods() {
        let mut config = Config::default();
        config.processing.periods = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file(Path::new("/nonexistent/pipeline.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
