use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{Guardrails, ReflexionError};

const DEFAULT_CONFIG_PATH: &str = "reflexion.toml";
const CONFIG_PATH_ENV: &str = "REFLEXION_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub guardrails: Guardrails,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub trace: TraceConfig,
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `REFLEXION_CONFIG` environment variable.
    /// 3. `reflexion.toml` in the current working directory.
    ///
    /// Only the implicit default may be absent; it then yields defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ReflexionError> {
        let (candidate, explicit) = resolve_path(path);
        if !explicit && !candidate.exists() {
            return Ok(Config::default());
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| ReflexionError::config_io(candidate.clone(), err))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Config, ReflexionError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| ReflexionError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), ReflexionError> {
        config.guardrails.validate()?;
        if config.output.default_name.trim().is_empty() {
            return Err(ReflexionError::InvalidConfiguration(
                "output.default_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "OutputConfig::default_dir")]
    pub dir: PathBuf,
    #[serde(default = "OutputConfig::default_name")]
    pub default_name: String,
}

impl OutputConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from(".")
    }

    fn default_name() -> String {
        "research_report.md".to_string()
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            default_name: Self::default_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default = "LoggingConfig::default_dir")]
    pub dir: PathBuf,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_dir() -> PathBuf {
        PathBuf::from("data/logs")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            dir: Self::default_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}
