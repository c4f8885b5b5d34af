//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

/// Used when neither the flag, the environment nor the config file set a URL
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// API endpoint URL
    pub api_url: Option<String>,
    /// Default output format ("table" or "json")
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from the user config directory
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a file, defaulting when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Resolve the API URL: explicit flag or env first, then the file
    pub fn api_url(&self, from_args: Option<String>) -> String {
        from_args
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve the output format: explicit flag first, then the file
    pub fn format(&self, from_args: Option<OutputFormat>) -> Result<OutputFormat> {
        if let Some(format) = from_args {
            return Ok(format);
        }
        match self.default_format.as_deref() {
            None => Ok(OutputFormat::default()),
            Some(name) => <OutputFormat as clap::ValueEnum>::from_str(name, true)
                .map_err(|e| anyhow::anyhow!("Invalid default_format in config: {e}")),
        }
    }

    /// `<config dir>/replayctl/config.json`
    fn config_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("replayctl").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.api_url(None), DEFAULT_API_URL);
    }

    #[test]
    fn test_file_values_are_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"api_url":"http://replay:9000","default_format":"json"}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_url(None), "http://replay:9000");
        assert_eq!(
            config.api_url(Some("http://other:1".into())),
            "http://other:1"
        );
        assert_eq!(config.format(None).unwrap(), OutputFormat::Json);
        assert_eq!(
            config.format(Some(OutputFormat::Table)).unwrap(),
            OutputFormat::Table
        );
    }

    #[test]
    fn test_bad_format_in_file() {
        let config = Config {
            api_url: None,
            default_format: Some("yaml".into()),
        };
        assert!(config.format(None).is_err());
    }
}
