use anyhow::{Context, Result};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::GatewayError;

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderDetection {
    /// Scan the template for `{NAME}` locally.
    Scan,
    /// Ask the model to list the placeholders.
    Model,
}

/// Sampling temperature per kind of gateway call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Temperatures {
    pub prompt_generation: f32,
    pub test_case_generation: f32,
    pub execution: f32,
    pub evaluation: f32,
    pub placeholder_identification: f32,
}

impl Default for Temperatures {
    fn default() -> Self {
        Self {
            prompt_generation: 0.1,
            test_case_generation: 0.2,
            execution: 0.0,
            evaluation: 0.0,
            placeholder_identification: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: String,
    pub api_base: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// 0 means no cap.
    pub max_rounds: u32,
    pub max_test_case_attempts: u32,
    pub max_concurrency: usize,
    pub results_path: String,
    /// Count unrecognized verdicts as failures.
    pub strict_verdicts: bool,
    pub placeholder_detection: PlaceholderDetection,
    pub temperatures: Temperatures,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "claude-3-sonnet-20240229".into(),
            api_base: "https://api.anthropic.com".into(),
            api_version: "2023-06-01".into(),
            max_tokens: 4096,
            timeout_secs: 600,
            max_retries: 5,
            max_rounds: 10,
            max_test_case_attempts: 5,
            max_concurrency: 10,
            results_path: "results.json".into(),
            strict_verdicts: false,
            placeholder_detection: PlaceholderDetection::Scan,
            temperatures: Temperatures::default(),
        }
    }
}

impl Config {
    /// Defaults overlaid with an optional TOML file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else { return Ok(Self::default()) };
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }
}

/// The gateway credential; required before any round starts.
pub fn api_key_from_env() -> Result<String, GatewayError> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or(GatewayError::MissingCredential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            "max_rounds = 3\nplaceholder_detection = \"model\"\n[temperatures]\nexecution = 0.5\n",
        )
        .unwrap();
        assert_eq!(cfg.max_rounds, 3);
        assert_eq!(cfg.placeholder_detection, PlaceholderDetection::Model);
        assert_eq!(cfg.temperatures.execution, 0.5);
        assert_eq!(cfg.temperatures.test_case_generation, 0.2);
        assert_eq!(cfg.results_path, "results.json");
        assert!(!cfg.strict_verdicts);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forge.toml");
        std::fs::write(&path, "model = \"claude-3-haiku-20240307\"\nstrict_verdicts = true\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.model, "claude-3-haiku-20240307");
        assert!(cfg.strict_verdicts);
        assert_eq!(cfg.max_test_case_attempts, 5);
    }

    #[test]
    fn test_load_without_file_is_default() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.max_concurrency, 10);
        assert_eq!(cfg.temperatures.prompt_generation, 0.1);
    }
}
